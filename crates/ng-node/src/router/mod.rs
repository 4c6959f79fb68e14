//! Route resolution and dispatch

mod dispatcher;
mod table;

pub use dispatcher::Router;
pub use table::{Binding, RouteSnapshot, RouteTable};

use bytes::Bytes;
use ng_core::RouteError;

/// Body of the Response sent to a client whose Request failed
pub fn error_body(err: &RouteError) -> Bytes {
    let body = serde_json::json!({
        "code": err.code(),
        "message": err.to_string(),
    });
    Bytes::from(body.to_string())
}
