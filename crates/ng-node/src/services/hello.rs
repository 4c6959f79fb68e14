//! `GameService`: greets clients

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use ng_core::traits::{Handler, Session};
use ng_core::RouteError;

/// Service name the handler is bound under
pub const GAME_SERVICE: &str = "GameService";

#[derive(Debug, Deserialize)]
struct HelloRequest {
    name: String,
}

#[derive(Debug, Serialize)]
struct HelloResponse {
    message: String,
}

/// Answers `GameService.Hello`
pub struct GameService;

impl GameService {
    fn hello(&self, session: &dyn Session, body: &[u8]) -> Result<Bytes, RouteError> {
        let req: HelloRequest = serde_json::from_slice(body)
            .map_err(|e| RouteError::Handler(format!("invalid hello request: {}", e)))?;

        tracing::info!("GameService.Hello from {} name={}", session.id(), req.name);

        let resp = HelloResponse {
            message: format!("Hello World, {}", req.name),
        };
        serde_json::to_vec(&resp)
            .map(Bytes::from)
            .map_err(|e| RouteError::Handler(e.to_string()))
    }
}

#[async_trait]
impl Handler for GameService {
    async fn call(
        &self,
        session: Arc<dyn Session>,
        method: &str,
        body: Bytes,
    ) -> Result<Bytes, RouteError> {
        match method {
            "Hello" => self.hello(session.as_ref(), &body),
            other => Err(RouteError::UnknownRoute(format!("{}.{}", GAME_SERVICE, other))),
        }
    }
}
