//! ng-protocol: Wire protocol for nanogate
//!
//! This crate defines the binary packet and message formats spoken by
//! clients, plus the frames gate and backend nodes exchange when a request
//! is forwarded between them.

pub mod cluster;
pub mod codec;
pub mod error;
pub mod message;
pub mod packet;
pub mod session;

pub use cluster::{ClusterMessage, RemoteFailure};
pub use codec::{ClusterCodec, PacketCodec};
pub use error::ProtocolError;
pub use message::{decode_message, encode_message, Message, MessageKind, MAX_ROUTE_LEN};
pub use packet::{decode_packet, encode_packet, Packet, PacketType, HEADER_SIZE, MAX_BODY_SIZE};
pub use session::SessionId;
