//! Protocol error types

use thiserror::Error;

/// Errors that can occur while framing or parsing wire data
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Packet framing is corrupt or truncated
    #[error("Malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// Message layout is corrupt or truncated
    #[error("Malformed message: {0}")]
    MalformedMessage(&'static str),

    /// Body does not fit in the 24-bit length field
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Route does not fit in the one-byte length field
    #[error("Route too long: {0} bytes exceeds maximum of 255 bytes")]
    RouteTooLong(usize),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
