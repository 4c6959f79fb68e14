//! Packet framing
//!
//! Every packet on a client connection uses a 4-byte header:
//! - packet_type: 1 byte (u8)
//! - body_length: 3 bytes (u24, big-endian, max 16MB - 1)
//!
//! followed by exactly `body_length` bytes of body.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Size of the packet header in bytes
pub const HEADER_SIZE: usize = 4;

/// Maximum body size (16MB - 1, limited by 24-bit length field)
pub const MAX_BODY_SIZE: usize = 0x00FF_FFFF;

/// Packet type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Client opens the session; server answers with its own handshake
    Handshake = 0x00,
    /// Client confirms the handshake response
    HandshakeAck = 0x01,
    /// Liveness ping, sent by either side
    Heartbeat = 0x02,
    /// Server tells the client it is being disconnected
    Kick = 0x03,
    /// Carries one encoded message
    Data = 0x04,
}

impl PacketType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Handshake),
            0x01 => Some(Self::HandshakeAck),
            0x02 => Some(Self::Heartbeat),
            0x03 => Some(Self::Kick),
            0x04 => Some(Self::Data),
            _ => None,
        }
    }
}

/// A single transport frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet type
    pub kind: PacketType,
    /// Packet body
    pub body: Bytes,
}

impl Packet {
    /// Create a new packet
    pub fn new(kind: PacketType, body: impl Into<Bytes>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    /// Create a packet with an empty body
    pub fn empty(kind: PacketType) -> Self {
        Self {
            kind,
            body: Bytes::new(),
        }
    }

    /// Append the wire form of this packet to `dst`
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = self.body.len();
        if len > MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: len,
                max: MAX_BODY_SIZE,
            });
        }

        dst.reserve(HEADER_SIZE + len);
        dst.put_u8(self.kind.as_u8());
        // body_length: 3 bytes big-endian (24-bit)
        dst.put_u8((len >> 16) as u8);
        dst.put_u16(len as u16);
        dst.extend_from_slice(&self.body);
        Ok(())
    }
}

/// Encode a packet into a freshly allocated buffer
pub fn encode_packet(kind: PacketType, body: &[u8]) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len());
    Packet::new(kind, Bytes::copy_from_slice(body)).encode_into(&mut buf)?;
    Ok(buf.freeze())
}

/// Decode exactly one packet from the front of `src`.
///
/// Returns the packet type, its body and the number of bytes consumed.
pub fn decode_packet(src: &[u8]) -> Result<(PacketType, Bytes, usize), ProtocolError> {
    let (kind, len) = peek_header(src)?.ok_or(ProtocolError::MalformedPacket(
        "fewer than 4 header bytes",
    ))?;

    let end = HEADER_SIZE + len;
    if src.len() < end {
        return Err(ProtocolError::MalformedPacket(
            "declared length exceeds remaining bytes",
        ));
    }

    Ok((kind, Bytes::copy_from_slice(&src[HEADER_SIZE..end]), end))
}

/// Parse the header at the front of `src` without consuming anything.
///
/// Returns `Ok(None)` if fewer than `HEADER_SIZE` bytes are available.
pub(crate) fn peek_header(src: &[u8]) -> Result<Option<(PacketType, usize)>, ProtocolError> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let kind = PacketType::from_u8(src[0])
        .ok_or(ProtocolError::MalformedPacket("unknown packet type"))?;
    let len = ((src[1] as usize) << 16) | ((src[2] as usize) << 8) | src[3] as usize;

    Ok(Some((kind, len)))
}
