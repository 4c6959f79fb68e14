//! Message codec
//!
//! A message is the application-level unit carried in the body of a
//! `Data` packet:
//!
//! ```text
//! byte 0       : flag; kind = (flag >> 1) & 0x07
//! [varint id]  : Request and Response only
//! [route]      : Request, Notify and Push only; 1 length byte + bytes
//! [payload]    : remaining bytes, opaque
//! ```
//!
//! Only the kind bits of the flag byte are defined. Every other bit is
//! reserved and must be zero.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Maximum route length (stored in a single byte)
pub const MAX_ROUTE_LEN: usize = 255;

/// Longest varint accepted when decoding (ceil(64 / 7))
pub const MAX_VARINT_LEN: usize = 10;

const KIND_MASK: u8 = 0x07;
const KIND_SHIFT: u8 = 1;
const RESERVED_MASK: u8 = !(KIND_MASK << KIND_SHIFT);

/// Message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// Client call expecting exactly one Response
    Request = 0x00,
    /// One-way client call
    Notify = 0x01,
    /// Reply to a Request, correlated by id
    Response = 0x02,
    /// Unsolicited server-to-client message
    Push = 0x03,
}

impl MessageKind {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Request),
            0x01 => Some(Self::Notify),
            0x02 => Some(Self::Response),
            0x03 => Some(Self::Push),
            _ => None,
        }
    }

    /// Whether messages of this kind carry a correlation id
    pub fn has_id(&self) -> bool {
        matches!(self, Self::Request | Self::Response)
    }

    /// Whether messages of this kind carry a route
    pub fn has_route(&self) -> bool {
        !matches!(self, Self::Response)
    }
}

/// An application-level message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message kind
    pub kind: MessageKind,
    /// Correlation id, present for Request and Response
    pub id: Option<u64>,
    /// `"Service.Method"` route, present for Request, Notify and Push
    pub route: Option<String>,
    /// Opaque payload
    pub body: Bytes,
}

impl Message {
    /// Build a Request
    pub fn request(id: u64, route: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Request,
            id: Some(id),
            route: Some(route.into()),
            body: body.into(),
        }
    }

    /// Build a Notify
    pub fn notify(route: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Notify,
            id: None,
            route: Some(route.into()),
            body: body.into(),
        }
    }

    /// Build a Response
    pub fn response(id: u64, body: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Response,
            id: Some(id),
            route: None,
            body: body.into(),
        }
    }

    /// Build a Push
    pub fn push(route: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Push,
            id: None,
            route: Some(route.into()),
            body: body.into(),
        }
    }

    /// Route as a string slice, empty when absent
    pub fn route_str(&self) -> &str {
        self.route.as_deref().unwrap_or("")
    }

    /// Encode this message
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        encode_message(self)
    }

    /// Decode a message from a Data packet body
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        decode_message(src)
    }
}

/// Encode a message into its wire form
pub fn encode_message(msg: &Message) -> Result<Bytes, ProtocolError> {
    if msg.kind.has_id() != msg.id.is_some() {
        return Err(ProtocolError::MalformedMessage(
            "id presence does not match message kind",
        ));
    }
    if msg.kind.has_route() != msg.route.is_some() {
        return Err(ProtocolError::MalformedMessage(
            "route presence does not match message kind",
        ));
    }

    let route = msg.route.as_deref().unwrap_or("");
    if route.len() > MAX_ROUTE_LEN {
        return Err(ProtocolError::RouteTooLong(route.len()));
    }

    let mut buf = BytesMut::with_capacity(1 + MAX_VARINT_LEN + 1 + route.len() + msg.body.len());
    buf.put_u8(msg.kind.as_u8() << KIND_SHIFT);

    if let Some(id) = msg.id {
        encode_varint(id, &mut buf);
    }

    if msg.route.is_some() {
        buf.put_u8(route.len() as u8);
        buf.extend_from_slice(route.as_bytes());
    }

    buf.extend_from_slice(&msg.body);
    Ok(buf.freeze())
}

/// Decode a message from its wire form
pub fn decode_message(src: &[u8]) -> Result<Message, ProtocolError> {
    let (&flag, mut rest) = src
        .split_first()
        .ok_or(ProtocolError::MalformedMessage("empty message"))?;

    if flag & RESERVED_MASK != 0 {
        return Err(ProtocolError::MalformedMessage("reserved flag bits set"));
    }
    let kind = MessageKind::from_u8((flag >> KIND_SHIFT) & KIND_MASK)
        .ok_or(ProtocolError::MalformedMessage("unknown message kind"))?;

    let id = if kind.has_id() {
        let (id, used) = decode_varint(rest)?;
        rest = &rest[used..];
        Some(id)
    } else {
        None
    };

    let route = if kind.has_route() {
        let (&len, after) = rest
            .split_first()
            .ok_or(ProtocolError::MalformedMessage("missing route length"))?;
        let len = len as usize;
        if after.len() < len {
            return Err(ProtocolError::MalformedMessage("truncated route"));
        }
        let route = std::str::from_utf8(&after[..len])
            .map_err(|_| ProtocolError::MalformedMessage("route is not valid UTF-8"))?;
        rest = &after[len..];
        Some(route.to_owned())
    } else {
        None
    };

    Ok(Message {
        kind,
        id,
        route,
        body: Bytes::copy_from_slice(rest),
    })
}

/// Append `value` as a minimal little-endian base-128 varint
pub fn encode_varint(mut value: u64, dst: &mut BytesMut) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            dst.put_u8(byte);
            return;
        }
        dst.put_u8(byte | 0x80);
    }
}

/// Decode a varint from the front of `src`, returning the value and the
/// number of bytes read.
pub fn decode_varint(src: &[u8]) -> Result<(u64, usize), ProtocolError> {
    let mut value = 0u64;

    for (i, &byte) in src.iter().take(MAX_VARINT_LEN).enumerate() {
        let bits = (byte & 0x7F) as u64;
        let shift = 7 * i as u32;

        // The tenth group only has room for the top bit of a u64
        if i == MAX_VARINT_LEN - 1 && bits > 1 {
            return Err(ProtocolError::MalformedMessage("varint overflows 64 bits"));
        }
        value |= bits << shift;

        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    if src.len() >= MAX_VARINT_LEN {
        Err(ProtocolError::MalformedMessage("varint longer than 10 bytes"))
    } else {
        Err(ProtocolError::MalformedMessage("truncated varint"))
    }
}

/// Number of bytes `value` occupies as a varint
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let encoded = encode_message(&msg).unwrap();
        let decoded = decode_message(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_all_kinds_roundtrip() {
        roundtrip(Message::request(1, "GameService.Hello", &b"{\"name\":\"cli\"}"[..]));
        roundtrip(Message::notify("Room.Chat", &b"hi"[..]));
        roundtrip(Message::response(u64::MAX, &b"ok"[..]));
        roundtrip(Message::push("Room.OnJoin", Bytes::new()));
        roundtrip(Message::request(0, "", Bytes::new()));
    }

    #[test]
    fn test_request_layout() {
        let msg = Message::request(300, "A.b", &b"xy"[..]);
        let encoded = encode_message(&msg).unwrap();
        // flag, varint(300) = [0xAC, 0x02], route len, route, body
        assert_eq!(
            encoded.as_ref(),
            &[0x00, 0xAC, 0x02, 0x03, b'A', b'.', b'b', b'x', b'y']
        );
    }

    #[test]
    fn test_flag_byte_per_kind() {
        let cases = [
            (Message::request(1, "a.b", Bytes::new()), 0x00),
            (Message::notify("a.b", Bytes::new()), 0x02),
            (Message::response(1, Bytes::new()), 0x04),
            (Message::push("a.b", Bytes::new()), 0x06),
        ];
        for (msg, flag) in cases {
            assert_eq!(encode_message(&msg).unwrap()[0], flag);
        }
    }

    #[test]
    fn test_varint_minimal() {
        let samples = [
            (0u64, 1usize),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 3),
            ((1 << 35) - 1, 5),
            (1 << 56, 9),
            (u64::MAX >> 1, 9),
            (u64::MAX, 10),
        ];
        for (value, len) in samples {
            let mut buf = BytesMut::new();
            encode_varint(value, &mut buf);
            assert_eq!(buf.len(), len, "value {}", value);
            assert_eq!(varint_len(value), len);
            if value > 0 {
                assert_ne!(buf[len - 1], 0, "trailing zero group for {}", value);
            }
            assert_eq!(decode_varint(&buf).unwrap(), (value, len));
        }
    }

    #[test]
    fn test_varint_every_bit_width() {
        for shift in 0..64 {
            let value = 1u64 << shift;
            let mut buf = BytesMut::new();
            encode_varint(value, &mut buf);
            assert_eq!(buf.len(), shift / 7 + 1);
            assert_eq!(decode_varint(&buf).unwrap().0, value);
        }
    }

    #[test]
    fn test_varint_stops_at_last_group() {
        let (value, used) = decode_varint(&[0x81, 0x01, 0xFF, 0xFF]).unwrap();
        assert_eq!(value, 129);
        assert_eq!(used, 2);
    }

    #[test]
    fn test_varint_too_long() {
        let bytes = [0x80u8; 11];
        assert!(matches!(
            decode_varint(&bytes),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_varint_overflow() {
        let mut bytes = [0xFFu8; 10];
        bytes[9] = 0x02;
        assert!(matches!(
            decode_varint(&bytes),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_varint_truncated() {
        assert!(matches!(
            decode_varint(&[0x80, 0x80]),
            Err(ProtocolError::MalformedMessage(_))
        ));
        assert!(decode_varint(&[]).is_err());
    }

    #[test]
    fn test_route_boundary() {
        let route = "r".repeat(MAX_ROUTE_LEN);
        roundtrip(Message::notify(route.clone(), &b"x"[..]));

        let too_long = Message::notify("r".repeat(MAX_ROUTE_LEN + 1), Bytes::new());
        assert!(matches!(
            encode_message(&too_long),
            Err(ProtocolError::RouteTooLong(256))
        ));
    }

    #[test]
    fn test_truncated_route() {
        // Notify claiming a 5-byte route with only 2 bytes left
        let result = decode_message(&[0x02, 0x05, b'a', b'b']);
        assert!(matches!(result, Err(ProtocolError::MalformedMessage(_))));
    }

    #[test]
    fn test_missing_route_length() {
        // Request with an id and nothing after it
        let result = decode_message(&[0x00, 0x01]);
        assert!(matches!(result, Err(ProtocolError::MalformedMessage(_))));
    }

    #[test]
    fn test_empty_message() {
        assert!(matches!(
            decode_message(&[]),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_reserved_bits_rejected() {
        assert!(matches!(
            decode_message(&[0x01, 0x01, 0x00]),
            Err(ProtocolError::MalformedMessage(_))
        ));
        assert!(matches!(
            decode_message(&[0x22, 0x00]),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        // kind = 4
        assert!(matches!(
            decode_message(&[0x08]),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_route() {
        let result = decode_message(&[0x02, 0x02, 0xC3, 0x28]);
        assert!(matches!(result, Err(ProtocolError::MalformedMessage(_))));
    }

    #[test]
    fn test_presence_invariants_enforced() {
        let mut msg = Message::response(1, Bytes::new());
        msg.route = Some("a.b".into());
        assert!(matches!(
            encode_message(&msg),
            Err(ProtocolError::MalformedMessage(_))
        ));

        let mut msg = Message::notify("a.b", Bytes::new());
        msg.id = Some(3);
        assert!(matches!(
            encode_message(&msg),
            Err(ProtocolError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_response_body_is_remainder() {
        let decoded = decode_message(&[0x04, 0x07, 1, 2, 3]).unwrap();
        assert_eq!(decoded.kind, MessageKind::Response);
        assert_eq!(decoded.id, Some(7));
        assert_eq!(decoded.route, None);
        assert_eq!(decoded.body.as_ref(), &[1, 2, 3]);
    }
}
