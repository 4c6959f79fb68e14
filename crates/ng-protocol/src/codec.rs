//! Tokio codecs for packet streams

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::cluster::ClusterMessage;
use crate::error::ProtocolError;
use crate::packet::{peek_header, Packet, PacketType, HEADER_SIZE};

/// Codec for client connections: buffers a byte stream into whole packets
#[derive(Debug, Default)]
pub struct PacketCodec {
    /// Header of the packet currently being received (if any)
    pending_header: Option<(PacketType, usize)>,
}

impl PacketCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (kind, len) = match self.pending_header.take() {
            Some(h) => h,
            None => match peek_header(src)? {
                Some(h) => {
                    let _ = src.split_to(HEADER_SIZE);
                    h
                }
                None => return Ok(None), // Need more data
            },
        };

        if src.len() < len {
            // Save header and wait for more data
            src.reserve(len - src.len());
            self.pending_header = Some((kind, len));
            return Ok(None);
        }

        let body = src.split_to(len).freeze();
        Ok(Some(Packet { kind, body }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        packet.encode_into(dst)
    }
}

/// Codec for node-to-node links: bincode-encoded `ClusterMessage`s carried
/// in Data packets
#[derive(Debug, Default)]
pub struct ClusterCodec {
    inner: PacketCodec,
}

impl ClusterCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            inner: PacketCodec::new(),
        }
    }
}

impl Decoder for ClusterCodec {
    type Item = ClusterMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(packet) = self.inner.decode(src)? else {
                return Ok(None);
            };

            match packet.kind {
                PacketType::Data => {
                    let message: ClusterMessage = bincode::deserialize(&packet.body)?;
                    return Ok(Some(message));
                }
                PacketType::Heartbeat => {
                    tracing::trace!("Cluster heartbeat received");
                }
                _ => {
                    return Err(ProtocolError::MalformedPacket(
                        "unexpected packet type on cluster link",
                    ))
                }
            }
        }
    }
}

impl Encoder<ClusterMessage> for ClusterCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: ClusterMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&message)?;
        self.inner
            .encode(Packet::new(PacketType::Data, Bytes::from(payload)), dst)
    }
}
