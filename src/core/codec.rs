//! Tokio codec for driving a UDP socket as a `Packet` sink/stream.
//!
//! Each datagram is one frame. A decode failure consumes the whole datagram,
//! so a `UdpFramed` stream yields the error once and moves on to the next
//! datagram.

use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Default, Clone, Copy)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.is_empty() {
            return Ok(None);
        }
        let datagram = src.split();
        Packet::from_bytes(&datagram).map(Some)
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&item.to_bytes());
        Ok(())
    }
}
