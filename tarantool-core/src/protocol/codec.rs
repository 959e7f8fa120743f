//! Codec implementation for encoding/decoding framed packets.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::constants::*;
use super::packet::Packet;
use crate::error::{Result, TarantoolError};

/// Default upper bound for a single frame payload.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Codec for framed packets.
///
/// Implements the `tokio_util::codec::{Encoder, Decoder}` traits for use
/// with tokio's framed I/O. The decoder reads the 5-byte prefix, waits for
/// the full payload and then decodes header and body.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_frame_size: usize,
}

impl PacketCodec {
    /// Creates a codec with the default frame size limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a codec rejecting frames larger than `max_frame_size`.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Returns the configured frame size limit.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = TarantoolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        item.encode(dst)
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = TarantoolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < FRAME_PREFIX_SIZE {
            return Ok(None);
        }

        if src[0] != FRAME_MARKER {
            return Err(TarantoolError::Protocol(format!(
                "invalid frame marker 0x{:02x}",
                src[0]
            )));
        }

        let payload_len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if payload_len > self.max_frame_size {
            return Err(TarantoolError::Protocol(format!(
                "frame of {} bytes exceeds the limit of {} bytes",
                payload_len, self.max_frame_size
            )));
        }

        let total = FRAME_PREFIX_SIZE + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(FRAME_PREFIX_SIZE);
        let payload = src.split_to(payload_len);
        Packet::decode_payload(&payload).map(Some)
    }
}
