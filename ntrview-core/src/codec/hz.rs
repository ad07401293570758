//! Framing for the HzMod TCP sub-protocol.
//!
//! ## Wire format
//!
//! ```text
//! id:      u8   (1)
//! length:  u24  (3, little-endian)
//! payload: [u8] (length bytes)
//! ```
//!
//! Large frames (a full TGA screen is ~300 KiB) arrive across many TCP
//! reads. Once the 4-byte header has been seen the packet's length is
//! fixed, and payload bytes are appended as they arrive.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::NtrError;

/// Size of the `id | u24 length` header.
pub const HZ_HEADER_SIZE: usize = 4;

/// Largest payload a 24-bit length can describe.
pub const HZ_MAX_PAYLOAD: usize = 0x00FF_FFFF;

// ── Packet ids ───────────────────────────────────────────────────

pub const PACKET_ERROR: u8 = 0x01;
pub const PACKET_MODE_SET: u8 = 0x02;
pub const PACKET_TGA: u8 = 0x03;
pub const PACKET_JPEG: u8 = 0x04;
pub const PACKET_CONFIG: u8 = 0x7E;
pub const PACKET_DEBUG: u8 = 0xFF;

// ── HzPacket ─────────────────────────────────────────────────────

/// One complete HzMod packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HzPacket {
    pub id: u8,
    pub payload: Bytes,
}

impl HzPacket {
    pub fn new(id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Append the wire encoding of this packet to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), NtrError> {
        let len = self.payload.len();
        if len > HZ_MAX_PAYLOAD {
            return Err(NtrError::ProtocolViolation(
                "HzMod payload does not fit a 24-bit length",
            ));
        }
        dst.reserve(HZ_HEADER_SIZE + len);
        dst.put_u8(self.id);
        dst.put_slice(&(len as u32).to_le_bytes()[..3]);
        dst.put_slice(&self.payload);
        Ok(())
    }
}

// ── HzCommand ────────────────────────────────────────────────────

/// Configuration commands the client sends to HzMod.
///
/// All of them travel as a [`PACKET_CONFIG`] packet whose payload is a
/// u32 sub-opcode followed by a single value byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HzCommand {
    /// Begin streaming frames.
    StartStream,
    /// JPEG quality, 1..=100.
    SetQuality(u8),
    /// CPU cycle cap, 0..=255 (0 = uncapped).
    SetCpuLimit(u8),
}

impl HzCommand {
    /// Quality command with the value clamped to `[1, 100]`.
    pub fn quality(quality: u32) -> Self {
        HzCommand::SetQuality(quality.clamp(1, 100) as u8)
    }

    /// CPU limit command with the value clamped to `[0, 255]`.
    pub fn cpu_limit(limit: u32) -> Self {
        HzCommand::SetCpuLimit(limit.min(255) as u8)
    }

    pub fn opcode(self) -> u32 {
        match self {
            HzCommand::StartStream => 0x00,
            HzCommand::SetQuality(_) => 0x03,
            HzCommand::SetCpuLimit(_) => 0xFF,
        }
    }

    pub fn value(self) -> u8 {
        match self {
            HzCommand::StartStream => 1,
            HzCommand::SetQuality(q) => q,
            HzCommand::SetCpuLimit(c) => c,
        }
    }

    pub fn to_packet(self) -> HzPacket {
        let mut payload = BytesMut::with_capacity(5);
        payload.put_u32_le(self.opcode());
        payload.put_u8(self.value());
        HzPacket::new(PACKET_CONFIG, payload.freeze())
    }
}

// ── HzCodec ──────────────────────────────────────────────────────

#[derive(Debug)]
struct PartialPacket {
    id: u8,
    declared: usize,
    payload: BytesMut,
}

impl PartialPacket {
    fn remaining(&self) -> usize {
        self.declared - self.payload.len()
    }
}

/// Stateful decoder / encoder for one HzMod connection.
#[derive(Debug, Default)]
pub struct HzCodec {
    current: Option<PartialPacket>,
}

impl HzCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` while a packet header has been read but its payload is
    /// still incomplete.
    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }
}

impl Decoder for HzCodec {
    type Item = HzPacket;
    type Error = NtrError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.current.is_none() {
            if src.len() < HZ_HEADER_SIZE {
                return Ok(None);
            }
            let id = src[0];
            let declared = u32::from_le_bytes([src[1], src[2], src[3], 0]) as usize;

            // Whole packet already buffered: hand it out without copying.
            if src.len() >= HZ_HEADER_SIZE + declared {
                let mut frame = src.split_to(HZ_HEADER_SIZE + declared);
                let payload = frame.split_off(HZ_HEADER_SIZE).freeze();
                return Ok(Some(HzPacket { id, payload }));
            }

            let _ = src.split_to(HZ_HEADER_SIZE);
            self.current = Some(PartialPacket {
                id,
                declared,
                payload: BytesMut::with_capacity(declared),
            });
        }

        let Some(partial) = self.current.as_mut() else {
            return Ok(None);
        };
        let take = partial.remaining().min(src.len());
        partial.payload.extend_from_slice(&src.split_to(take));

        if partial.remaining() > 0 {
            return Ok(None);
        }
        Ok(self.current.take().map(|p| HzPacket {
            id: p.id,
            payload: p.payload.freeze(),
        }))
    }
}

impl Encoder<HzCommand> for HzCodec {
    type Error = NtrError;

    fn encode(&mut self, item: HzCommand, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.to_packet().encode(dst)
    }
}

// ── HzStreamDecoder ──────────────────────────────────────────────

/// Push-style wrapper around [`HzCodec`] for callers that receive raw
/// byte chunks rather than owning an `AsyncRead`.
#[derive(Debug, Default)]
pub struct HzStreamDecoder {
    buffer: BytesMut,
    codec: HzCodec,
}

impl HzStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every packet that is now complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<HzPacket>, NtrError> {
        self.buffer.extend_from_slice(bytes);
        let mut packets = Vec::new();
        while let Some(packet) = self.codec.decode(&mut self.buffer)? {
            packets.push(packet);
        }
        Ok(packets)
    }

    /// Bytes buffered that do not yet form a header.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn in_progress(&self) -> bool {
        self.codec.in_progress()
    }
}
