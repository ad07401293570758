//! `tokio_util` codecs for the two TCP protocols.
//!
//! - [`ControlCodec`] frames the command port: fixed 84-byte headers,
//!   each optionally followed by a bulk payload of `declared_length`
//!   bytes.
//! - [`hz::HzCodec`] frames the HzMod `id | u24 length | payload`
//!   sub-protocol.

pub mod hz;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error::NtrError;
use crate::header::{ControlPacket, HEADER_SIZE};

pub use hz::{HzCodec, HzPacket, HzStreamDecoder};

/// Upper bound on a bulk response. The device only sends text tables
/// (process / thread lists, memory layouts) this way.
pub const MAX_BULK_SIZE: usize = 16 * 1024 * 1024;

/// One unit read off the command port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// A validated control packet header.
    Packet(ControlPacket),
    /// The bulk payload announced by the preceding header.
    Bulk(Bytes),
}

/// A packet queued for writing, plus the raw bytes that follow it on
/// the wire (only ever present for `WriteSave`).
#[derive(Debug, Clone)]
pub struct OutgoingCommand {
    pub packet: ControlPacket,
    pub data: Option<Bytes>,
}

impl From<ControlPacket> for OutgoingCommand {
    fn from(packet: ControlPacket) -> Self {
        Self { packet, data: None }
    }
}

/// Stream codec for the command port.
///
/// Holds the number of bulk bytes still owed by the last header; while
/// that is non-zero, incoming bytes belong to the payload rather than
/// to a new header.
#[derive(Debug, Default)]
pub struct ControlCodec {
    pending_bulk: usize,
}

impl ControlCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of bulk payload still expected.
    pub fn pending_bulk(&self) -> usize {
        self.pending_bulk
    }
}

impl Decoder for ControlCodec {
    type Item = ControlFrame;
    type Error = NtrError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.pending_bulk > 0 {
            if src.len() < self.pending_bulk {
                return Ok(None);
            }
            let bulk = src.split_to(self.pending_bulk).freeze();
            self.pending_bulk = 0;
            return Ok(Some(ControlFrame::Bulk(bulk)));
        }

        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        match ControlPacket::from_bytes(&src[..HEADER_SIZE]) {
            Ok(packet) => {
                src.advance(HEADER_SIZE);
                let declared = packet.declared_length as usize;
                if declared > MAX_BULK_SIZE {
                    return Err(NtrError::ProtocolViolation(
                        "bulk payload exceeds 16 MiB",
                    ));
                }
                self.pending_bulk = declared;
                Ok(Some(ControlFrame::Packet(packet)))
            }
            Err(NtrError::InvalidMagic { found }) => {
                // No way to resynchronise inside a stream: drop what is
                // buffered and start over with the next read.
                warn!(
                    "bad magic {found:#010x} on control stream, discarding {} bytes",
                    src.len()
                );
                src.clear();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl Encoder<OutgoingCommand> for ControlCodec {
    type Error = NtrError;

    fn encode(&mut self, item: OutgoingCommand, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let extra = item.data.as_ref().map_or(0, Bytes::len);
        dst.reserve(HEADER_SIZE + extra);
        dst.extend_from_slice(&item.packet.to_bytes());
        if let Some(data) = item.data {
            dst.extend_from_slice(&data);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Command;

    fn header(command: Command, declared: u32) -> Vec<u8> {
        ControlPacket::new(1000, command, &[], declared)
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    #[test]
    fn waits_for_full_header() {
        let mut codec = ControlCodec::new();
        let bytes = header(Command::Hello, 0);
        let mut buf = BytesMut::from(&bytes[..50]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[50..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(frame, ControlFrame::Packet(p) if p.command_id == 2));
        assert!(buf.is_empty());
    }

    #[test]
    fn bulk_payload_follows_header() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::from(&header(Command::PidList, 11)[..]);
        buf.extend_from_slice(b"pid: 0x0");

        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(ControlFrame::Packet(_))
        ));
        assert_eq!(codec.pending_bulk(), 11);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"01a");
        let bulk = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(bulk, ControlFrame::Bulk(Bytes::from_static(b"pid: 0x001a")));
        assert_eq!(codec.pending_bulk(), 0);
    }

    #[test]
    fn bulk_then_next_header_in_one_read() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&header(Command::PidList, 3));
        buf.extend_from_slice(b"abc");
        buf.extend_from_slice(&header(Command::Empty, 0));

        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(ControlFrame::Packet(_))));
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(ControlFrame::Bulk(b)) if &b[..] == b"abc"));
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(ControlFrame::Packet(p)) if p.command_id == 0));
        assert!(buf.is_empty());
    }

    #[test]
    fn bad_magic_discards_buffer() {
        let mut codec = ControlCodec::new();
        let mut bytes = header(Command::Hello, 0);
        bytes[3] = 0xAA;
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        // The stream recovers on the next well-formed header.
        buf.extend_from_slice(&header(Command::Reload, 0));
        assert!(matches!(codec.decode(&mut buf).unwrap(), Some(ControlFrame::Packet(p)) if p.command_id == 3));
    }

    #[test]
    fn oversized_bulk_is_rejected() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::from(&header(Command::PidList, u32::MAX)[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(NtrError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn encode_appends_raw_data() {
        let mut codec = ControlCodec::new();
        let packet = ControlPacket::new(1000, Command::WriteSave, &[], 4).unwrap();
        let mut dst = BytesMut::new();
        codec
            .encode(
                OutgoingCommand {
                    packet,
                    data: Some(Bytes::from_static(&[1, 2, 3, 4])),
                },
                &mut dst,
            )
            .unwrap();
        assert_eq!(dst.len(), HEADER_SIZE + 4);
        assert_eq!(&dst[HEADER_SIZE..], &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn framed_read_over_fragmented_socket() {
        use futures::StreamExt;
        use tokio_util::codec::FramedRead;

        let hdr = header(Command::PidList, 6);
        let io = tokio_test::io::Builder::new()
            .read(&hdr[..10])
            .read(&hdr[10..])
            .read(b"pid")
            .read(b": 1")
            .build();
        let mut frames = FramedRead::new(io, ControlCodec::new());

        assert!(matches!(frames.next().await, Some(Ok(ControlFrame::Packet(p))) if p.declared_length == 6));
        assert!(matches!(frames.next().await, Some(Ok(ControlFrame::Bulk(b))) if &b[..] == b"pid: 1"));
        assert!(frames.next().await.is_none());
    }
}
