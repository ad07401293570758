//! Typed view of inbound HzMod packets.
//!
//! [`HzMessage::parse`] turns a framed [`HzPacket`] into the message it
//! carries. Parsing is pure; the session decides what to do with each
//! message (see [`crate::network::hz`]).

use bytes::Bytes;

use crate::codec::hz::{
    HzPacket, PACKET_CONFIG, PACKET_DEBUG, PACKET_ERROR, PACKET_JPEG, PACKET_MODE_SET, PACKET_TGA,
};
use crate::error::NtrError;

/// Minimum size of a TGA image: the fixed TGA file header.
pub const TGA_HEADER_SIZE: usize = 18;

/// Bytes preceding the encoded image in a JPEG packet.
pub const JPEG_SUBHEADER_SIZE: usize = 8;

/// Display mode of one screen as announced by a mode-set packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenMode {
    /// Raw framebuffer mode word.
    pub mode: u32,
    /// Size of the framebuffer in bytes.
    pub byte_size: u32,
}

impl ScreenMode {
    /// Pixel format bits of the mode word.
    pub fn pixel_format(&self) -> u32 {
        self.mode & 7
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HzMessage {
    /// The device gave up; the session must be torn down.
    Error { code: u8, message: String },
    ModeSet { top: ScreenMode, bottom: ScreenMode },
    /// A full-screen TGA bitmap (header included).
    Tga(Bytes),
    /// An encoded JPEG image with its sub-header stripped.
    Jpeg(Bytes),
    /// Acknowledgement of a configuration packet.
    ConfigAck(Bytes),
    /// Debug words emitted by the firmware.
    Debug(Vec<u32>),
    Unknown { id: u8, payload: Bytes },
}

impl HzMessage {
    pub fn parse(packet: HzPacket) -> Result<Self, NtrError> {
        let HzPacket { id, payload } = packet;
        match id {
            PACKET_ERROR => {
                let code = payload.first().copied().unwrap_or(0);
                let text = payload.get(1..).unwrap_or_default();
                Ok(HzMessage::Error {
                    code,
                    message: String::from_utf8_lossy(text).trim_end_matches('\0').to_string(),
                })
            }
            PACKET_MODE_SET => {
                if payload.len() < 16 {
                    return Err(NtrError::truncated("mode-set packet", 16, payload.len()));
                }
                let w = le_words(&payload);
                Ok(HzMessage::ModeSet {
                    top: ScreenMode {
                        mode: w[0],
                        byte_size: w[1],
                    },
                    bottom: ScreenMode {
                        mode: w[2],
                        byte_size: w[3],
                    },
                })
            }
            PACKET_TGA => {
                if payload.len() < TGA_HEADER_SIZE {
                    return Err(NtrError::truncated("TGA image", TGA_HEADER_SIZE, payload.len()));
                }
                Ok(HzMessage::Tga(payload))
            }
            PACKET_JPEG => {
                if payload.len() < JPEG_SUBHEADER_SIZE {
                    return Err(NtrError::truncated(
                        "JPEG packet",
                        JPEG_SUBHEADER_SIZE,
                        payload.len(),
                    ));
                }
                Ok(HzMessage::Jpeg(payload.slice(JPEG_SUBHEADER_SIZE..)))
            }
            PACKET_CONFIG => Ok(HzMessage::ConfigAck(payload)),
            PACKET_DEBUG => Ok(HzMessage::Debug(le_words(&payload))),
            id => Ok(HzMessage::Unknown { id, payload }),
        }
    }
}

/// Little-endian u32 words; a trailing partial word is ignored.
fn le_words(data: &[u8]) -> Vec<u32> {
    data.chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_packet_carries_code_and_text() {
        let msg = HzMessage::parse(HzPacket::new(PACKET_ERROR, b"\x02bad mode\0".to_vec())).unwrap();
        assert_eq!(
            msg,
            HzMessage::Error {
                code: 2,
                message: "bad mode".into()
            }
        );
    }

    #[test]
    fn empty_error_packet() {
        let msg = HzMessage::parse(HzPacket::new(PACKET_ERROR, Vec::new())).unwrap();
        assert!(matches!(msg, HzMessage::Error { code: 0, .. }));
    }

    #[test]
    fn mode_set_words() {
        let mut payload = Vec::new();
        for w in [0x0000_0301u32, 288_000, 0x0000_0302, 230_400] {
            payload.extend_from_slice(&w.to_le_bytes());
        }
        let HzMessage::ModeSet { top, bottom } =
            HzMessage::parse(HzPacket::new(PACKET_MODE_SET, payload)).unwrap()
        else {
            panic!("expected mode-set");
        };
        assert_eq!(top.pixel_format(), 1);
        assert_eq!(top.byte_size, 288_000);
        assert_eq!(bottom.pixel_format(), 2);
        assert_eq!(bottom.byte_size, 230_400);
    }

    #[test]
    fn jpeg_strips_subheader() {
        let mut payload = vec![0u8; 8];
        payload.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let msg = HzMessage::parse(HzPacket::new(PACKET_JPEG, payload)).unwrap();
        assert_eq!(msg, HzMessage::Jpeg(Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9])));
    }

    #[test]
    fn short_tga_is_rejected() {
        assert!(matches!(
            HzMessage::parse(HzPacket::new(PACKET_TGA, vec![0u8; 17])),
            Err(NtrError::Truncated { expected: 18, .. })
        ));
    }

    #[test]
    fn debug_words() {
        let msg =
            HzMessage::parse(HzPacket::new(PACKET_DEBUG, vec![1, 0, 0, 0, 0xEF, 0xBE, 0xAD, 0xDE, 7]))
                .unwrap();
        assert_eq!(msg, HzMessage::Debug(vec![1, 0xDEADBEEF]));
    }

    #[test]
    fn unknown_id_is_preserved() {
        let msg = HzMessage::parse(HzPacket::new(0x42, vec![1])).unwrap();
        assert!(matches!(msg, HzMessage::Unknown { id: 0x42, .. }));
    }
}
