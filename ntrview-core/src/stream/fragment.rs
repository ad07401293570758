//! UDP fragment header.
//!
//! ## Wire format
//!
//! ```text
//! frame_id:     u8  (1)
//! screen_info:  u8  (1)  low nibble = screen id, 0x10 = end of frame
//! reserved:     u8  (1)
//! index:        u8  (1)  position of this fragment within the frame
//! payload:      [u8]     image bytes
//! ```

use bytes::Bytes;

use crate::error::NtrError;
use crate::flags::FragmentFlags;
use crate::protocol::screen::ScreenId;

/// Per-datagram header size.
pub const FRAGMENT_HEADER_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub frame_id: u8,
    pub screen: ScreenId,
    pub flags: FragmentFlags,
    pub index: u8,
}

impl FragmentHeader {
    pub fn is_end_of_frame(&self) -> bool {
        self.flags.contains(FragmentFlags::END_OF_FRAME)
    }

    pub fn encode(&self) -> [u8; FRAGMENT_HEADER_SIZE] {
        [
            self.frame_id,
            self.screen.raw() | self.flags.bits(),
            0,
            self.index,
        ]
    }

    pub fn decode(data: &[u8]) -> Result<Self, NtrError> {
        if data.len() < FRAGMENT_HEADER_SIZE {
            return Err(NtrError::truncated(
                "fragment header",
                FRAGMENT_HEADER_SIZE,
                data.len(),
            ));
        }
        Ok(Self {
            frame_id: data[0],
            screen: ScreenId::new(data[1]),
            flags: FragmentFlags::from_screen_info(data[1]),
            index: data[3],
        })
    }
}

/// A parsed datagram: header plus the image bytes it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub payload: Bytes,
}

impl Fragment {
    /// Split a datagram into header and payload without copying.
    pub fn parse(datagram: Bytes) -> Result<Self, NtrError> {
        let header = FragmentHeader::decode(&datagram)?;
        Ok(Self {
            header,
            payload: datagram.slice(FRAGMENT_HEADER_SIZE..),
        })
    }

    /// Build the wire form of a fragment (used by test senders).
    pub fn to_datagram(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAGMENT_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_splits_screen_info() {
        let hdr = FragmentHeader::decode(&[7, 0x11, 0xEE, 2]).unwrap();
        assert_eq!(hdr.frame_id, 7);
        assert_eq!(hdr.screen, ScreenId::TOP);
        assert!(hdr.is_end_of_frame());
        assert_eq!(hdr.index, 2);

        let hdr = FragmentHeader::decode(&[7, 0x00, 0, 0]).unwrap();
        assert_eq!(hdr.screen, ScreenId::BOTTOM);
        assert!(!hdr.is_end_of_frame());
    }

    #[test]
    fn short_datagram_is_rejected() {
        assert!(matches!(
            Fragment::parse(Bytes::from_static(&[1, 2, 3])),
            Err(NtrError::Truncated { actual: 3, .. })
        ));
    }

    #[test]
    fn payload_excludes_header() {
        let frag = Fragment::parse(Bytes::from_static(&[5, 0x10, 0, 0, 0xFF, 0xD9])).unwrap();
        assert_eq!(&frag.payload[..], &[0xFF, 0xD9]);
        assert_eq!(frag.to_datagram(), vec![5, 0x10, 0, 0, 0xFF, 0xD9]);
    }
}
