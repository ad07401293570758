//! Frame reassembly from UDP fragments.
//!
//! Each screen has at most one frame in flight. Fragments are buffered
//! by index; when the end-of-frame fragment arrives its index tells us
//! how many fragments the frame had. Only an exact match produces a
//! frame; anything else is dropped whole, never delivered partially.
//!
//! ```text
//!  datagram ──► parse ──► supersede? ──► merge ──► end-of-frame? ──► validate ──► CompletedFrame
//! ```

use std::collections::{BTreeMap, HashMap};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::protocol::screen::ScreenId;
use crate::stream::fragment::Fragment;

/// JPEG end-of-image marker.
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

// ── CompletedFrame ───────────────────────────────────────────────

/// A whole encoded image for one screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFrame {
    pub screen: ScreenId,
    pub data: Bytes,
}

// ── PushOutcome ──────────────────────────────────────────────────

/// What a single datagram did to the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Buffered; the frame is still in flight.
    Pending,
    Completed(CompletedFrame),
    /// End-of-frame arrived with fragments missing; the frame was dropped.
    Incomplete {
        screen: ScreenId,
        frame_id: u8,
        expected: usize,
        received: usize,
    },
    /// All fragments arrived but the image failed validation.
    Rejected { screen: ScreenId, frame_id: u8 },
    /// The datagram was too short to carry a header.
    Malformed,
}

// ── FrameStats ───────────────────────────────────────────────────

/// Per-screen counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub completed: u64,
    pub bytes: u64,
    /// Dropped at end-of-frame because of missing fragments.
    pub incomplete: u64,
    /// Dropped because a newer frame started first.
    pub superseded: u64,
    pub rejected: u64,
}

// ── Accumulator ──────────────────────────────────────────────────

#[derive(Debug)]
struct Accumulator {
    frame_id: u8,
    /// Keyed by fragment index: iteration order is assembly order and a
    /// duplicate index replaces rather than adds.
    fragments: BTreeMap<u8, Bytes>,
}

impl Accumulator {
    fn new(frame_id: u8) -> Self {
        Self {
            frame_id,
            fragments: BTreeMap::new(),
        }
    }
}

fn merge(acc: &mut Accumulator, fragment: Fragment) {
    acc.fragments.insert(fragment.header.index, fragment.payload);
}

/// Concatenate the buffered fragments if their indices are exactly
/// `0..expected`. On failure returns how many of those indices arrived.
fn assemble(acc: &Accumulator, expected: usize) -> Result<Bytes, usize> {
    let received = acc
        .fragments
        .keys()
        .take_while(|&&index| (index as usize) < expected)
        .count();
    let last = acc.fragments.keys().next_back().map(|&index| index as usize);
    if received != expected || last != Some(expected - 1) {
        return Err(received);
    }
    let total = acc.fragments.values().map(Bytes::len).sum();
    let mut data = BytesMut::with_capacity(total);
    for payload in acc.fragments.values() {
        data.extend_from_slice(payload);
    }
    Ok(data.freeze())
}

fn has_jpeg_trailer(data: &[u8]) -> bool {
    data.ends_with(&JPEG_EOI)
}

// ── Reassembler ──────────────────────────────────────────────────

/// Reassembly options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblerConfig {
    /// Drop completed frames that do not end in a JPEG EOI marker.
    pub validate_jpeg_trailer: bool,
}

/// Owns the in-flight accumulator of every screen.
///
/// Not thread-safe by itself: the receive loop is the only writer.
#[derive(Debug, Default)]
pub struct Reassembler {
    config: ReassemblerConfig,
    in_flight: HashMap<ScreenId, Accumulator>,
    stats: BTreeMap<ScreenId, FrameStats>,
    malformed: u64,
}

impl Reassembler {
    pub fn new(config: ReassemblerConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Feed one raw datagram.
    pub fn push(&mut self, datagram: Bytes) -> PushOutcome {
        match Fragment::parse(datagram) {
            Ok(fragment) => self.accept(fragment),
            Err(e) => {
                self.malformed += 1;
                warn!("discarding datagram: {e}");
                PushOutcome::Malformed
            }
        }
    }

    /// Feed one parsed fragment.
    pub fn accept(&mut self, fragment: Fragment) -> PushOutcome {
        let header = fragment.header;
        let screen = header.screen;

        if let Some(acc) = self.in_flight.get(&screen) {
            if acc.frame_id != header.frame_id {
                debug!(
                    "{screen}: frame {} superseded by {} with {} fragments buffered",
                    acc.frame_id,
                    header.frame_id,
                    acc.fragments.len()
                );
                self.in_flight.remove(&screen);
                self.stats.entry(screen).or_default().superseded += 1;
            }
        }

        let acc = self
            .in_flight
            .entry(screen)
            .or_insert_with(|| Accumulator::new(header.frame_id));
        merge(acc, fragment);

        if !header.is_end_of_frame() {
            return PushOutcome::Pending;
        }

        let Some(acc) = self.in_flight.remove(&screen) else {
            return PushOutcome::Pending;
        };
        let expected = header.index as usize + 1;
        let stats = self.stats.entry(screen).or_default();

        match assemble(&acc, expected) {
            Err(received) => {
                warn!(
                    "{screen}: frame {} incomplete ({received}/{expected} fragments, {} buffered), dropped",
                    acc.frame_id,
                    acc.fragments.len()
                );
                stats.incomplete += 1;
                PushOutcome::Incomplete {
                    screen,
                    frame_id: acc.frame_id,
                    expected,
                    received,
                }
            }
            Ok(data) if self.config.validate_jpeg_trailer && !has_jpeg_trailer(&data) => {
                warn!(
                    "{screen}: frame {} is not a complete JPEG, dropped",
                    acc.frame_id
                );
                stats.rejected += 1;
                PushOutcome::Rejected {
                    screen,
                    frame_id: acc.frame_id,
                }
            }
            Ok(data) => {
                stats.completed += 1;
                stats.bytes += data.len() as u64;
                PushOutcome::Completed(CompletedFrame { screen, data })
            }
        }
    }

    /// Drop every in-flight accumulator.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    /// Number of screens with a frame in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Counters for `screen`.
    pub fn stats(&self, screen: ScreenId) -> FrameStats {
        self.stats.get(&screen).cloned().unwrap_or_default()
    }

    /// Datagrams too short to parse.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::FragmentFlags;
    use crate::stream::fragment::FragmentHeader;

    fn datagram(screen: u8, frame_id: u8, index: u8, end: bool, payload: &[u8]) -> Bytes {
        let flags = if end {
            FragmentFlags::END_OF_FRAME
        } else {
            FragmentFlags::empty()
        };
        let header = FragmentHeader {
            frame_id,
            screen: ScreenId::new(screen),
            flags,
            index,
        };
        let mut out = header.encode().to_vec();
        out.extend_from_slice(payload);
        Bytes::from(out)
    }

    /// Every permutation of `items`.
    fn permutations(items: &[u8]) -> Vec<Vec<u8>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn reorders_by_fragment_index() {
        let mut r = Reassembler::default();
        assert_eq!(r.push(datagram(1, 7, 1, false, b"BB")), PushOutcome::Pending);
        assert_eq!(r.push(datagram(1, 7, 0, false, b"AA")), PushOutcome::Pending);
        let out = r.push(datagram(1, 7, 2, true, b"CC"));
        assert_eq!(
            out,
            PushOutcome::Completed(CompletedFrame {
                screen: ScreenId::TOP,
                data: Bytes::from_static(b"AABBCC"),
            })
        );
        assert_eq!(r.in_flight(), 0);
        assert_eq!(r.stats(ScreenId::TOP).completed, 1);
        assert_eq!(r.stats(ScreenId::TOP).bytes, 6);
    }

    #[test]
    fn missing_fragment_drops_frame() {
        let mut r = Reassembler::default();
        r.push(datagram(0, 5, 0, false, b"A"));
        let out = r.push(datagram(0, 5, 2, true, b"C"));
        assert_eq!(
            out,
            PushOutcome::Incomplete {
                screen: ScreenId::BOTTOM,
                frame_id: 5,
                expected: 3,
                received: 2,
            }
        );
        assert_eq!(r.in_flight(), 0);
        assert_eq!(r.stats(ScreenId::BOTTOM).incomplete, 1);
    }

    #[test]
    fn stray_index_cannot_fill_a_gap() {
        let mut r = Reassembler::default();
        r.push(datagram(0, 5, 0, false, b"A"));
        r.push(datagram(0, 5, 5, false, b"X"));
        let out = r.push(datagram(0, 5, 2, true, b"C"));
        assert_eq!(
            out,
            PushOutcome::Incomplete {
                screen: ScreenId::BOTTOM,
                frame_id: 5,
                expected: 3,
                received: 2,
            }
        );
        assert_eq!(r.stats(ScreenId::BOTTOM).incomplete, 1);
        assert_eq!(r.stats(ScreenId::BOTTOM).completed, 0);
    }

    #[test]
    fn index_past_end_drops_frame() {
        let mut r = Reassembler::default();
        r.push(datagram(1, 8, 0, false, b"A"));
        r.push(datagram(1, 8, 1, false, b"B"));
        r.push(datagram(1, 8, 4, false, b"?"));
        let out = r.push(datagram(1, 8, 2, true, b"C"));
        assert!(matches!(out, PushOutcome::Incomplete { expected: 3, received: 3, .. }));
    }

    #[test]
    fn any_arrival_order_with_duplicates() {
        let canonical = b"f0f1f2f3".to_vec();
        for order in permutations(&[0, 1, 2]) {
            let mut r = Reassembler::default();
            for &i in &order {
                r.push(datagram(1, 9, i, false, format!("f{i}").as_bytes()));
            }
            // Duplicates of an already-buffered fragment.
            r.push(datagram(1, 9, order[0], false, format!("f{}", order[0]).as_bytes()));
            r.push(datagram(1, 9, 1, false, b"f1"));
            let out = r.push(datagram(1, 9, 3, true, b"f3"));
            let PushOutcome::Completed(frame) = out else {
                panic!("order {order:?} did not complete: {out:?}");
            };
            assert_eq!(frame.data.to_vec(), canonical, "order {order:?}");
        }
    }

    #[test]
    fn new_frame_supersedes_incomplete_one() {
        let mut r = Reassembler::default();
        r.push(datagram(1, 3, 0, false, b"old0"));
        r.push(datagram(1, 3, 1, false, b"old1"));

        // Frame 4 starts before frame 3 finished.
        r.push(datagram(1, 4, 0, false, b"new0"));
        assert_eq!(r.stats(ScreenId::TOP).superseded, 1);

        let out = r.push(datagram(1, 4, 1, true, b"new1"));
        let PushOutcome::Completed(frame) = out else {
            panic!("frame 4 should complete: {out:?}");
        };
        assert_eq!(&frame.data[..], b"new0new1");
        assert_eq!(r.stats(ScreenId::TOP).completed, 1);
    }

    #[test]
    fn superseded_frame_is_never_emitted() {
        let mut r = Reassembler::default();
        r.push(datagram(0, 10, 0, false, b"x"));
        r.push(datagram(0, 11, 0, false, b"y"));
        // Index 1 of frame 10 arrives late with the end flag: it opens a
        // fresh accumulator holding one fragment and fails the count.
        let out = r.push(datagram(0, 10, 1, true, b"z"));
        assert!(matches!(out, PushOutcome::Incomplete { frame_id: 10, expected: 2, received: 1, .. }));
    }

    #[test]
    fn screens_do_not_interfere() {
        let mut r = Reassembler::default();
        r.push(datagram(0, 1, 0, false, b"b0"));
        r.push(datagram(1, 1, 0, false, b"t0"));
        r.push(datagram(1, 2, 0, false, b"T0"));
        let bottom = r.push(datagram(0, 1, 1, true, b"b1"));
        let top = r.push(datagram(1, 2, 1, true, b"T1"));

        assert!(matches!(bottom, PushOutcome::Completed(f) if f.screen == ScreenId::BOTTOM && &f.data[..] == b"b0b1"));
        assert!(matches!(top, PushOutcome::Completed(f) if f.screen == ScreenId::TOP && &f.data[..] == b"T0T1"));
        assert_eq!(r.stats(ScreenId::BOTTOM).superseded, 0);
        assert_eq!(r.stats(ScreenId::TOP).superseded, 1);
    }

    #[test]
    fn single_fragment_frame() {
        let mut r = Reassembler::default();
        let out = r.push(datagram(1, 0, 0, true, b"whole"));
        assert!(matches!(out, PushOutcome::Completed(f) if &f.data[..] == b"whole"));
    }

    #[test]
    fn short_datagram_is_malformed() {
        let mut r = Reassembler::default();
        assert_eq!(r.push(Bytes::from_static(&[1, 2])), PushOutcome::Malformed);
        assert_eq!(r.malformed(), 1);
        assert_eq!(r.in_flight(), 0);
    }

    #[test]
    fn jpeg_trailer_validation() {
        let mut r = Reassembler::new(ReassemblerConfig {
            validate_jpeg_trailer: true,
        });
        let out = r.push(datagram(1, 1, 0, true, &[0xFF, 0xD8, 0x00]));
        assert_eq!(
            out,
            PushOutcome::Rejected {
                screen: ScreenId::TOP,
                frame_id: 1
            }
        );

        let out = r.push(datagram(1, 2, 0, true, &[0xFF, 0xD8, 0xFF, 0xD9]));
        assert!(matches!(out, PushOutcome::Completed(_)));
    }

    #[test]
    fn clear_drops_in_flight_state() {
        let mut r = Reassembler::default();
        r.push(datagram(0, 1, 0, false, b"a"));
        r.push(datagram(1, 1, 0, false, b"b"));
        assert_eq!(r.in_flight(), 2);
        r.clear();
        assert_eq!(r.in_flight(), 0);
        let out = r.push(datagram(0, 1, 1, true, b"c"));
        assert!(matches!(out, PushOutcome::Incomplete { received: 1, .. }));
    }
}
