//! Screen identity and the remote-play streaming parameters.
//!
//! # Remote-play handshake
//!
//! ```text
//! Client ──[RemotePlay args[0..4]]──────────► Device   (control port)
//! Client    closes the control link
//!           … reconnect delay (3 s) …
//! Device ──[UDP fragments]──────────────────► Client   (stream port)
//! Client ──[connect + heartbeat]────────────► Device   (control port)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

// ── ScreenId ──────────────────────────────────────────────────────

/// A device screen, as carried in the low nibble of a fragment's
/// screen-info byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScreenId(u8);

impl ScreenId {
    pub const BOTTOM: ScreenId = ScreenId(0);
    pub const TOP: ScreenId = ScreenId(1);

    /// Build from a raw id; only the low nibble is kept.
    pub const fn new(raw: u8) -> Self {
        ScreenId(raw & 0x0F)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub const fn is_top(self) -> bool {
        self.0 == Self::TOP.0
    }
}

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ScreenId::TOP => write!(f, "top"),
            ScreenId::BOTTOM => write!(f, "bottom"),
            ScreenId(n) => write!(f, "screen{n}"),
        }
    }
}

// ── RemotePlayOptions ─────────────────────────────────────────────

/// QoS values are configured in Mbit/s; the device expects bytes per
/// second, i.e. `Mbps * 1024 * 1024 / 8`.
const QOS_SHIFT: u32 = 17;

/// Streaming parameters packed into the `RemotePlay` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemotePlayOptions {
    /// Screen that gets the larger share of bandwidth (1 = top, 0 = bottom).
    pub screen_priority: u32,
    /// Priority factor for the preferred screen.
    pub priority_factor: u32,
    /// JPEG quality requested from the encoder.
    pub jpeg_quality: u32,
    /// Bandwidth ceiling in Mbit/s.
    pub qos_value: u32,
}

impl Default for RemotePlayOptions {
    fn default() -> Self {
        Self {
            screen_priority: 1,
            priority_factor: 5,
            jpeg_quality: 80,
            qos_value: 105,
        }
    }
}

impl RemotePlayOptions {
    /// `(screen_priority << 8) | priority_factor`.
    pub fn priority_word(&self) -> u32 {
        (self.screen_priority << 8) | (self.priority_factor & 0xFF)
    }

    /// QoS value as sent on the wire.
    pub fn qos_word(&self) -> u32 {
        self.qos_value.saturating_mul(1 << QOS_SHIFT)
    }

    /// The four argument slots of the `RemotePlay` packet.
    pub fn args(&self) -> [u32; 4] {
        [self.priority_word(), self.jpeg_quality, self.qos_word(), 0]
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_id_keeps_low_nibble() {
        assert_eq!(ScreenId::new(0x11), ScreenId::TOP);
        assert!(ScreenId::new(1).is_top());
        assert!(!ScreenId::BOTTOM.is_top());
        assert_eq!(ScreenId::new(3).to_string(), "screen3");
    }

    #[test]
    fn default_args_match_device_expectations() {
        let opts = RemotePlayOptions::default();
        assert_eq!(opts.args(), [(1 << 8) | 5, 80, 105 << 17, 0]);
    }

    #[test]
    fn bottom_priority_word() {
        let opts = RemotePlayOptions {
            screen_priority: 0,
            priority_factor: 8,
            ..Default::default()
        };
        assert_eq!(opts.priority_word(), 8);
    }

    #[test]
    fn qos_saturates() {
        let opts = RemotePlayOptions {
            qos_value: u32::MAX,
            ..Default::default()
        };
        assert_eq!(opts.qos_word(), u32::MAX);
    }
}
