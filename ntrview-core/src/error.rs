//! Domain-specific error types for the NTR client protocols.
//!
//! All fallible operations return `Result<T, NtrError>`.
//! Nothing read off the wire is allowed to panic; every error is typed
//! and the caller decides whether it is fatal.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the control, stream and HzMod channels.
#[derive(Debug, Error)]
pub enum NtrError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A control packet did not start with `0x12345678`.
    #[error("invalid magic: expected 0x12345678, got {found:#010x}")]
    InvalidMagic { found: u32 },

    /// Fewer bytes were available than the structure requires.
    #[error("truncated {what}: need {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A packet violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Session Errors ───────────────────────────────────────────
    /// The device reported an error and ended the session.
    #[error("device error {code}: {message}")]
    Remote { code: u8, message: String },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/UDP layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An operation needed a live link but the channel is down.
    #[error("not connected")]
    NotConnected,

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// A pending operation was overtaken by a disconnect.
    #[error("operation cancelled")]
    Cancelled,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Decode Errors ────────────────────────────────────────────
    /// The external image decoder rejected a frame.
    #[error("image decode failed: {0}")]
    Decode(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl NtrError {
    /// Shorthand for a [`NtrError::Truncated`] error.
    pub fn truncated(what: &'static str, expected: usize, actual: usize) -> Self {
        NtrError::Truncated {
            what,
            expected,
            actual,
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for NtrError {
    fn from(s: String) -> Self {
        NtrError::Other(s)
    }
}

impl From<&str> for NtrError {
    fn from(s: &str) -> Self {
        NtrError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for NtrError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        NtrError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = NtrError::InvalidMagic { found: 0xdeadbeef };
        assert!(e.to_string().contains("0xdeadbeef"));

        let e = NtrError::truncated("control header", 84, 10);
        assert!(e.to_string().contains("84"));
        assert!(e.to_string().contains("10"));
    }

    #[test]
    fn from_string() {
        let e: NtrError = "something broke".into();
        assert!(matches!(e, NtrError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: NtrError = io_err.into();
        assert!(matches!(e, NtrError::Connection(_)));
    }

    #[test]
    fn remote_and_timeout_messages() {
        let remote = NtrError::Remote {
            code: 2,
            message: "bad mode".into(),
        };
        assert_eq!(remote.to_string(), "device error 2: bad mode");
        let timeout = NtrError::Timeout(std::time::Duration::from_millis(250));
        assert_eq!(timeout.to_string(), "timeout after 250ms");
    }
}
