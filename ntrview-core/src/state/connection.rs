//! Connection lifecycle shared by the TCP channels.
//!
//! Provides a `ConnectionPhase` enum with validated transitions that
//! return `Result` instead of panicking.

use std::time::{Duration, Instant};

use crate::error::NtrError;

// ── ConnectionPhase ──────────────────────────────────────────────

/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲               │              │
///       └───────────────┴──────────────┘
///          (failure, error, disconnect)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// No active connection. Initial / terminal state.
    #[default]
    Disconnected,

    /// TCP connection initiated but not yet established.
    Connecting,

    Connected {
        /// When the connection entered the `Connected` state.
        since: Instant,
    },
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { .. } => write!(f, "Connected"),
        }
    }
}

impl ConnectionPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// How long the connection has been up. `None` unless connected.
    pub fn connected_duration(&self) -> Option<Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), NtrError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(NtrError::ProtocolViolation(
                "cannot connect: not in Disconnected state",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), NtrError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(NtrError::ProtocolViolation(
                "cannot complete connect: not in Connecting state",
            )),
        }
    }

    /// Force-reset to `Disconnected` regardless of current state.
    ///
    /// Used for explicit disconnects and for I/O failures alike.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = ConnectionPhase::Disconnected;

        phase.begin_connect().unwrap();
        assert_eq!(phase, ConnectionPhase::Connecting);

        phase.complete_connect().unwrap();
        assert!(phase.is_connected());
        assert!(phase.connected_duration().is_some());

        phase.force_disconnect();
        assert!(phase.is_disconnected());
    }

    #[test]
    fn invalid_transition_connect_when_connected() {
        let mut phase = ConnectionPhase::Connected {
            since: Instant::now(),
        };
        assert!(phase.begin_connect().is_err());
    }

    #[test]
    fn invalid_transition_complete_from_disconnected() {
        let mut phase = ConnectionPhase::Disconnected;
        assert!(phase.complete_connect().is_err());
        assert!(phase.is_disconnected());
    }

    #[test]
    fn connect_failure_returns_to_disconnected() {
        let mut phase = ConnectionPhase::Connecting;
        phase.force_disconnect();
        assert!(phase.is_disconnected());
        assert!(phase.connected_duration().is_none());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionPhase::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionPhase::Connecting.to_string(), "Connecting");
        assert_eq!(
            ConnectionPhase::Connected {
                since: Instant::now()
            }
            .to_string(),
            "Connected"
        );
    }

    #[test]
    fn default_phase_is_disconnected() {
        assert!(ConnectionPhase::default().is_disconnected());
    }
}
