//! # ntrview-core
//!
//! Transport and framing layer for streaming a 3DS screen from NTR
//! custom firmware.
//!
//! This crate contains:
//! - **Control protocol**: `ControlPacket`, `Command`, `TransferType`
//!   and the `ControlCodec` for the 84-byte command port framing
//! - **HzMod protocol**: `HzCodec` / `HzStreamDecoder` for the
//!   `id | u24 length | payload` framing, `HzMessage` for its payloads
//! - **Network**: `ControlChannel` (heartbeat, commands, remote-play
//!   handshake) and `HzSession`
//! - **Stream**: UDP `Fragment` parsing, the per-screen `Reassembler`
//!   and the `StreamReceiver` loop that owns it
//! - **Events**: the typed channel every component publishes to
//! - **State / Task**: `ConnectionPhase` and `SessionTasks`
//! - **Error**: `NtrError`, a typed, `thiserror`-based error hierarchy

pub mod codec;
pub mod error;
pub mod events;
pub mod flags;
pub mod header;
pub mod message;
pub mod network;
pub mod protocol;
pub mod state;
pub mod stream;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{ControlCodec, ControlFrame, HzCodec, HzPacket, HzStreamDecoder, OutgoingCommand};
pub use error::NtrError;
pub use events::{ChannelKind, Event, EventReceiver, EventSender, LinkState};
pub use flags::FragmentFlags;
pub use header::{ControlPacket, HEADER_SIZE, MAGIC};
pub use message::{Command, TransferType};
pub use network::{ConnectionInfo, ControlChannel, ControlConfig, HzOptions, HzSession};
pub use protocol::{BulkResponse, HzMessage, ProcessList, RemotePlayOptions, ScreenId, ScreenMode};
pub use state::ConnectionPhase;
pub use stream::{
    CompletedFrame, FrameStats, ImageDecoder, PassthroughDecoder, Reassembler, ReassemblerConfig,
    ReceiverConfig, StreamReceiver, StreamStats,
};
pub use task::SessionTasks;
