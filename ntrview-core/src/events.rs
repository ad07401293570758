//! Typed events published by the channels.
//!
//! Every component holds a clone of one [`EventSender`]; the application
//! owns the single [`EventReceiver`]. Sending never blocks and never
//! fails from the component's point of view: if the application has
//! gone away, events are dropped.

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::stream::CompletedFrame;

/// Which connection an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// TCP command port.
    Control,
    /// UDP frame stream.
    Stream,
    /// HzMod TCP session.
    HzMod,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Control => write!(f, "control"),
            ChannelKind::Stream => write!(f, "stream"),
            ChannelKind::HzMod => write!(f, "hzmod"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StateChanged {
        channel: ChannelKind,
        state: LinkState,
    },
    FrameReady(CompletedFrame),
    /// A bulk payload from the command port (process list, memory dump, ...).
    BulkData(Bytes),
    /// The session ended because of a remote or transport error.
    SessionFailed {
        channel: ChannelKind,
        reason: String,
    },
}

pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

/// Create a connected sender/receiver pair.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

impl EventSender {
    pub fn emit(&self, event: Event) {
        // A closed receiver means nobody is listening any more.
        let _ = self.tx.send(event);
    }

    pub fn state(&self, channel: ChannelKind, state: LinkState) {
        self.emit(Event::StateChanged { channel, state });
    }

    pub fn frame(&self, frame: CompletedFrame) {
        self.emit(Event::FrameReady(frame));
    }

    pub fn bulk(&self, data: Bytes) {
        self.emit(Event::BulkData(data));
    }

    pub fn failed(&self, channel: ChannelKind, reason: impl Into<String>) {
        self.emit(Event::SessionFailed {
            channel,
            reason: reason.into(),
        });
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
