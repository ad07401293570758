//! UDP receive loop for the NTR frame stream.
//!
//! One task owns the socket and the [`Reassembler`]; nothing else
//! touches per-frame state. Completed frames go out as
//! [`Event::FrameReady`](crate::events::Event::FrameReady), counters are
//! published through a `watch` channel so the application can poll them
//! without blocking the loop.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::NtrError;
use crate::events::{ChannelKind, EventSender, LinkState};
use crate::protocol::screen::ScreenId;
use crate::stream::reassembler::{FrameStats, PushOutcome, Reassembler, ReassemblerConfig};
use crate::task::SessionTasks;

pub const DEFAULT_STREAM_PORT: u16 = 8001;

/// Largest UDP payload; a smaller read buffer would truncate silently.
const MAX_DATAGRAM: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    pub port: u16,
    pub bind_addr: String,
    pub reassembly: ReassemblerConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_STREAM_PORT,
            bind_addr: "0.0.0.0".to_string(),
            reassembly: ReassemblerConfig::default(),
        }
    }
}

/// Snapshot of the reassembler's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub top: FrameStats,
    pub bottom: FrameStats,
    pub malformed: u64,
}

impl StreamStats {
    fn capture(reassembler: &Reassembler) -> Self {
        Self {
            top: reassembler.stats(ScreenId::TOP),
            bottom: reassembler.stats(ScreenId::BOTTOM),
            malformed: reassembler.malformed(),
        }
    }

    pub fn screen(&self, screen: ScreenId) -> &FrameStats {
        if screen.is_top() { &self.top } else { &self.bottom }
    }
}

#[derive(Debug)]
struct Bound {
    local_addr: SocketAddr,
    tasks: SessionTasks,
}

/// Socket slot shared with the receive task. Frames are published while
/// holding it, and `close` cancels while holding it, so no frame can
/// follow the `Disconnected` event.
type BoundSlot = Mutex<Option<Bound>>;

fn lock(slot: &BoundSlot) -> MutexGuard<'_, Option<Bound>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct StreamReceiver {
    config: ReceiverConfig,
    events: EventSender,
    bound: Arc<BoundSlot>,
    stats_tx: watch::Sender<StreamStats>,
}

impl StreamReceiver {
    pub fn new(config: ReceiverConfig, events: EventSender) -> Self {
        let (stats_tx, _) = watch::channel(StreamStats::default());
        Self {
            config,
            events,
            bound: Arc::new(Mutex::new(None)),
            stats_tx,
        }
    }

    fn bound(&self) -> MutexGuard<'_, Option<Bound>> {
        lock(&self.bound)
    }

    /// Latest counters, updated whenever a frame completes or is dropped.
    pub fn stats_receiver(&self) -> watch::Receiver<StreamStats> {
        self.stats_tx.subscribe()
    }

    /// Address the socket is bound to, if receiving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound().as_ref().map(|b| b.local_addr)
    }

    pub fn is_bound(&self) -> bool {
        self.bound().is_some()
    }

    /// Open the UDP socket and start receiving. An existing socket is
    /// closed first.
    pub async fn bind(&self) -> Result<SocketAddr, NtrError> {
        self.close();

        let socket = UdpSocket::bind((self.config.bind_addr.as_str(), self.config.port)).await?;
        let local_addr = socket.local_addr()?;

        let mut tasks = SessionTasks::new();
        let token = tasks.token();
        let reassembler = Reassembler::new(self.config.reassembly);
        tasks.spawn(
            "stream-receiver",
            receive_loop(
                socket,
                reassembler,
                Arc::downgrade(&self.bound),
                self.events.clone(),
                self.stats_tx.clone(),
                token,
            ),
        );

        *self.bound() = Some(Bound { local_addr, tasks });

        info!("receiving frames on udp {local_addr}");
        self.events.state(ChannelKind::Stream, LinkState::Connected);
        Ok(local_addr)
    }

    /// Stop receiving. In-flight fragments are discarded along with the
    /// socket.
    pub fn close(&self) {
        let mut slot = self.bound();
        if let Some(mut bound) = slot.take() {
            bound.tasks.cancel();
            info!("stopped receiving on udp {}", bound.local_addr);
            self.events.state(ChannelKind::Stream, LinkState::Disconnected);
        }
    }
}

impl Drop for StreamReceiver {
    fn drop(&mut self) {
        if let Some(mut bound) = self.bound().take() {
            bound.tasks.cancel();
        }
    }
}

async fn receive_loop(
    socket: UdpSocket,
    mut reassembler: Reassembler,
    slot: Weak<BoundSlot>,
    events: EventSender,
    stats: watch::Sender<StreamStats>,
    token: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(MAX_DATAGRAM * 4);
    loop {
        buf.reserve(MAX_DATAGRAM);
        let (len, peer) = match socket.recv_buf_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                if !token.is_cancelled() {
                    warn!("udp receive failed: {e}");
                    events.failed(ChannelKind::Stream, e.to_string());
                }
                return;
            }
        };
        let datagram = buf.split_to(len).freeze();

        let outcome = reassembler.push(datagram);
        if outcome == PushOutcome::Pending {
            continue;
        }

        let Some(live) = slot.upgrade() else {
            return;
        };
        let _guard = lock(&live);
        if token.is_cancelled() {
            return;
        }
        if let PushOutcome::Completed(frame) = outcome {
            debug!("{}: {} byte frame from {peer}", frame.screen, frame.data.len());
            events.frame(frame);
        }
        stats.send_replace(StreamStats::capture(&reassembler));
    }
}
