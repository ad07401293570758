//! The command port: connection, heartbeat and remote-play handshake.
//!
//! A [`ControlChannel`] is a cheap, cloneable handle. The live TCP link
//! is split three ways:
//!
//! - a **writer** task owning the write half, fed through an unbounded
//!   queue so callers never block; it drains the queue before closing,
//!   which is what lets the remote-play packet reach the device even
//!   though the link is torn down right after it is queued;
//! - a **reader** task decoding [`ControlFrame`]s and publishing bulk
//!   payloads;
//! - a **heartbeat** task queueing an `Empty` packet every interval.
//!
//! Each link gets a generation number. Teardown bumps it, so a task
//! from an old link that wakes up late finds a mismatch and leaves the
//! current state alone.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{ControlCodec, ControlFrame, OutgoingCommand};
use crate::error::NtrError;
use crate::events::{ChannelKind, EventSender, LinkState};
use crate::header::ControlPacket;
use crate::message::Command;
use crate::network::connection::ConnectionInfo;
use crate::protocol::screen::RemotePlayOptions;
use crate::state::ConnectionPhase;
use crate::task::SessionTasks;

pub const DEFAULT_CONTROL_PORT: u16 = 8000;

/// Sequence numbers advance by this much per packet.
pub const SEQUENCE_STRIDE: u32 = 1000;

// ── ControlConfig ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlConfig {
    pub port: u16,
    /// Zero disables the periodic heartbeat.
    pub heartbeat_interval: Duration,
    /// Pause between the remote-play packet and the reconnect.
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_CONTROL_PORT,
            heartbeat_interval: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

// ── Internals ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SequenceCounter(AtomicU32);

impl SequenceCounter {
    fn next(&self) -> u32 {
        self.0
            .fetch_add(SEQUENCE_STRIDE, Ordering::Relaxed)
            .wrapping_add(SEQUENCE_STRIDE)
    }
}

#[derive(Debug, Default)]
struct Link {
    phase: ConnectionPhase,
    generation: u64,
    host: Option<String>,
    writer: Option<mpsc::UnboundedSender<OutgoingCommand>>,
    tasks: Option<SessionTasks>,
    /// Pending remote-play reconnect.
    reconnect: Option<CancellationToken>,
    remote_play_sent: bool,
}

impl Link {
    /// Drop the live connection. Returns whether there was one.
    fn close(&mut self) -> bool {
        self.generation = self.generation.wrapping_add(1);
        if let Some(mut tasks) = self.tasks.take() {
            tasks.cancel();
        }
        let had_link = self.writer.take().is_some();
        self.phase.force_disconnect();
        had_link
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(token) = self.reconnect.take() {
            token.cancel();
        }
    }
}

#[derive(Debug)]
struct Shared {
    config: ControlConfig,
    remote_play: RemotePlayOptions,
    events: EventSender,
    sequence: Arc<SequenceCounter>,
    link: Mutex<Link>,
}

fn lock(link: &Mutex<Link>) -> MutexGuard<'_, Link> {
    link.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── ControlChannel ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ControlChannel {
    shared: Arc<Shared>,
}

impl ControlChannel {
    pub fn new(config: ControlConfig, remote_play: RemotePlayOptions, events: EventSender) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                remote_play,
                events,
                sequence: Arc::new(SequenceCounter::default()),
                link: Mutex::new(Link::default()),
            }),
        }
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        lock(&self.shared.link)
    }

    pub fn config(&self) -> &ControlConfig {
        &self.shared.config
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.link().phase.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.link().phase.is_connected()
    }

    /// Whether a remote-play handshake has been sent and not reset.
    pub fn remote_play_requested(&self) -> bool {
        self.link().remote_play_sent
    }

    /// Connect to `host`, replacing any existing link.
    pub async fn connect(&self, host: &str) -> Result<(), NtrError> {
        self.disconnect();
        self.open(host.to_string(), None).await
    }

    async fn open(&self, host: String, reconnect: Option<&CancellationToken>) -> Result<(), NtrError> {
        let generation = {
            let mut link = self.link();
            if reconnect.is_some_and(CancellationToken::is_cancelled) {
                return Err(NtrError::Cancelled);
            }
            if reconnect.is_some() {
                link.reconnect = None;
            }
            link.phase.begin_connect()?;
            link.host = Some(host.clone());
            link.generation
        };

        let info = ConnectionInfo::new(host, self.shared.config.port);
        let stream = match info.connect(self.shared.config.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                let mut link = self.link();
                if link.generation == generation {
                    link.phase.force_disconnect();
                }
                warn!("control connect to {info} failed: {e}");
                return Err(e);
            }
        };
        let (read_half, write_half) = stream.into_split();

        let mut link = self.link();
        if link.generation != generation {
            debug!("control connect to {info} overtaken by disconnect");
            return Err(NtrError::Cancelled);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(write_loop(
            weak.clone(),
            generation,
            FramedWrite::new(write_half, ControlCodec::new()),
            rx,
        ));

        let mut tasks = SessionTasks::new();
        tasks.spawn(
            "control-reader",
            read_loop(weak, generation, FramedRead::new(read_half, ControlCodec::new())),
        );
        let period = self.shared.config.heartbeat_interval;
        if period.is_zero() {
            debug!("periodic heartbeat disabled");
        } else {
            tasks.spawn(
                "heartbeat",
                heartbeat_loop(tx.clone(), Arc::clone(&self.shared.sequence), period),
            );
        }

        tx.send(ControlPacket::heartbeat(self.shared.sequence.next()).into())?;
        link.phase.complete_connect()?;
        link.writer = Some(tx);
        link.tasks = Some(tasks);
        drop(link);

        info!("control channel connected to {info}");
        self.shared
            .events
            .state(ChannelKind::Control, LinkState::Connected);
        Ok(())
    }

    /// Close the link, cancel heartbeat and any pending reconnect, and
    /// reset the remote-play guard. Safe to call at any time.
    pub fn disconnect(&self) {
        let mut link = self.link();
        if let Some(token) = link.reconnect.take() {
            token.cancel();
        }
        link.remote_play_sent = false;
        let was_live = link.close();
        drop(link);

        if was_live {
            info!("control channel disconnected");
            self.shared
                .events
                .state(ChannelKind::Control, LinkState::Disconnected);
        }
    }

    /// Queue `command` for the device.
    ///
    /// `Empty` is sent as a heartbeat and `RemotePlay` runs the
    /// handshake. Raw `data` is only written for `WriteSave`.
    pub fn send_command(
        &self,
        command: Command,
        args: &[u32],
        declared_length: u32,
        data: Option<Bytes>,
    ) -> Result<(), NtrError> {
        match command {
            Command::Empty => return self.heartbeat(),
            Command::RemotePlay => return self.remote_play().map(|_| ()),
            _ => {}
        }

        let data = match data {
            Some(bytes) if command.carries_data() => Some(bytes),
            Some(bytes) => {
                warn!(
                    "{command} does not carry raw data; ignoring {} bytes",
                    bytes.len()
                );
                None
            }
            None => None,
        };

        self.enqueue(command, |sequence| {
            Ok(OutgoingCommand {
                packet: ControlPacket::new(sequence, command, args, declared_length)?,
                data,
            })
        })
    }

    pub fn heartbeat(&self) -> Result<(), NtrError> {
        self.enqueue(Command::Empty, |sequence| {
            Ok(ControlPacket::heartbeat(sequence).into())
        })
    }

    fn enqueue(
        &self,
        command: Command,
        build: impl FnOnce(u32) -> Result<OutgoingCommand, NtrError>,
    ) -> Result<(), NtrError> {
        let link = self.link();
        let Some(writer) = link.writer.as_ref() else {
            warn!("control channel not connected; {command} not sent");
            return Err(NtrError::NotConnected);
        };
        let outgoing = build(self.shared.sequence.next())?;
        debug!("queueing {command} (seq {})", outgoing.packet.sequence);
        writer.send(outgoing)?;
        Ok(())
    }

    /// Ask the device to start streaming, then reconnect.
    ///
    /// Returns `Ok(false)` without sending anything if the handshake was
    /// already requested on this session.
    ///
    /// The guard survives the handshake's own teardown and reconnect, so
    /// calling this again on the reconnected link is refused. Only
    /// [`disconnect`](Self::disconnect), a lost link or a failed
    /// reconnect clear it.
    pub fn remote_play(&self) -> Result<bool, NtrError> {
        let mut link = self.link();
        if link.remote_play_sent {
            warn!("remote play already requested; ignoring");
            return Ok(false);
        }
        let Some(writer) = link.writer.as_ref() else {
            warn!("control channel not connected; remote play not sent");
            return Err(NtrError::NotConnected);
        };

        let options = &self.shared.remote_play;
        let packet = ControlPacket::new(
            self.shared.sequence.next(),
            Command::RemotePlay,
            &options.args(),
            0,
        )?;
        writer.send(packet.into())?;

        link.remote_play_sent = true;
        let host = link.host.clone();
        link.close();
        let token = CancellationToken::new();
        if let Some(stale) = link.reconnect.replace(token.clone()) {
            stale.cancel();
        }
        drop(link);

        let delay = self.shared.config.reconnect_delay;
        info!(
            "remote play requested (priority {:#06x}, quality {}, qos {} Mbps); reconnecting in {delay:?}",
            options.priority_word(),
            options.jpeg_quality,
            options.qos_value,
        );
        self.shared
            .events
            .state(ChannelKind::Control, LinkState::Disconnected);

        if let Some(host) = host {
            tokio::spawn(reconnect_after(Arc::downgrade(&self.shared), host, delay, token));
        }
        Ok(true)
    }
}

// ── Tasks ────────────────────────────────────────────────────────

async fn write_loop(
    shared: Weak<Shared>,
    generation: u64,
    mut sink: FramedWrite<OwnedWriteHalf, ControlCodec>,
    mut queue: mpsc::UnboundedReceiver<OutgoingCommand>,
) {
    while let Some(outgoing) = queue.recv().await {
        if let Err(e) = sink.send(outgoing).await {
            link_lost(&shared, generation, &format!("write failed: {e}"));
            return;
        }
    }
    // Every sender is gone: flush and half-close.
    if let Err(e) = sink.close().await {
        debug!("control writer close: {e}");
    }
}

async fn read_loop(
    shared: Weak<Shared>,
    generation: u64,
    mut frames: FramedRead<OwnedReadHalf, ControlCodec>,
) {
    let reason = loop {
        match frames.next().await {
            Some(Ok(ControlFrame::Packet(packet))) => match packet.command() {
                Ok(command) => debug!(
                    "device sent {command} (seq {}, {} bulk bytes)",
                    packet.sequence, packet.declared_length
                ),
                Err(e) => warn!("device sent {e}"),
            },
            Some(Ok(ControlFrame::Bulk(data))) => {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                // Held across the emit; teardown bumps the generation
                // under the same lock.
                let link = lock(&shared.link);
                if link.generation != generation {
                    return;
                }
                debug!("bulk payload of {} bytes", data.len());
                shared.events.bulk(data);
            }
            Some(Err(e)) => break e.to_string(),
            None => break "closed by device".to_string(),
        }
    };
    link_lost(&shared, generation, &reason);
}

async fn heartbeat_loop(
    queue: mpsc::UnboundedSender<OutgoingCommand>,
    sequence: Arc<SequenceCounter>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if queue
            .send(ControlPacket::heartbeat(sequence.next()).into())
            .is_err()
        {
            break;
        }
    }
}

async fn reconnect_after(
    shared: Weak<Shared>,
    host: String,
    delay: Duration,
    token: CancellationToken,
) {
    tokio::select! {
        _ = token.cancelled() => {
            debug!("remote play reconnect cancelled");
            return;
        }
        _ = tokio::time::sleep(delay) => {}
    }

    let Some(shared) = shared.upgrade() else {
        return;
    };
    let channel = ControlChannel { shared };
    match channel.open(host, Some(&token)).await {
        Ok(()) => {}
        Err(NtrError::Cancelled) => debug!("remote play reconnect cancelled"),
        Err(e) => {
            warn!("reconnect after remote play failed: {e}");
            channel.link().remote_play_sent = false;
            channel
                .shared
                .events
                .failed(ChannelKind::Control, e.to_string());
        }
    }
}

/// Tear down after an I/O failure, unless the link has already been
/// replaced.
fn link_lost(shared: &Weak<Shared>, generation: u64, reason: &str) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut link = lock(&shared.link);
    if link.generation != generation {
        return;
    }
    link.close();
    link.remote_play_sent = false;
    drop(link);

    warn!("control link lost: {reason}");
    shared
        .events
        .state(ChannelKind::Control, LinkState::Disconnected);
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;

    fn channel() -> (ControlChannel, events::EventReceiver) {
        let (tx, rx) = events::channel();
        (
            ControlChannel::new(ControlConfig::default(), RemotePlayOptions::default(), tx),
            rx,
        )
    }

    #[test]
    fn sequence_strides_by_one_thousand() {
        let seq = SequenceCounter::default();
        assert_eq!(seq.next(), 1000);
        assert_eq!(seq.next(), 2000);

        let seq = SequenceCounter(AtomicU32::new(u32::MAX - 499));
        assert_eq!(seq.next(), 500);
    }

    #[test]
    fn commands_fail_when_disconnected() {
        let (chan, _rx) = channel();
        assert!(matches!(
            chan.send_command(Command::PidList, &[], 0, None),
            Err(NtrError::NotConnected)
        ));
        assert!(matches!(chan.heartbeat(), Err(NtrError::NotConnected)));
        assert!(matches!(chan.remote_play(), Err(NtrError::NotConnected)));
        assert!(!chan.remote_play_requested());
    }

    #[test]
    fn disconnect_without_link_is_silent() {
        let (chan, mut rx) = channel();
        chan.disconnect();
        chan.disconnect();
        assert!(rx.try_recv().is_err());
        assert!(chan.phase().is_disconnected());
    }
}
