//! HzMod streaming session.
//!
//! HzMod replaces the NTR UDP stream with a single TCP connection: the
//! client sends configuration packets, the device answers with framed
//! images. Frames are always attributed to the top screen.
//!
//! An error packet from the device ends the session (torn down, with
//! `SessionFailed` published) but never the process.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::codec::hz::{HzCodec, HzCommand};
use crate::error::NtrError;
use crate::events::{ChannelKind, EventSender, LinkState};
use crate::network::connection::ConnectionInfo;
use crate::protocol::hzmod::HzMessage;
use crate::protocol::screen::ScreenId;
use crate::state::ConnectionPhase;
use crate::stream::{CompletedFrame, ImageDecoder};
use crate::task::SessionTasks;

pub const DEFAULT_HZ_PORT: u16 = 6464;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HzOptions {
    pub port: u16,
    /// JPEG quality, clamped to 1..=100 when sent.
    pub quality: u32,
    /// CPU cycle cap; 0 leaves the device default alone.
    pub cpu_limit: u32,
    pub connect_timeout: Duration,
}

impl Default for HzOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_HZ_PORT,
            quality: 80,
            cpu_limit: 0,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    phase: ConnectionPhase,
    generation: u64,
    host: Option<String>,
    writer: Option<mpsc::UnboundedSender<HzCommand>>,
    tasks: Option<SessionTasks>,
}

impl Session {
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

struct Shared {
    options: Mutex<HzOptions>,
    events: EventSender,
    decoder: Arc<dyn ImageDecoder>,
    session: Mutex<Session>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── HzSession ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct HzSession {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for HzSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HzSession")
            .field("options", &*lock(&self.shared.options))
            .field("session", &*lock(&self.shared.session))
            .finish()
    }
}

impl HzSession {
    pub fn new(options: HzOptions, decoder: Arc<dyn ImageDecoder>, events: EventSender) -> Self {
        Self {
            shared: Arc::new(Shared {
                options: Mutex::new(options),
                events,
                decoder,
                session: Mutex::new(Session::default()),
            }),
        }
    }

    pub fn options(&self) -> HzOptions {
        lock(&self.shared.options).clone()
    }

    pub fn phase(&self) -> ConnectionPhase {
        lock(&self.shared.session).phase.clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.session).phase.is_connected()
    }

    /// Connect to `host` and start streaming, replacing any running
    /// session.
    pub async fn start(&self, host: &str) -> Result<(), NtrError> {
        self.stop();

        let generation = {
            let mut session = lock(&self.shared.session);
            session.phase.begin_connect()?;
            session.host = Some(host.to_string());
            session.generation
        };
        let options = self.options();

        let info = ConnectionInfo::new(host, options.port);
        let stream = match info.connect(options.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                let mut session = lock(&self.shared.session);
                if session.generation == generation {
                    session.phase.force_disconnect();
                }
                warn!("hzmod connect to {info} failed: {e}");
                return Err(e);
            }
        };
        let (read_half, write_half) = stream.into_split();

        let mut session = lock(&self.shared.session);
        if session.generation != generation {
            debug!("hzmod connect to {info} overtaken by stop");
            return Err(NtrError::Cancelled);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(write_loop(
            weak.clone(),
            generation,
            FramedWrite::new(write_half, HzCodec::new()),
            rx,
        ));
        let mut tasks = SessionTasks::new();
        tasks.spawn(
            "hzmod-reader",
            read_loop(weak, generation, FramedRead::new(read_half, HzCodec::new())),
        );

        if options.cpu_limit > 0 {
            info!("hzmod: capping CPU at {}", options.cpu_limit);
            tx.send(HzCommand::cpu_limit(options.cpu_limit))?;
        }
        tx.send(HzCommand::quality(options.quality))?;
        tx.send(HzCommand::StartStream)?;

        session.phase.complete_connect()?;
        session.writer = Some(tx);
        session.tasks = Some(tasks);
        drop(session);

        info!("hzmod session started on {info} (quality {})", options.quality);
        self.shared.events.state(ChannelKind::HzMod, LinkState::Connected);
        Ok(())
    }

    /// End the session. Safe to call at any time.
    pub fn stop(&self) {
        let was_live = lock(&self.shared.session).close();
        if was_live {
            info!("hzmod session stopped");
            self.shared
                .events
                .state(ChannelKind::HzMod, LinkState::Disconnected);
        }
    }

    /// Change the JPEG quality, applying it to the live session if any.
    pub fn set_quality(&self, quality: u32) -> Result<(), NtrError> {
        lock(&self.shared.options).quality = quality;
        let session = lock(&self.shared.session);
        match session.writer.as_ref() {
            Some(writer) => {
                let command = HzCommand::quality(quality);
                debug!("hzmod: quality -> {}", command.value());
                writer.send(command)?;
            }
            None => debug!("hzmod: quality {quality} stored for next session"),
        }
        Ok(())
    }

    pub fn set_cpu_limit(&self, cpu_limit: u32) {
        lock(&self.shared.options).cpu_limit = cpu_limit;
    }

    /// Stop and start again against the last host.
    pub async fn restart(&self) -> Result<(), NtrError> {
        let host = lock(&self.shared.session).host.clone();
        let Some(host) = host else {
            return Err(NtrError::NotConnected);
        };
        self.start(&host).await
    }
}

// ── Tasks ────────────────────────────────────────────────────────

async fn write_loop(
    shared: Weak<Shared>,
    generation: u64,
    mut sink: FramedWrite<OwnedWriteHalf, HzCodec>,
    mut queue: mpsc::UnboundedReceiver<HzCommand>,
) {
    while let Some(command) = queue.recv().await {
        if let Err(e) = sink.send(command).await {
            session_lost(&shared, generation, format!("write failed: {e}"));
            return;
        }
    }
    if let Err(e) = sink.close().await {
        debug!("hzmod writer close: {e}");
    }
}

async fn read_loop(
    shared: Weak<Shared>,
    generation: u64,
    mut frames: FramedRead<OwnedReadHalf, HzCodec>,
) {
    let reason = loop {
        let packet = match frames.next().await {
            Some(Ok(packet)) => packet,
            Some(Err(e)) => break e.to_string(),
            None => break "closed by device".to_string(),
        };
        let id = packet.id;
        let message = match HzMessage::parse(packet) {
            Ok(message) => message,
            Err(e) => {
                warn!("hzmod: dropping packet {id:#04x}: {e}");
                continue;
            }
        };
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match message {
            HzMessage::Error { code, message } => {
                break NtrError::Remote { code, message }.to_string();
            }
            HzMessage::ModeSet { top, bottom } => {
                info!(
                    "hzmod mode: top {:#x} (format {}, {} bytes), bottom {:#x} (format {}, {} bytes)",
                    top.mode,
                    top.pixel_format(),
                    top.byte_size,
                    bottom.mode,
                    bottom.pixel_format(),
                    bottom.byte_size
                );
            }
            HzMessage::Tga(image) => match shared.decoder.decode(image).await {
                Ok(data) => shared.events.frame(CompletedFrame {
                    screen: ScreenId::TOP,
                    data,
                }),
                Err(e) => warn!("hzmod: TGA frame dropped: {e}"),
            },
            HzMessage::Jpeg(data) => shared.events.frame(CompletedFrame {
                screen: ScreenId::TOP,
                data,
            }),
            HzMessage::ConfigAck(payload) => debug!("hzmod: config ack ({} bytes)", payload.len()),
            HzMessage::Debug(words) => debug!("hzmod debug: {words:x?}"),
            HzMessage::Unknown { id, payload } => {
                debug!("hzmod: ignoring packet {id:#04x} ({} bytes)", payload.len())
            }
        }
    };
    session_lost(&shared, generation, reason);
}

fn session_lost(shared: &Weak<Shared>, generation: u64, reason: String) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut session = lock(&shared.session);
    if session.generation != generation {
        return;
    }
    session.close();
    drop(session);

    warn!("hzmod session ended: {reason}");
    shared.events.failed(ChannelKind::HzMod, reason);
    shared
        .events
        .state(ChannelKind::HzMod, LinkState::Disconnected);
}
