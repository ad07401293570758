//! ntrview entry point.
//!
//! ```text
//! ntrview                        Stream using the configured mode
//! ntrview stream                 NTR remote play over UDP
//! ntrview hz --quality 70        HzMod stream over TCP
//! ntrview pids [--json]          Print the console's process list
//! ntrview send ReadMem 0x1a ...  Send a raw control command
//! ntrview --config <path>        Use custom config TOML
//! ntrview --gen-config           Dump default config and exit
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ntrview::config::{LoggingConfig, NtrConfig, StreamMode};
use ntrview::meter::FrameMeter;
use ntrview_core::{
    BulkResponse, ChannelKind, Command, ControlChannel, Event, EventReceiver, HzSession, LinkState,
    PassthroughDecoder, StreamReceiver, events,
};

/// How long one-shot commands wait for the console to answer.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ntrview", about = "NTR / HzMod 3DS screen stream client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "ntrview.toml")]
    config: PathBuf,

    /// Console address (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Start NTR remote play and receive frames over UDP.
    Stream {
        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Stream through HzMod.
    Hz {
        /// JPEG quality (1-100), overrides config.
        #[arg(long)]
        quality: Option<u32>,
        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Query and print the process list.
    Pids {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
        /// Only print the pid of the first process matching this name.
        #[arg(long)]
        find: Option<String>,
    },
    /// Send one control command and print any bulk reply.
    Send {
        /// Command name (e.g. `ReadMem`) or numeric id.
        command: Command,
        /// Up to 16 argument words, decimal or 0x-prefixed hex.
        #[arg(value_parser = parse_word)]
        args: Vec<u32>,
        /// Declared payload length.
        #[arg(long, default_value_t = 0)]
        length: u32,
        /// File whose bytes follow the header (WriteSave only).
        #[arg(long)]
        data: Option<PathBuf>,
    },
}

fn parse_word(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid argument word {s:?}: {e}"))
}

// ── Logging ──────────────────────────────────────────────────────

fn init_tracing(logging: &LoggingConfig) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.file.is_empty() {
        builder.with_writer(std::io::stderr).init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logging.file)?;
        builder.with_writer(Mutex::new(file)).with_ansi(false).init();
    }
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&NtrConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let (mut config, source) = NtrConfig::load_with_source(&cli.config);
    if let Some(host) = cli.host {
        config.device.host = host;
    }
    init_tracing(&config.logging)?;

    info!("ntrview v{}", env!("CARGO_PKG_VERSION"));
    source.log(&cli.config);

    let command = cli.command.unwrap_or(match config.stream.mode {
        StreamMode::Ntr => Cmd::Stream { duration: None },
        StreamMode::HzMod => Cmd::Hz {
            quality: None,
            duration: None,
        },
    });

    match command {
        Cmd::Stream { duration } => run_stream(&config, duration).await,
        Cmd::Hz { quality, duration } => {
            if let Some(quality) = quality {
                config.stream.jpeg_quality = quality;
            }
            run_hz(&config, duration).await
        }
        Cmd::Pids { json, find } => run_pids(&config, json, find).await,
        Cmd::Send {
            command,
            args,
            length,
            data,
        } => {
            let data = match data {
                Some(path) => Some(Bytes::from(std::fs::read(path)?)),
                None => None,
            };
            run_send(&config, command, &args, length, data).await
        }
    }
}

// ── Streaming ────────────────────────────────────────────────────

async fn run_stream(config: &NtrConfig, duration: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let (events, rx) = events::channel();
    let receiver = StreamReceiver::new(config.receiver_config(), events.clone());
    let control = ControlChannel::new(config.control_config(), config.remote_play_options(), events);

    receiver.bind().await?;
    control.connect(&config.device.host).await?;
    control.remote_play()?;

    let stats = receiver.stats_receiver();
    pump_events(rx, duration, || {
        let s = stats.borrow();
        format!(
            "dropped: top {} incomplete / {} superseded, bottom {} incomplete / {} superseded",
            s.top.incomplete, s.top.superseded, s.bottom.incomplete, s.bottom.superseded
        )
    })
    .await;

    info!("shutting down");
    control.disconnect();
    receiver.close();
    Ok(())
}

async fn run_hz(config: &NtrConfig, duration: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let (events, rx) = events::channel();
    let session = HzSession::new(config.hz_options(), Arc::new(PassthroughDecoder), events);
    session.start(&config.device.host).await?;

    pump_events(rx, duration, String::new).await;

    info!("shutting down");
    session.stop();
    Ok(())
}

/// Consume events until ctrl-c, the deadline, or a failed session.
async fn pump_events(mut rx: EventReceiver, duration: Option<u64>, extra: impl Fn() -> String) {
    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let stop_at = async {
        match deadline {
            Some(at) => sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(stop_at);

    let mut meter = FrameMeter::new();
    let mut report = tokio::time::interval(Duration::from_secs(5));
    report.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut stop_at => break,
            _ = report.tick() => {
                let extra = extra();
                if extra.is_empty() {
                    info!("{}", meter.summary());
                } else {
                    info!("{}; {extra}", meter.summary());
                }
            }
            event = rx.recv() => match event {
                None => break,
                Some(Event::FrameReady(frame)) => meter.record(frame.screen, frame.data.len()),
                Some(Event::StateChanged { channel, state }) => info!("{channel}: {state:?}"),
                Some(Event::BulkData(data)) => debug!("{} bulk bytes", data.len()),
                Some(Event::SessionFailed { channel, reason }) => {
                    error!("{channel} session failed: {reason}");
                    if channel != ChannelKind::Control {
                        break;
                    }
                }
            },
        }
    }
}

// ── One-shot commands ────────────────────────────────────────────

async fn connect_control(config: &NtrConfig) -> Result<(ControlChannel, EventReceiver), Box<dyn std::error::Error>> {
    let (events, rx) = events::channel();
    let control = ControlChannel::new(config.control_config(), config.remote_play_options(), events);
    control.connect(&config.device.host).await?;
    Ok((control, rx))
}

/// Wait for the next bulk payload, or `None` if the link drops first.
async fn next_bulk(rx: &mut EventReceiver, wait: Duration) -> Option<Bytes> {
    let deadline = Instant::now() + wait;
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv()).await.ok()??;
        match event {
            Event::BulkData(data) => return Some(data),
            Event::StateChanged {
                channel: ChannelKind::Control,
                state: LinkState::Disconnected,
            } => return None,
            _ => {}
        }
    }
}

async fn run_pids(config: &NtrConfig, json: bool, find: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let (control, mut rx) = connect_control(config).await?;
    control.send_command(Command::PidList, &[], 0, None)?;

    let reply = next_bulk(&mut rx, REPLY_TIMEOUT).await;
    control.disconnect();
    let Some(data) = reply else {
        return Err("no process list received".into());
    };

    let list = match BulkResponse::classify(&data) {
        BulkResponse::ProcessList(list) => list,
        BulkResponse::Message(text) => return Err(format!("unexpected reply: {text}").into()),
    };

    if let Some(name) = find {
        match list.find_pid(&name) {
            Some(pid) => println!("{pid:#010x}"),
            None => return Err(format!("no process matching {name:?}").into()),
        }
    } else if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
    } else {
        for entry in &list.entries {
            println!("{:#010x}  {}", entry.pid, entry.name);
        }
    }
    Ok(())
}

async fn run_send(
    config: &NtrConfig,
    command: Command,
    args: &[u32],
    length: u32,
    data: Option<Bytes>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (control, mut rx) = connect_control(config).await?;
    control.send_command(command, args, length, data)?;
    info!("sent {command} with {} args", args.len());

    match next_bulk(&mut rx, REPLY_TIMEOUT).await {
        Some(data) => match BulkResponse::classify(&data) {
            BulkResponse::Message(text) => println!("{text}"),
            BulkResponse::ProcessList(list) => {
                for entry in &list.entries {
                    println!("{}", entry.line);
                }
            }
        },
        None => warn!("no reply from console"),
    }
    control.disconnect();
    Ok(())
}
