//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ntrview_core::network::{DEFAULT_CONTROL_PORT, DEFAULT_HZ_PORT};
use ntrview_core::stream::DEFAULT_STREAM_PORT;
use ntrview_core::{ControlConfig, HzOptions, ReassemblerConfig, ReceiverConfig, RemotePlayOptions};

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NtrConfig {
    /// Where the console is.
    pub device: DeviceConfig,
    /// Command port behaviour.
    pub control: ControlSettings,
    /// Streaming parameters.
    pub stream: StreamSettings,
    /// Logging.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Console IP address or host name.
    pub host: String,
    pub control_port: u16,
    /// Local UDP port the console streams frames to.
    pub stream_port: u16,
    pub hz_port: u16,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    /// Heartbeat period in milliseconds (0 disables it).
    pub heartbeat_interval_ms: u64,
    /// Wait between the remote-play request and reconnecting.
    pub reconnect_delay_ms: u64,
}

/// Which streaming firmware the console runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    #[default]
    Ntr,
    #[value(name = "hzmod")]
    HzMod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub mode: StreamMode,
    /// Preferred screen: 1 = top, 0 = bottom.
    pub screen_priority: u32,
    pub priority_factor: u32,
    /// JPEG quality (NTR remote play and HzMod).
    pub jpeg_quality: u32,
    /// Bandwidth ceiling in Mbit/s.
    pub qos_value: u32,
    /// HzMod CPU cap, 0 = leave alone.
    pub cpu_limit: u32,
    /// Drop NTR frames that do not end with a JPEG EOI marker.
    pub validate_jpeg_trailer: bool,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive.
    pub level: String,
    /// Optional log file; empty logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".into(),
            control_port: DEFAULT_CONTROL_PORT,
            stream_port: DEFAULT_STREAM_PORT,
            hz_port: DEFAULT_HZ_PORT,
            connect_timeout_ms: 5000,
        }
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
            reconnect_delay_ms: 3000,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        let remote = RemotePlayOptions::default();
        Self {
            mode: StreamMode::Ntr,
            screen_priority: remote.screen_priority,
            priority_factor: remote.priority_factor,
            jpeg_quality: remote.jpeg_quality,
            qos_value: remote.qos_value,
            cpu_limit: 0,
            validate_jpeg_trailer: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

/// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No readable file; defaults used.
    Missing,
    /// The file did not parse; defaults used.
    Invalid(String),
}

impl ConfigSource {
    /// Log how the configuration at `path` was obtained.
    pub fn log(&self, path: &Path) {
        match self {
            ConfigSource::File => tracing::info!("loaded config from {}", path.display()),
            ConfigSource::Missing => {
                tracing::info!("no config at {}; using defaults", path.display())
            }
            ConfigSource::Invalid(e) => {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display())
            }
        }
    }
}

impl NtrConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        let (config, source) = Self::load_with_source(path);
        source.log(path);
        config
    }

    /// Like [`load`](Self::load) but leaves reporting to the caller,
    /// for use before a subscriber is installed.
    pub fn load_with_source(path: &Path) -> (Self, ConfigSource) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, ConfigSource::File),
                Err(e) => (Self::default(), ConfigSource::Invalid(e.to_string())),
            },
            Err(_) => (Self::default(), ConfigSource::Missing),
        }
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    // ── Conversions into core option structs ─────────────────────

    fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.device.connect_timeout_ms)
    }

    pub fn control_config(&self) -> ControlConfig {
        ControlConfig {
            port: self.device.control_port,
            heartbeat_interval: Duration::from_millis(self.control.heartbeat_interval_ms),
            reconnect_delay: Duration::from_millis(self.control.reconnect_delay_ms),
            connect_timeout: self.connect_timeout(),
        }
    }

    pub fn remote_play_options(&self) -> RemotePlayOptions {
        RemotePlayOptions {
            screen_priority: self.stream.screen_priority,
            priority_factor: self.stream.priority_factor,
            jpeg_quality: self.stream.jpeg_quality,
            qos_value: self.stream.qos_value,
        }
    }

    pub fn hz_options(&self) -> HzOptions {
        HzOptions {
            port: self.device.hz_port,
            quality: self.stream.jpeg_quality,
            cpu_limit: self.stream.cpu_limit,
            connect_timeout: self.connect_timeout(),
        }
    }

    pub fn receiver_config(&self) -> ReceiverConfig {
        ReceiverConfig {
            port: self.device.stream_port,
            reassembly: ReassemblerConfig {
                validate_jpeg_trailer: self.stream.validate_jpeg_trailer,
            },
            ..Default::default()
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
