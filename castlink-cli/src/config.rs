//! Command-line client configuration.

use std::path::Path;
use std::time::Duration;

use castlink_core::{AddressFamily, ReachabilityProbe, StreamConfiguration};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the command-line client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Host port layout.
    pub ports: PortConfig,
    /// Stream parameters handed to the session.
    pub stream: StreamConfiguration,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host name or address literal.
    pub host: String,
    /// Connect timeout for stream sockets in milliseconds.
    pub connect_timeout_ms: u64,
    /// Port probed during resolution; 0 disables probing.
    pub test_port: u16,
    /// Probe even when the host resolves to a single address.
    pub always_test: bool,
    /// Address families resolution may return.
    pub family: AddressFamily,
    /// Server major version reported to the session.
    pub server_major_version: u32,
}

/// Ports the host listens on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// RTSP handshake (TCP).
    pub rtsp: u16,
    /// Control stream (TCP).
    pub control: u16,
    /// Video stream (UDP).
    pub video: u16,
    /// Audio stream (UDP).
    pub audio: u16,
    /// Input stream (TCP).
    pub input: u16,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level, used when `RUST_LOG` is unset.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            connect_timeout_ms: 10_000,
            test_port: castlink_core::config::DEFAULT_TEST_PORT,
            always_test: false,
            family: AddressFamily::Any,
            server_major_version: 7,
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            rtsp: 48010,
            control: 47995,
            video: 47998,
            audio: 48000,
            input: 35043,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CliConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// The default config as TOML.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = Self::default_toml().map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// The stream configuration with the `[network]` resolution
    /// settings folded in.
    pub fn stream_configuration(&self) -> StreamConfiguration {
        let probe = (self.network.test_port != 0).then(|| ReachabilityProbe {
            port: self.network.test_port,
            always_test: self.network.always_test,
        });
        StreamConfiguration {
            address_family: self.network.family,
            reachability: probe,
            ..self.stream.clone()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.network.connect_timeout_ms)
    }
}

// ── Tests ────────────────────────────────────────────────────────
