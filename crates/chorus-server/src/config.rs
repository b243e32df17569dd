//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (first one found, or `CHORUS_CONFIG`)
//! - Environment variables (`CHORUS_PORT`, `CHORUS_KEEPALIVE__PING_INTERVAL_MS`, ...)

use anyhow::{ensure, Context, Result};
use chorus_core::{ClientConfig, HubConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config files searched, in order, when `CHORUS_CONFIG` is not set.
const CONFIG_PATHS: [&str; 3] = [
    "chorus.toml",
    "/etc/chorus/chorus.toml",
    "~/.config/chorus/chorus.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Keepalive configuration.
    #[serde(default)]
    pub keepalive: KeepaliveConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Query parameter carrying the client's identity.
    #[serde(default = "default_identity_param")]
    pub identity_param: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Capacity of each client's outbound queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of the hub's intakes.
    #[serde(default = "default_hub_capacity")]
    pub hub_capacity: usize,
}

/// Keepalive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Interval between pings in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Extra time after a ping interval before a silent peer is dropped.
    #[serde(default = "default_pong_grace")]
    pub pong_grace_ms: u64,

    /// Bound on a single write in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_identity_param() -> String {
    "nickname".to_string()
}

fn default_max_message_size() -> usize {
    chorus_protocol::MAX_MESSAGE_SIZE
}

fn default_queue_capacity() -> usize {
    chorus_core::client::DEFAULT_QUEUE_CAPACITY
}

fn default_hub_capacity() -> usize {
    chorus_core::hub::DEFAULT_INTAKE_CAPACITY
}

fn default_ping_interval() -> u64 {
    60_000 // 1 minute
}

fn default_pong_grace() -> u64 {
    10_000 // 10 seconds
}

fn default_write_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            keepalive: KeepaliveConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            identity_param: default_identity_param(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            queue_capacity: default_queue_capacity(),
            hub_capacity: default_hub_capacity(),
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            pong_grace_ms: default_pong_grace(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found plus environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or the
    /// result fails validation.
    pub fn load() -> Result<Self> {
        let path = match std::env::var("CHORUS_CONFIG") {
            Ok(path) => Some(PathBuf::from(shellexpand::tilde(&path).as_ref())),
            Err(_) => CONFIG_PATHS
                .iter()
                .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
                .find(|path| path.exists()),
        };

        Self::load_from(path.as_deref())
    }

    /// Load configuration from a specific file (if any) plus environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the result
    /// fails validation.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            ensure!(path.exists(), "Config file not found: {}", path.display());
            builder =
                builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("CHORUS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.transport.websocket_path.starts_with('/'),
            "transport.websocket_path must start with '/'"
        );
        ensure!(
            !self.transport.identity_param.is_empty(),
            "transport.identity_param must not be empty"
        );
        ensure!(self.limits.max_message_size > 0, "limits.max_message_size must be positive");
        ensure!(self.limits.queue_capacity > 0, "limits.queue_capacity must be positive");
        ensure!(self.limits.hub_capacity > 0, "limits.hub_capacity must be positive");
        ensure!(self.keepalive.ping_interval_ms > 0, "keepalive.ping_interval_ms must be positive");
        ensure!(
            self.keepalive.pong_grace_ms > 0,
            "keepalive.pong_grace_ms must be positive so pings precede the read deadline"
        );
        ensure!(self.keepalive.write_timeout_ms > 0, "keepalive.write_timeout_ms must be positive");
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Per-client settings derived from this configuration.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            ping_interval: Duration::from_millis(self.keepalive.ping_interval_ms),
            pong_grace: Duration::from_millis(self.keepalive.pong_grace_ms),
            write_timeout: Duration::from_millis(self.keepalive.write_timeout_ms),
            queue_capacity: self.limits.queue_capacity,
        }
    }

    /// Hub settings derived from this configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            intake_capacity: self.limits.hub_capacity,
        }
    }
}
