//! Relay configuration
//!
//! Loaded from TOML (or JSON, for configs written by the game-side mod) and
//! validated before the server is started. Every field has a default so a
//! missing file or a partial file still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;

/// Socket tuning applied through `socket2` at bind time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Kernel receive buffer size in bytes
    pub recv_buffer_size: usize,
    /// Kernel send buffer size in bytes
    pub send_buffer_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
            send_buffer_size: DEFAULT_SOCKET_BUFFER_SIZE,
        }
    }
}

/// Voice relay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Whether voice chat is enabled at all
    #[serde(alias = "Enabled")]
    pub enabled: bool,

    /// UDP port the relay listens on and advertises in handshake replies
    #[serde(alias = "Port")]
    pub port: u16,

    /// Hearing range in world units; frames are not relayed beyond it
    #[serde(alias = "MaxRange")]
    pub max_range: f32,

    /// Codec label. Not interpreted by the relay.
    #[serde(alias = "Codec")]
    pub codec: String,

    /// Enables the distance post-processing hook
    #[serde(alias = "Muffling")]
    pub muffling: bool,

    /// Local address to bind
    pub bind_address: IpAddr,

    /// Evict participants not updated for this many seconds (0 = never)
    pub participant_timeout_secs: u64,

    /// Log relay statistics every this many seconds (0 = never)
    pub stats_interval_secs: u64,

    /// Cadence at which attached position sources are polled
    pub position_sync_ms: u64,

    pub socket: SocketConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_UDP_PORT,
            max_range: DEFAULT_MAX_RANGE,
            codec: DEFAULT_CODEC.to_string(),
            muffling: true,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            participant_timeout_secs: 0,
            stats_interval_secs: 0,
            position_sync_ms: DEFAULT_POSITION_SYNC_MS,
            socket: SocketConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Default config file location in the platform config directory
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "spatial-voice-relay")
            .map(|dirs| dirs.config_dir().join("relay.toml"))
            .unwrap_or_else(|| PathBuf::from("relay.toml"))
    }

    /// Load configuration from a file.
    ///
    /// A missing file yields the defaults. Files ending in `.json` are parsed
    /// as JSON, anything else as TOML. The result is validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config = if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_toml_str(&contents)
        }
        .map_err(|reason| ConfigError::Parse {
            path: path.display().to_string(),
            reason,
        })?;

        config.validate()?;
        Ok(config)
    }

    fn from_toml_str(contents: &str) -> Result<Self, String> {
        toml::from_str(contents).map_err(|e| e.to_string())
    }

    fn from_json_str(contents: &str) -> Result<Self, String> {
        serde_json::from_str(contents).map_err(|e| e.to_string())
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: "<memory>".to_string(),
            reason: e.to_string(),
        })
    }

    /// Reject values the relay cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.max_range.is_finite() || self.max_range <= 0.0 {
            return Err(ConfigError::InvalidMaxRange(self.max_range));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.position_sync_ms == 0 {
            return Err(ConfigError::InvalidSyncInterval);
        }
        Ok(())
    }

    /// Address the relay socket binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Stale participant timeout, if enabled
    pub fn participant_timeout(&self) -> Option<Duration> {
        (self.participant_timeout_secs > 0)
            .then(|| Duration::from_secs(self.participant_timeout_secs))
    }

    /// Statistics logging interval, if enabled
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    /// Position source polling interval
    pub fn position_sync_interval(&self) -> Duration {
        Duration::from_millis(self.position_sync_ms)
    }
}
