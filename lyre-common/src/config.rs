//! Bootstrap configuration
//!
//! Settings come from, in priority order:
//! 1. Command-line arguments / environment (handled by the binary)
//! 2. TOML configuration file
//! 3. Built-in defaults
//!
//! A missing config file is not an error: the service logs a warning and
//! starts with defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5780;

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Streaming engine settings
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            streaming: StreamingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Engine knobs shared by every pipeline the service builds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// When false, `/v1/stream` answers 404
    pub enabled: bool,
    /// Attach a mixer to each pipeline so layers can be added
    pub mixer_enabled: bool,
    /// Resampler quality: best, medium, fastest, zero_order_hold, linear
    pub resampler_quality: String,
    /// Decode operations per scheduling tick
    pub max_decode_ops: usize,
    /// Pause upstream reads above this many buffered compressed bytes
    pub high_water_bytes: usize,
    /// Resume upstream reads below this many buffered compressed bytes
    pub low_water_bytes: usize,
    /// Opus encoder bitrate in bits per second
    pub opus_bitrate: i32,
    /// Interval between buffer pool sweeps
    pub pool_sweep_interval_secs: u64,
    /// Output channel depth, in PCM chunks
    pub output_queue_chunks: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mixer_enabled: true,
            resampler_quality: "fastest".to_string(),
            max_decode_ops: 8,
            high_water_bytes: 256 * 1024,
            low_water_bytes: 128 * 1024,
            opus_bitrate: 128_000,
            pool_sweep_interval_secs: 60,
            output_queue_chunks: 32,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level for the service's own targets when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    "debug".to_string()
}

impl TomlConfig {
    /// Parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TomlConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the explicit path, else the platform default path, else defaults
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            info!("Loading config from {}", path.display());
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => {
                warn!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let s = &self.streaming;
        if s.low_water_bytes >= s.high_water_bytes {
            return Err(Error::Config(format!(
                "low_water_bytes ({}) must be below high_water_bytes ({})",
                s.low_water_bytes, s.high_water_bytes
            )));
        }
        if s.max_decode_ops == 0 {
            return Err(Error::Config("max_decode_ops must be at least 1".to_string()));
        }
        if s.output_queue_chunks == 0 {
            return Err(Error::Config("output_queue_chunks must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Platform config path: `~/.config/lyre/config.toml` on Linux, falling back
/// to `/etc/lyre/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    let user = dirs::config_dir().map(|d| d.join("lyre").join("config.toml"));

    if cfg!(target_os = "linux") {
        if let Some(path) = &user {
            if path.exists() {
                return user;
            }
        }
        let system = PathBuf::from("/etc/lyre/config.toml");
        if system.exists() {
            return Some(system);
        }
    }

    user
}
