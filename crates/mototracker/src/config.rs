//! Configuration management for mototracker.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::NaiveTime;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "mototracker";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "mototracker.db";

/// `HH:MM` on a 24-hour clock.
fn daily_at_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").expect("valid time pattern"))
}

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `MOTOTRACKER_`, sections separated by `__`)
/// 2. TOML config file at `~/.config/mototracker/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Device link configuration.
    pub link: LinkConfig,
    /// Crash detection configuration.
    pub detection: DetectionConfig,
    /// Remote document store configuration.
    pub remote: RemoteConfig,
    /// Batch sync configuration.
    pub sync: SyncConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/mototracker/mototracker.db`
    pub database_path: Option<PathBuf>,
}

/// How the device byte stream is cut into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingMode {
    /// Every non-empty read is one frame.
    Chunk,
    /// Complete top-level JSON objects are extracted across reads.
    #[default]
    Json,
}

/// Device link configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Address the device listener binds to.
    pub bind_addr: String,
    /// Frame splitting strategy.
    pub framing: FramingMode,
    /// Size of the socket read buffer in bytes.
    pub read_buffer_bytes: usize,
    /// Largest partial frame kept while waiting for the rest of it.
    pub max_frame_bytes: usize,
    /// Capacity of the channel between the link and the ingest pipeline.
    pub channel_capacity: usize,
}

/// Crash detection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Acceleration magnitude (m/s²) above which a frame is an accident.
    pub accel_threshold: f64,
    /// Angular-rate magnitude above which a frame is an accident.
    pub gyro_threshold: f64,
}

/// Remote document store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the document store. Uploads are disabled when unset.
    pub base_url: Option<String>,
    /// Bearer token sent with every request.
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Batch sync configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Local time of day (`HH:MM`) at which the daily sync runs.
    pub daily_at: String,
    /// How many times a failed run is retried before waiting for the next day.
    pub max_retries: u32,
    /// Also push sensor samples whose immediate upload failed.
    pub include_sensor_backlog: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7070".to_string(),
            framing: FramingMode::Json,
            read_buffer_bytes: 1024,
            max_frame_bytes: 64 * 1024,
            channel_capacity: 256,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            accel_threshold: 15.0,
            gyro_threshold: 20.0,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            daily_at: "12:00".to_string(),
            max_retries: 4,
            include_sensor_backlog: true,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("MOTOTRACKER_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.link.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(Error::ConfigValidation {
                message: format!("invalid link.bind_addr: {}", self.link.bind_addr),
            });
        }

        if self.link.read_buffer_bytes == 0 || self.link.channel_capacity == 0 {
            return Err(Error::ConfigValidation {
                message: "read_buffer_bytes and channel_capacity must be greater than 0"
                    .to_string(),
            });
        }

        if self.link.max_frame_bytes < self.link.read_buffer_bytes {
            return Err(Error::ConfigValidation {
                message: format!(
                    "max_frame_bytes ({}) cannot be smaller than read_buffer_bytes ({})",
                    self.link.max_frame_bytes, self.link.read_buffer_bytes
                ),
            });
        }

        for (name, value) in [
            ("accel_threshold", self.detection.accel_threshold),
            ("gyro_threshold", self.detection.gyro_threshold),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must be a positive number, got {value}"),
                });
            }
        }

        if let Some(url) = &self.remote.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::ConfigValidation {
                    message: format!("remote.base_url must be an http(s) URL: {url}"),
                });
            }
        }

        if self.remote.timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "remote.timeout_secs must be greater than 0".to_string(),
            });
        }

        self.sync_time()?;
        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the remote request timeout as a Duration.
    #[must_use]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }

    /// Parse the daily sync time.
    ///
    /// # Errors
    ///
    /// Returns an error if `sync.daily_at` is not a valid `HH:MM` time.
    pub fn sync_time(&self) -> Result<NaiveTime> {
        if !daily_at_pattern().is_match(&self.sync.daily_at) {
            return Err(Error::ConfigValidation {
                message: format!("sync.daily_at must be HH:MM, got {}", self.sync.daily_at),
            });
        }
        NaiveTime::parse_from_str(&self.sync.daily_at, "%H:%M").map_err(|e| {
            Error::ConfigValidation {
                message: format!("sync.daily_at: {e}"),
            }
        })
    }
}
