//! Configuration loading for the music tagger
//!
//! Resolution priority (highest first):
//! 1. Command-line argument (applied by the binary)
//! 2. Environment variable (`MTAG_*`)
//! 3. TOML config file
//! 4. Compiled default

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default confidence threshold (0-100) for auto-commit routing
pub const DEFAULT_CONFIDENCE_THRESHOLD: u8 = 80;

/// Default delay enforced around remote lookups (seconds)
pub const DEFAULT_RATE_LIMIT_DELAY_SECS: f64 = 0.5;

/// Default settle delay after a tag write (seconds)
pub const DEFAULT_WRITE_DELAY_SECS: f64 = 0.5;

/// Largest accepted rate-limit or settle delay (seconds)
pub const MAX_DELAY_SECS: f64 = 3600.0;

/// Database file name inside the data directory
pub const DATABASE_FILE_NAME: &str = "music_tagger.db";

/// Tagger configuration
///
/// Every field has a compiled default so a partial TOML file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggerConfig {
    /// Confidence (0-100) at or above which a match is committed without review
    pub confidence_threshold: u8,
    /// Fixed delay before each remote lookup
    pub rate_limit_delay_secs: f64,
    /// Settle delay after a successful tag write
    pub write_delay_secs: f64,
    /// AcoustID application key
    pub acoustid_api_key: Option<String>,
    /// Directory holding the job database
    pub data_dir: PathBuf,
    /// Root of the music library used by seeding
    pub music_dir: PathBuf,
    /// fpcalc executable
    pub fpcalc_path: String,
    /// Workers polling the analysis channel
    pub analysis_workers: usize,
    /// Workers polling the processing channel
    pub processing_workers: usize,
    /// Idle poll interval for workers
    pub poll_interval_ms: u64,
    /// How long a dequeued delivery stays invisible before redelivery
    pub delivery_lease_secs: u64,
    /// Age after which a claimed job is considered abandoned
    pub stale_after_secs: u64,
    /// Interval between stale sweeps
    pub sweep_interval_secs: u64,
    /// Review API bind address
    pub bind_addr: String,
    /// Default log level when RUST_LOG is unset
    pub log_level: String,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            rate_limit_delay_secs: DEFAULT_RATE_LIMIT_DELAY_SECS,
            write_delay_secs: DEFAULT_WRITE_DELAY_SECS,
            acoustid_api_key: None,
            data_dir: default_data_dir(),
            music_dir: PathBuf::from("/music"),
            fpcalc_path: "fpcalc".to_string(),
            analysis_workers: 2,
            processing_workers: 1,
            poll_interval_ms: 500,
            delivery_lease_secs: 300,
            stale_after_secs: 3600,
            sweep_interval_secs: 60,
            bind_addr: "127.0.0.1:8080".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl TaggerConfig {
    /// Load configuration from TOML (explicit path or platform default) and environment
    ///
    /// A missing default config file is not an error: defaults are used with a warning.
    /// An explicit path that cannot be read or parsed is a configuration error.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match explicit_path {
            Some(path) => Self::from_toml_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_toml_file(&path)?,
                Some(path) => {
                    warn!(
                        "Config file not found at {}, using compiled defaults",
                        path.display()
                    );
                    Self::default()
                }
                None => {
                    warn!("Could not determine config directory, using compiled defaults");
                    Self::default()
                }
            },
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read config {} failed: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse TOML content
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Apply `MTAG_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_value("MTAG_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = parse_env("MTAG_CONFIDENCE_THRESHOLD", &value)?;
        }
        if let Some(value) = env_value("MTAG_RATE_LIMIT_DELAY") {
            self.rate_limit_delay_secs = parse_env("MTAG_RATE_LIMIT_DELAY", &value)?;
        }
        if let Some(value) = env_value("MTAG_WRITE_DELAY") {
            self.write_delay_secs = parse_env("MTAG_WRITE_DELAY", &value)?;
        }
        if let Some(value) = env_value("MTAG_ACOUSTID_API_KEY") {
            self.acoustid_api_key = Some(value);
        }
        if let Some(value) = env_value("MTAG_DATA_DIR") {
            self.data_dir = PathBuf::from(value);
        }
        if let Some(value) = env_value("MTAG_MUSIC_DIR") {
            self.music_dir = PathBuf::from(value);
        }
        if let Some(value) = env_value("MTAG_FPCALC") {
            self.fpcalc_path = value;
        }
        if let Some(value) = env_value("MTAG_ANALYSIS_WORKERS") {
            self.analysis_workers = parse_env("MTAG_ANALYSIS_WORKERS", &value)?;
        }
        if let Some(value) = env_value("MTAG_PROCESSING_WORKERS") {
            self.processing_workers = parse_env("MTAG_PROCESSING_WORKERS", &value)?;
        }
        if let Some(value) = env_value("MTAG_BIND_ADDR") {
            self.bind_addr = value;
        }
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.confidence_threshold > 100 {
            return Err(Error::Config(format!(
                "confidence_threshold must be within 0-100, got {}",
                self.confidence_threshold
            )));
        }
        for (name, value) in [
            ("rate_limit_delay_secs", self.rate_limit_delay_secs),
            ("write_delay_secs", self.write_delay_secs),
        ] {
            if !value.is_finite() || !(0.0..=MAX_DELAY_SECS).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be within 0-{} seconds, got {}",
                    name, MAX_DELAY_SECS, value
                )));
            }
        }
        // A claim may only be recovered once its delivery lease has run out
        if self.stale_after_secs == 0 || self.stale_after_secs <= self.delivery_lease_secs {
            return Err(Error::Config(format!(
                "stale_after_secs ({}) must be greater than delivery_lease_secs ({})",
                self.stale_after_secs, self.delivery_lease_secs
            )));
        }
        if self.delivery_lease_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "delivery_lease_secs and sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.analysis_workers == 0 || self.processing_workers == 0 {
            return Err(Error::Config(
                "worker counts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether an AcoustID key is configured (non-empty, non-whitespace)
    pub fn has_acoustid_api_key(&self) -> bool {
        self.acoustid_api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }

    /// Job database location
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        delay_from_secs(self.rate_limit_delay_secs)
    }

    pub fn write_delay(&self) -> Duration {
        delay_from_secs(self.write_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn delivery_lease(&self) -> Duration {
        Duration::from_secs(self.delivery_lease_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Platform config file: `<config_dir>/mtag/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mtag").join("config.toml"))
}

/// OS-dependent default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mtag"))
        .unwrap_or_else(|| PathBuf::from("./mtag_data"))
}

/// Clamped to `0..=MAX_DELAY_SECS`; NaN becomes zero
fn delay_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_DELAY_SECS)).unwrap_or_default()
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}={:?} is invalid: {}", name, value, e)))
}
