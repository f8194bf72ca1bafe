//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/drover/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/drover/` (~/.config/drover/)
//! - Data: `$XDG_DATA_HOME/drover/` (~/.local/share/drover/)
//! - State/Logs: `$XDG_STATE_HOME/drover/` (~/.local/state/drover/)
//!
//! The pipeline itself never reads the file directly; it consumes a
//! [`PipelineConfig`] through the [`ConfigSource`] capability, retrying
//! until one becomes available.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::future::Future;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Upload pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Drain scheduler timing
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upload pipeline configuration
///
/// The pipeline stays in `AwaitingConfig` until `endpoint` and a device
/// identifier are both available.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PipelineConfig {
    /// Collection endpoint URL
    pub endpoint: Option<String>,

    /// Device identifier; when absent, a generated one is persisted in the
    /// data directory and reused across restarts
    pub identifier: Option<String>,

    /// Server-published public field key, base64 (32 bytes decoded).
    /// Field encryption is disabled when absent.
    pub field_key: Option<String>,
}

impl PipelineConfig {
    /// Check if the pipeline can leave `AwaitingConfig`
    pub fn is_ready(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|s| !s.is_empty())
            && self.identifier.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Drain scheduler timing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Seconds between periodic drain ticks
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Seconds between configuration retries while awaiting config
    #[serde(default = "default_config_retry_secs")]
    pub config_retry_secs: u64,

    /// Write-buffer debounce window in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            config_retry_secs: default_config_retry_secs(),
            debounce_ms: default_debounce_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_tick_secs() -> u64 {
    30
}

fn default_config_retry_secs() -> u64 {
    1
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("drover").join("config.toml")
    }

    /// Returns the queue store database path
    pub fn store_path() -> PathBuf {
        xdg_data_home().join("drover").join("queue.db")
    }

    /// Returns the directory for logs
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("drover")
    }

    /// Resolve the device identifier for this host.
    ///
    /// Uses the configured identifier when set; otherwise generates a UUIDv4
    /// once and persists it under the data directory so the device keeps a
    /// stable identity across restarts.
    pub fn device_identifier(&self) -> Result<String> {
        if let Some(id) = self.pipeline.identifier.as_deref() {
            if !id.is_empty() {
                return Ok(id.to_string());
            }
        }
        persisted_device_identifier(&xdg_data_home().join("drover").join("device-id"))
    }
}

fn persisted_device_identifier(path: &Path) -> Result<String> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &id)?;
    tracing::info!(identifier = %id, "Generated device identifier");
    Ok(id)
}

/// Capability to fetch the pipeline configuration.
///
/// The drain scheduler calls this while in `AwaitingConfig`, retrying on a
/// fixed interval until a ready configuration arrives. `Ok(None)` means
/// "not available yet" and is an expected transient state, not an error.
pub trait ConfigSource {
    fn fetch(&self) -> impl Future<Output = Result<Option<PipelineConfig>>>;
}

/// File-backed configuration source.
///
/// Re-reads the config file on every fetch, so a config dropped in place
/// after startup is picked up by the retry loop.
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> Self {
        Self::new(Config::config_path())
    }
}

impl ConfigSource for FileConfigSource {
    async fn fetch(&self) -> Result<Option<PipelineConfig>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let config = Config::load_from(&self.path)?;
        let mut pipeline = config.pipeline.clone();
        // Apply the persisted-identifier fallback before readiness is judged
        if pipeline.identifier.as_deref().map_or(true, str::is_empty) {
            pipeline.identifier = Some(config.device_identifier()?);
        }
        Ok(Some(pipeline))
    }
}
