//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/chatlore/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/chatlore/` (~/.config/chatlore/)
//! - Data (stores): `$XDG_DATA_HOME/chatlore/` (~/.local/share/chatlore/)
//! - State/Logs: `$XDG_STATE_HOME/chatlore/` (~/.local/state/chatlore/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

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
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Import pipeline tuning
    #[serde(default)]
    pub import: ImportConfig,

    /// Analytics tuning
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Import pipeline configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    /// Records per parser `Messages` batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Messages per write transaction
    #[serde(default = "default_commit_interval")]
    pub commit_interval: usize,

    /// Messages between forced WAL checkpoints (must be >> commit_interval)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,

    /// File size above which preprocessable formats are preprocessed
    #[serde(default = "default_preprocess_threshold")]
    pub preprocess_threshold_bytes: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            commit_interval: default_commit_interval(),
            checkpoint_interval: default_checkpoint_interval(),
            preprocess_threshold_bytes: default_preprocess_threshold(),
        }
    }
}

fn default_batch_size() -> usize {
    2_000
}

fn default_commit_interval() -> usize {
    50_000
}

fn default_checkpoint_interval() -> usize {
    500_000
}

fn default_preprocess_threshold() -> u64 {
    64 * 1024 * 1024
}

/// Analytics configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    /// Gap between consecutive messages that starts a new chat session, seconds
    #[serde(default = "default_session_gap_secs")]
    pub session_gap_secs: i64,

    /// Keyword list for the laugh analysis; empty means built-in defaults
    #[serde(default)]
    pub laugh_keywords: Vec<String>,

    /// Minimum total mentions between a pair for the balanced-pair ranking
    #[serde(default = "default_min_pair_mentions")]
    pub min_pair_mentions: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            session_gap_secs: default_session_gap_secs(),
            laugh_keywords: Vec::new(),
            min_pair_mentions: default_min_pair_mentions(),
        }
    }
}

fn default_session_gap_secs() -> i64 {
    1_800
}

fn default_min_pair_mentions() -> u64 {
    10
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
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
    /// Load configuration from the default path, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Path to the config file
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("chatlore").join("config.toml")
    }

    /// Directory where session store files live
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("chatlore")
    }

    /// Directory for logs
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("chatlore")
    }

    /// Path to the log file
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("chatlore.log")
    }
}
