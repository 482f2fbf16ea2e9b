//! Configuration resolution for tether.
//!
//! Resolution order:
//! 1. Built-in defaults
//! 2. Global settings file (~/.config/tether/settings.json on Linux)
//! 3. Environment variables / CLI arguments, applied by the binary
//!
//! The settings file may be partial; missing sections fall back to the
//! defaults via serde.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete tether configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Worker process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Path to the worker binary.
    pub worker_bin: PathBuf,
    /// Working directory for the worker. Falls back to the home directory.
    pub working_directory: Option<PathBuf>,
    /// Model selector forwarded to the worker, if any.
    pub model: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_bin: PathBuf::from("claude"),
            working_directory: None,
            model: None,
        }
    }
}

/// Request bridge and supervisor timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Per-request timeout (seconds), measured from send time.
    pub request_timeout_secs: u64,
    /// Initial restart backoff delay (seconds).
    pub restart_initial_delay_secs: u64,
    /// Restart backoff cap (seconds).
    pub restart_max_delay_secs: u64,
    /// Seconds to wait for graceful worker shutdown before SIGKILL.
    pub terminate_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 180,
            restart_initial_delay_secs: 1,
            restart_max_delay_secs: 60,
            terminate_timeout_secs: 5,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration: defaults overlaid with the global settings file.
pub fn load_config() -> Result<Config> {
    match global_config_path() {
        Some(path) if path.exists() => load_config_file(&path),
        _ => Ok(Config::default()),
    }
}

/// Load configuration from a specific settings file.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })
}

/// Get the global settings file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".tether").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/tether/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
            .map(|p| p.join("tether").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}
