//! Configuration file handling for the multicam CLI.
//!
//! Loads settings from `~/.config/multicam/config.toml` or a custom path.
//! Values merge CLI > config file > built-in defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub rig: RigConfig,
}

/// One-shot capture settings.
#[derive(Debug, Deserialize, Default)]
pub struct SnapshotConfig {
    /// Per-device deadline in milliseconds.
    pub deadline_ms: Option<u64>,
    /// Platform buffer slots per pipeline.
    pub buffer_slots: Option<usize>,
}

/// Watch-mode settings.
#[derive(Debug, Deserialize, Default)]
pub struct WatchConfig {
    /// Interval between read polls in milliseconds.
    pub poll_interval_ms: Option<u64>,
}

/// Simulated rig settings for the demo subcommands.
#[derive(Debug, Deserialize, Default)]
pub struct RigConfig {
    /// Number of simulated cameras.
    pub cameras: Option<usize>,
    /// Delivery cadence of each simulated camera, in milliseconds.
    pub frame_interval_ms: Option<u64>,
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.clone(),
                source: e,
            })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    source
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config/multicam/config.toml")
}
