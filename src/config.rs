//! Configuration management for notesync.
//!
//! This module handles loading and saving configuration to/from a JSON file
//! in a config directory. The directory can be given explicitly; with the
//! `desktop` feature it defaults to the platform config dir.
//!
//! Settings:
//! - database_file: path of the local SQLite mirror
//! - remote: base URL, API key and request timeout of the remote data API
//! - seed_defaults: whether bootstrap writes the starter notes
//! - flush_on_start: whether a session pushes pending notes when it starts

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NoteError, NoteResult};

/// Remote data API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the data API, e.g. "https://project.example.co"
    #[serde(default)]
    pub base_url: String,
    /// Public (anon) API key sent with every request
    #[serde(default)]
    pub api_key: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigData {
    /// Path to the database file
    #[serde(default)]
    pub database_file: String,
    /// Remote data API
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Seed starter notes for owners with no notes
    #[serde(default = "default_true")]
    pub seed_defaults: bool,
    /// Flush pending notes when a session starts
    #[serde(default = "default_true")]
    pub flush_on_start: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ConfigData {
    fn default() -> Self {
        Self {
            database_file: String::new(),
            remote: RemoteConfig::default(),
            seed_defaults: true,
            flush_on_start: true,
        }
    }
}

/// Configuration manager
pub struct Config {
    config_dir: PathBuf,
    config_file: PathBuf,
    data: ConfigData,
}

impl Config {
    /// Load (or create) the configuration in `config_dir`.
    ///
    /// Without the `desktop` feature, `config_dir` is required.
    pub fn new(config_dir: Option<PathBuf>) -> NoteResult<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => {
                #[cfg(feature = "desktop")]
                {
                    dirs::config_dir()
                        .unwrap_or_else(|| PathBuf::from("."))
                        .join("notesync")
                }
                #[cfg(not(feature = "desktop"))]
                {
                    return Err(NoteError::Config(
                        "config_dir is required without the desktop feature".to_string(),
                    ));
                }
            }
        };

        fs::create_dir_all(&config_dir)?;
        let config_file = config_dir.join("config.json");

        let data = match fs::read_to_string(&config_file) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %config_file.display(),
                    error = %e,
                    "Config file unreadable, using defaults"
                );
                Self::default_data(&config_dir)
            }),
            Err(_) => Self::default_data(&config_dir),
        };

        let config = Self {
            config_dir,
            config_file,
            data,
        };

        // Save default config if it doesn't exist
        if !config.config_file.exists() {
            config.save()?;
        }

        Ok(config)
    }

    fn default_data(config_dir: &Path) -> ConfigData {
        ConfigData {
            database_file: config_dir.join("notes.db").to_string_lossy().to_string(),
            ..ConfigData::default()
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> NoteResult<()> {
        let content = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    /// Get the configuration directory path
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get the database file path
    pub fn database_file(&self) -> &str {
        &self.data.database_file
    }

    pub fn remote(&self) -> &RemoteConfig {
        &self.data.remote
    }

    pub fn set_remote(&mut self, remote: RemoteConfig) -> NoteResult<()> {
        self.data.remote = remote;
        self.save()
    }

    pub fn seed_defaults(&self) -> bool {
        self.data.seed_defaults
    }

    pub fn flush_on_start(&self) -> bool {
        self.data.flush_on_start
    }

    /// Get a config value by key
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "database_file" => Some(self.data.database_file.clone()),
            "remote.base_url" => Some(self.data.remote.base_url.clone()),
            "remote.api_key" => Some(self.data.remote.api_key.clone()),
            "remote.request_timeout_secs" => {
                Some(self.data.remote.request_timeout_secs.to_string())
            }
            "seed_defaults" => Some(self.data.seed_defaults.to_string()),
            "flush_on_start" => Some(self.data.flush_on_start.to_string()),
            _ => None,
        }
    }

    /// Set a config value by key
    pub fn set(&mut self, key: &str, value: &str) -> NoteResult<()> {
        match key {
            "database_file" => self.data.database_file = value.to_string(),
            "remote.base_url" => self.data.remote.base_url = value.trim_end_matches('/').to_string(),
            "remote.api_key" => self.data.remote.api_key = value.to_string(),
            "remote.request_timeout_secs" => {
                self.data.remote.request_timeout_secs = value.parse().map_err(|_| {
                    NoteError::Config(format!("Invalid timeout: {}", value))
                })?;
            }
            "seed_defaults" => self.data.seed_defaults = parse_bool(key, value)?,
            "flush_on_start" => self.data.flush_on_start = parse_bool(key, value)?,
            _ => return Err(NoteError::Config(format!("Unknown config key: {}", key))),
        }
        self.save()
    }
}

fn parse_bool(key: &str, value: &str) -> NoteResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(NoteError::Config(format!(
            "Invalid boolean for {}: {}",
            key, value
        ))),
    }
}
