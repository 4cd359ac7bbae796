//! Typed configuration structures
//!
//! Every section has defaults, so an empty file (or no file) is a valid
//! configuration.

use crate::polls::{PollSettings, VotePolicy, DEFAULT_MAX_OPTIONS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// HTTP/WebSocket listener
    pub server: ServerConfig,

    /// Poll persistence
    pub storage: StorageConfig,

    /// Poll actor tunables
    pub polls: PollsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Address to bind
    pub bind: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One directory per poll under `dataDir`
    #[default]
    File,
    /// Process memory; lost on restart
    Memory,
}

/// Persistence configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Data directory for the file backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured data directory, or the platform data directory
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pollcast")
        })
    }
}

/// Poll actor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollsConfig {
    /// Policy for polls created without one
    pub default_policy: VotePolicy,

    /// Seconds an actor without viewers may sit idle (0 = never evict)
    pub idle_timeout_secs: u64,

    /// Pending commands per poll
    pub command_queue_size: usize,

    /// Pending events per viewer before it is disconnected
    pub subscriber_queue_size: usize,

    /// Upper bound on options per poll
    pub max_options: usize,
}

impl Default for PollsConfig {
    fn default() -> Self {
        Self {
            default_policy: VotePolicy::Single,
            idle_timeout_secs: 300,
            command_queue_size: 64,
            subscriber_queue_size: 256,
            max_options: DEFAULT_MAX_OPTIONS,
        }
    }
}

impl PollsConfig {
    pub fn settings(&self) -> PollSettings {
        PollSettings {
            default_policy: self.default_policy,
            max_options: self.max_options,
            command_queue_size: self.command_queue_size,
            subscriber_queue_size: self.subscriber_queue_size,
            idle_timeout: match self.idle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub enabled: bool,

    /// Filter directive (error, warn, info, debug, trace, or per-target)
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}
