//! Configuration loading
//!
//! JSON5 file at `$POLLCAST_CONFIG`, else `<config dir>/pollcast/config.json5`.
//! A missing file means defaults. `POLLCAST_BIND`, `POLLCAST_PORT` and
//! `POLLCAST_DATA_DIR` override the file.

pub mod types;

pub use types::{
    Config, LogFormat, LoggingConfig, PollsConfig, ServerConfig, StorageBackend, StorageConfig,
};

use crate::polls::hub::MIN_QUEUE_SIZE;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "POLLCAST_CONFIG";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },

    #[error("invalid config: {}", format_issues(.0))]
    Invalid(Vec<ConfigIssue>),
}

/// One validation problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigIssue {
    /// Dotted path of the offending key
    pub path: String,
    pub message: String,
}

fn format_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{}: {}", issue.path, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Path of the config file, whether or not it exists
pub fn get_config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pollcast")
        .join("config.json5")
}

/// Load, apply environment overrides and validate
pub fn load_config() -> Result<Config, ConfigError> {
    let mut config = load_config_uncached(&get_config_path())?;
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    let issues = validate_config(&config);
    if !issues.is_empty() {
        return Err(ConfigError::Invalid(issues));
    }
    Ok(config)
}

/// Read and parse one file; a missing file yields defaults
pub fn load_config_uncached(path: &Path) -> Result<Config, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Config::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_config(&raw).map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Parse JSON5 text
pub fn parse_config(raw: &str) -> Result<Config, String> {
    if raw.trim().is_empty() {
        return Ok(Config::default());
    }
    json5::from_str(raw).map_err(|err| err.to_string())
}

/// Apply `POLLCAST_*` overrides read through `lookup`
pub fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(bind) = lookup("POLLCAST_BIND").filter(|v| !v.trim().is_empty()) {
        config.server.bind = bind.trim().to_string();
    }
    if let Some(port) = lookup("POLLCAST_PORT").filter(|v| !v.trim().is_empty()) {
        config.server.port = port.trim().parse().map_err(|_| ConfigError::Env {
            var: "POLLCAST_PORT",
            value: port,
        })?;
    }
    if let Some(dir) = lookup("POLLCAST_DATA_DIR").filter(|v| !v.trim().is_empty()) {
        config.storage.data_dir = Some(PathBuf::from(dir));
    }
    Ok(())
}

/// Check value ranges; returns every problem found
pub fn validate_config(config: &Config) -> Vec<ConfigIssue> {
    let mut issues = Vec::new();
    let mut issue = |path: &str, message: &str| {
        issues.push(ConfigIssue {
            path: path.to_string(),
            message: message.to_string(),
        })
    };

    if config.server.port == 0 {
        issue("server.port", "must be between 1 and 65535");
    }
    if config.server.bind.parse::<std::net::IpAddr>().is_err() {
        issue("server.bind", "must be an IP address");
    }
    if config.polls.command_queue_size == 0 {
        issue("polls.commandQueueSize", "must be at least 1");
    }
    if config.polls.subscriber_queue_size < MIN_QUEUE_SIZE {
        issue("polls.subscriberQueueSize", "must be at least 2");
    }
    if config.polls.max_options < 2 {
        issue("polls.maxOptions", "must be at least 2");
    }
    if config.logging.level.trim().is_empty() {
        issue("logging.level", "must not be empty");
    }
    issues
}

impl ServerConfig {
    /// Listen address; only valid after `validate_config` passed
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self.bind.parse().map_err(|_| {
            ConfigError::Invalid(vec![ConfigIssue {
                path: "server.bind".to_string(),
                message: "must be an IP address".to_string(),
            }])
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
