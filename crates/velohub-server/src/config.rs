//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use velohub_monitor::MonitorConfig;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Broadcast buffer and heartbeat settings.
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "velohub_monitor=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The monitor section holds values the dispatcher cannot run with.
    #[error("invalid monitor config: {0}")]
    Monitor(#[from] velohub_monitor::MonitorError),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `VELOHUB_HOST` overrides `server.host`
/// - `VELOHUB_PORT` overrides `server.port`
/// - `VELOHUB_LOG_LEVEL` overrides `logging.level`
/// - `VELOHUB_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `VELOHUB_BUFFER_CAPACITY` overrides `monitor.buffer_capacity`
/// - `VELOHUB_HEARTBEAT_SECS` overrides `monitor.heartbeat_interval_secs`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting monitor settings are invalid.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.monitor.validate()?;

    Ok(config)
}

/// Applies `VELOHUB_*` overrides using `lookup` to read variables.
///
/// Values that fail to parse are ignored.
fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("VELOHUB_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("VELOHUB_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(level) = lookup("VELOHUB_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("VELOHUB_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(capacity) = lookup("VELOHUB_BUFFER_CAPACITY") {
        if let Ok(parsed) = capacity.parse() {
            config.monitor.buffer_capacity = parsed;
        }
    }
    if let Some(secs) = lookup("VELOHUB_HEARTBEAT_SECS") {
        if let Ok(parsed) = secs.parse() {
            config.monitor.heartbeat_interval_secs = parsed;
        }
    }
}
