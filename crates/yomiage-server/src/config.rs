//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use thiserror::Error;
use yomiage_voice::{CodecConfig, EngineConfig, PlaybackConfig, ReconnectConfig};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Synthesis engine endpoint and retry policy.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Encoder worker pool.
    #[serde(default)]
    pub codec: CodecConfig,

    /// Playback waits.
    #[serde(default)]
    pub playback: PlaybackConfig,

    /// Session restoration timings.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Where state files live.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
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

/// Persistent storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory for voice profiles, the speaker cache and channel state.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "yomiage_voice=debug,info").
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

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
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

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
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
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `YOMIAGE_HOST` overrides `server.host`
/// - `YOMIAGE_PORT` overrides `server.port`
/// - `YOMIAGE_ENGINE_URL` overrides `engine.base_url`
/// - `YOMIAGE_FFMPEG_PATH` overrides `codec.ffmpeg_path`
/// - `YOMIAGE_DATA_DIR` overrides `storage.data_dir`
/// - `YOMIAGE_LOG_LEVEL` overrides `logging.level`
/// - `YOMIAGE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
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
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("YOMIAGE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("YOMIAGE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = var("YOMIAGE_ENGINE_URL") {
        config.engine.base_url = url;
    }
    if let Some(ffmpeg) = var("YOMIAGE_FFMPEG_PATH") {
        config.codec.ffmpeg_path = ffmpeg;
    }
    if let Some(dir) = var("YOMIAGE_DATA_DIR") {
        config.storage.data_dir = PathBuf::from(dir);
    }
    if let Some(level) = var("YOMIAGE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("YOMIAGE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
