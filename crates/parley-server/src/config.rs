//! Server configuration loading from file and environment variables.

use parley_session::ProviderSettings;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Pipeline provider credentials and binary locations.
    #[serde(default)]
    pub providers: ProvidersConfig,
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
    /// Log level filter (e.g., "info", "debug", "parley_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Provider configuration for voice sessions.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// API key for the OpenAI-compatible completion endpoint.
    pub openai_api_key: Option<String>,

    /// Base URL of the completion endpoint.
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    /// Path to the whisper.cpp binary.
    pub whisper_binary: Option<PathBuf>,

    /// Path to the whisper GGML model file.
    pub whisper_model: Option<PathBuf>,

    /// Path to the piper binary.
    pub piper_binary: Option<PathBuf>,

    /// Directory holding piper voice models (`<voice>.onnx`).
    pub piper_voices_dir: Option<PathBuf>,

    /// Substitute mock providers when a session asks for an
    /// unconfigured one instead of failing session start.
    #[serde(default = "default_true")]
    pub allow_mock_fallback: bool,

    /// Treat inbound RTP payloads as raw s16le (loopback deployments).
    #[serde(default)]
    pub pcm_passthrough: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_true() -> bool {
    true
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

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: default_openai_base_url(),
            whisper_binary: None,
            whisper_model: None,
            piper_binary: None,
            piper_voices_dir: None,
            allow_mock_fallback: true,
            pcm_passthrough: false,
        }
    }
}

impl ProvidersConfig {
    /// Converts file-level provider settings into the session manager's
    /// runtime settings.
    pub fn to_settings(&self) -> ProviderSettings {
        ProviderSettings {
            openai_api_key: self.openai_api_key.clone(),
            openai_base_url: self.openai_base_url.clone(),
            whisper_binary: self.whisper_binary.clone(),
            whisper_model: self.whisper_model.clone(),
            piper_binary: self.piper_binary.clone(),
            piper_voices_dir: self.piper_voices_dir.clone(),
            allow_mock_fallback: self.allow_mock_fallback,
            pcm_passthrough: self.pcm_passthrough,
            mock_stt_script: Vec::new(),
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
/// - `PARLEY_HOST` overrides `server.host`
/// - `PARLEY_PORT` overrides `server.port`
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `PARLEY_OPENAI_API_KEY` overrides `providers.openai_api_key`
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

    // Environment variable overrides
    if let Ok(host) = std::env::var("PARLEY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("PARLEY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(level) = std::env::var("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(key) = std::env::var("PARLEY_OPENAI_API_KEY") {
        if !key.is_empty() {
            config.providers.openai_api_key = Some(key);
        }
    }

    Ok(config)
}
