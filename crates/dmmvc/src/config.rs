//! Application configuration.
//!
//! Values are layered: built-in defaults, then the TOML config file, then
//! `DMMVC__SECTION__KEY` environment variables.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::ws::WebSocketConfig;

pub const APP_NAME: &str = "dmmvc";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub features: FeaturesConfig,
    pub websocket: WebSocketConfig,
    pub cors: CorsConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.websocket.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Append logs to this file instead of stderr.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Optional subsystems. Everything is off unless enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub websocket: bool,
    pub redis: bool,
    pub swagger: bool,
    pub file_upload: bool,
    pub i18n: bool,
    pub queue: bool,
    pub email: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed for cross-origin HTTP requests. Empty disables CORS.
    pub allowed_origins: Vec<String>,
}

/// Load configuration from `path` (if it exists) and the environment.
pub fn load(path: &Path) -> Result<AppConfig> {
    let built = Config::builder()
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(&env_prefix())
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("websocket.allowed_origins")
                .with_list_parse_key("cors.allowed_origins"),
        )
        .build()
        .with_context(|| format!("reading configuration from {}", path.display()))?;

    let config: AppConfig = built
        .try_deserialize()
        .context("parsing configuration")?;
    config.validate()?;
    Ok(config)
}

/// Write the default configuration to `path`, creating parent directories.
pub fn write_default(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let toml = toml::to_string_pretty(&AppConfig::default())
        .context("serializing default config to TOML")?;
    let mut body = String::new();
    body.push_str("# Configuration for ");
    body.push_str(APP_NAME);
    body.push('\n');
    body.push_str("# File: ");
    body.push_str(&path.display().to_string());
    body.push_str("\n\n");
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
