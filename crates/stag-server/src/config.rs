//! Configuration loading: defaults, optional YAML file, environment.
//!
//! Precedence is defaults < config file < `STAG_*` environment variables,
//! with `ARANGO_PASSWORD` as a fallback for the database password. A
//! missing password is fatal at startup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stag_store::StoreConfig;
use thiserror::Error;

const CONFIG_PATHS: &[&str] = &["config.yaml", "config/config.yaml", "/etc/stag/config.yaml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("error parsing config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
    #[error("database password is required (set STAG_DATABASE_PASSWORD or ARANGO_PASSWORD)")]
    MissingPassword,
    #[error("{0}")]
    Invalid(String),
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub log_level: String,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            log_level: "info".into(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8529".into(),
            database: "stag".into(),
            username: "root".into(),
            password: String::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".into(),
        }
    }
}

impl Config {
    /// Load configuration from the file search paths and the environment.
    pub fn load(explicit_path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match find_config_file(explicit_path) {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                serde_yaml::from_str(&text)?
            }
            None => Config::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;

        if config.database.password.is_empty() {
            return Err(ConfigError::MissingPassword);
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STAG_SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("STAG_SERVER_PORT") {
            self.server.port = v.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "STAG_SERVER_PORT".into(),
                value: v,
            })?;
        }
        if let Some(v) = lookup("STAG_DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = lookup("STAG_DATABASE_DATABASE") {
            self.database.database = v;
        }
        if let Some(v) = lookup("STAG_DATABASE_USERNAME") {
            self.database.username = v;
        }
        if let Some(v) = lookup("STAG_DATABASE_PASSWORD") {
            self.database.password = v;
        }
        if self.database.password.is_empty() {
            if let Some(v) = lookup("ARANGO_PASSWORD") {
                self.database.password = v;
            }
        }
        if let Some(v) = lookup("STAG_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("STAG_METRICS_ENABLED") {
            self.metrics.enabled = v.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "STAG_METRICS_ENABLED".into(),
                value: v,
            })?;
        }
        if let Some(v) = lookup("STAG_METRICS_PATH") {
            self.metrics.path = v;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server port is required".into()));
        }
        if self.database.url.is_empty() {
            return Err(ConfigError::Invalid("database URL is required".into()));
        }
        if self.database.database.is_empty() {
            return Err(ConfigError::Invalid("database name is required".into()));
        }
        if self.database.username.is_empty() {
            return Err(ConfigError::Invalid("database username is required".into()));
        }
        Ok(())
    }

    /// Connection parameters for the store layer.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            url: self.database.url.clone(),
            database: self.database.database.clone(),
            username: self.database.username.clone(),
            password: self.database.password.clone(),
        }
    }
}

fn find_config_file(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }
    CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}
