//! Store configuration from environment variables or a TOML file.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

pub const ENV_STORE_URL: &str = "REGHARVEST_STORE_URL";
pub const ENV_STORE_KEY: &str = "REGHARVEST_STORE_KEY";
pub const ENV_STORE_TABLE: &str = "REGHARVEST_STORE_TABLE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("invalid config file {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Where the circulars table lives and how to authenticate against it.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the hosted store, e.g. `https://abc.supabase.co`.
    pub url: String,
    pub service_key: String,
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_table() -> String {
    "circulars".to_string()
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var(ENV_STORE_URL)
            .map_err(|_| ConfigError::MissingEnv(ENV_STORE_URL))?;
        let service_key = std::env::var(ENV_STORE_KEY)
            .map_err(|_| ConfigError::MissingEnv(ENV_STORE_KEY))?;
        let table = std::env::var(ENV_STORE_TABLE).unwrap_or_else(|_| default_table());
        Ok(Self {
            url,
            service_key,
            table,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}
