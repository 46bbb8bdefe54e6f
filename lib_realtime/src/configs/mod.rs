//! # Runtime Configuration
//!
//! Environment-driven configuration for the real-time client core. Every
//! value has a local-development default so the stack comes up without any
//! environment at all; deployments override through variables (binaries load
//! a `.env` file first via `dotenvy`).

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default event channel endpoint when `STOREFRONT_CHANNEL_URL` is unset.
pub const DEFAULT_CHANNEL_URL: &str = "ws://127.0.0.1:4000/ws";
/// Default REST base URL when `STOREFRONT_API_URL` is unset.
/// Must end with a trailing slash so relative paths join correctly.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:4000/api/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime settings shared by the channel, retrieval and notification layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the backend event server.
    pub channel_url: String,
    /// Base URL of the backend REST API.
    pub api_url: String,
    /// Directory for locally-persisted notification state.
    pub data_dir: PathBuf,
    /// Optional bearer token attached to every REST call.
    pub auth_token: Option<String>,
    /// When set, every inbound channel event is logged at debug level.
    pub diagnostics: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_url: DEFAULT_CHANNEL_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            data_dir: default_data_dir(),
            auth_token: None,
            diagnostics: false,
        }
    }
}

impl RealtimeConfig {
    /// Builds the configuration from environment variables, falling back to
    /// local-development defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            channel_url: env::var("STOREFRONT_CHANNEL_URL").unwrap_or(defaults.channel_url),
            api_url: env::var("STOREFRONT_API_URL").unwrap_or(defaults.api_url),
            data_dir: env::var("STOREFRONT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            auth_token: env::var("STOREFRONT_API_TOKEN").ok().filter(|t| !t.is_empty()),
            diagnostics: matches!(
                env::var("STOREFRONT_DIAGNOSTICS").as_deref(),
                Ok("1") | Ok("true")
            ),
        }
    }

    /// Creates the data directory if missing and returns its path.
    pub fn ensure_data_dir(&self) -> Result<PathBuf, ConfigError> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(self.data_dir.clone())
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("storefront-rt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_backend() {
        let config = RealtimeConfig::default();
        assert_eq!(config.channel_url, DEFAULT_CHANNEL_URL);
        assert!(config.api_url.ends_with('/'));
        assert!(config.auth_token.is_none());
        assert!(!config.diagnostics);
    }

    #[test]
    fn ensure_data_dir_creates_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RealtimeConfig {
            data_dir: dir.path().join("nested").join("state"),
            ..RealtimeConfig::default()
        };
        let created = config.ensure_data_dir().expect("create data dir");
        assert!(created.is_dir());
    }
}
