//! Connection settings.
//!
//! Stored as TOML:
//!
//! ```toml
//! host = "homeassistant.local"
//! port = 8123
//! ssl = false
//! token = "..."
//!
//! [reconnect]
//! initial_delay_ms = 5000
//! max_delay_ms = 80000
//! backoff_factor = 2.0
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::ConnectOptions;
use crate::connection::ConnectionOptions;
use crate::types::ReconnectConfig;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub host: String,
    pub port: u16,
    /// Use `wss://` instead of `ws://`.
    pub ssl: bool,
    /// Long-lived access token.
    pub token: String,
    pub websocket_path: String,
    pub reconnect: ReconnectConfig,
    /// Time before a missing command result is logged as a warning.
    pub result_timeout_ms: u64,
    /// Limit for authentication and the readiness check.
    pub handshake_timeout_ms: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8123,
            ssl: false,
            token: String::new(),
            websocket_path: "api/websocket".into(),
            reconnect: ReconnectConfig::default(),
            result_timeout_ms: 20_000,
            handshake_timeout_ms: 5_000,
        }
    }
}

impl HubSettings {
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn websocket_url(&self) -> String {
        let scheme = if self.ssl { "wss" } else { "ws" };
        let path = self.websocket_path.trim_start_matches('/');
        format!("{scheme}://{}:{}/{path}", self.host, self.port)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            connection: ConnectionOptions {
                result_timeout: Duration::from_millis(self.result_timeout_ms),
                ..Default::default()
            },
        }
    }
}
