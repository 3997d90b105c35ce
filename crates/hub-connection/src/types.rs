//! Public types for the connection runner.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{BackoffError, ProgressiveBackoff};
use crate::error::ConnectError;

/// Why a connection ended (or never started).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The hub closed the socket.
    Remote,
    /// We stopped: the runner was cancelled or shut down.
    Client,
    /// The access token was rejected. The runner does not retry.
    Unauthorized,
    /// The hub answered but is still starting up.
    NotReady,
    /// Anything else: network failure, protocol error, timeout.
    Error,
}

impl From<&ConnectError> for DisconnectReason {
    fn from(err: &ConnectError) -> Self {
        match err {
            ConnectError::Unauthorized => DisconnectReason::Unauthorized,
            ConnectError::NotReady => DisconnectReason::NotReady,
            ConnectError::Cancelled => DisconnectReason::Client,
            _ => DisconnectReason::Error,
        }
    }
}

/// Lifecycle of a [`ConnectionRunner`](crate::ConnectionRunner).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    /// The last attempt or connection failed.
    Faulted,
    /// Terminal.
    Stopped,
}

/// Reconnect backoff, in milliseconds so it reads naturally from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5_000,
            max_delay_ms: 80_000,
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Result<ProgressiveBackoff, BackoffError> {
        ProgressiveBackoff::new(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_factor,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[test]
    fn connect_errors_map_to_reasons() {
        assert_eq!(
            DisconnectReason::from(&ConnectError::Unauthorized),
            DisconnectReason::Unauthorized
        );
        assert_eq!(
            DisconnectReason::from(&ConnectError::NotReady),
            DisconnectReason::NotReady
        );
        assert_eq!(
            DisconnectReason::from(&ConnectError::Cancelled),
            DisconnectReason::Client
        );
        assert_eq!(
            DisconnectReason::from(&ConnectError::Transport(TransportError::Closed)),
            DisconnectReason::Error
        );
        assert_eq!(
            DisconnectReason::from(&ConnectError::Timeout),
            DisconnectReason::Error
        );
    }

    #[test]
    fn reconnect_config_defaults() {
        let config = ReconnectConfig::default();
        let mut backoff = config.backoff().unwrap();
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(80));
    }

    #[test]
    fn invalid_reconnect_config_is_rejected() {
        let config = ReconnectConfig {
            initial_delay_ms: 0,
            ..Default::default()
        };
        assert_eq!(
            config.backoff().unwrap_err(),
            BackoffError::InvalidInitialDelay
        );
    }
}
