//! Client side of the hub WebSocket API.
//!
//! Provides the transport pipeline, the authenticated [`Connection`] with
//! command/result correlation, background result supervision, and the
//! [`ConnectionRunner`] reconnect loop. [`RestClient`] covers the handful of
//! REST endpoints with no WebSocket equivalent.

mod api;
pub mod backoff;
pub mod client;
pub mod connection;
pub mod error;
mod handshake;
mod pending;
pub mod rest;
pub mod runner;
pub mod settings;
pub mod supervisor;
pub mod transport;
pub mod types;
pub mod ws_client;

pub(crate) mod pumps {
    pub(crate) mod read;
    pub(crate) mod write;
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

#[cfg(test)]
mod test_log;

pub use backoff::{BackoffError, ProgressiveBackoff};
pub use client::{ConnectOptions, HubClient, establish};
pub use connection::{Connection, ConnectionOptions, EventSubscription};
pub use error::{ConnectError, ConnectionError, EventRecvError, RunnerError, TransportError};
pub use rest::{RestClient, RestError};
pub use runner::{ConnectionRunner, Connector};
pub use settings::{HubSettings, SettingsError};
pub use supervisor::ResultSupervisor;
pub use transport::{FrameKind, Received, SocketState, TransportPipeline, WebSocketClient};
pub use types::{DisconnectReason, ReconnectConfig, RunnerState};
pub use ws_client::TungsteniteSocket;
