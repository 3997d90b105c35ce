//! Error types for the hub connection.

use homelink_protocol::HassError;
use tokio_tungstenite::tungstenite;

use crate::transport::SocketState;

/// Errors from the transport pipeline.
///
/// `NotOpen` is caller misuse (the socket was already gone); `Cancelled`
/// means the read was cut short by a token or by the remote closing.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket is not open (state: {0:?})")]
    NotOpen(SocketState),

    #[error("operation cancelled")]
    Cancelled,

    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("received an empty message")]
    EmptyMessage,

    #[error("socket closed")]
    Closed,
}

/// Errors from sending commands on a [`Connection`](crate::Connection).
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("transport is not open (state: {0:?})")]
    NotOpen(SocketState),

    #[error("connection disposed")]
    Disposed,

    #[error("connection closed before a result arrived")]
    TransportClosed,

    #[error("cancelled")]
    Cancelled,

    #[error("command {command_type} failed: {error}")]
    CommandFailed {
        command_type: String,
        error: HassError,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why an [`EventSubscription`](crate::EventSubscription) yielded no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EventRecvError {
    /// The connection closed and every buffered event was delivered.
    #[error("connection closed")]
    Closed,

    /// The subscriber fell behind and this many messages were dropped. The
    /// subscription stays usable from the oldest message still buffered.
    #[error("subscriber lagged, {0} messages dropped")]
    Lagged(u64),
}

/// Errors from opening and authenticating a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("access token rejected by the hub")]
    Unauthorized,

    #[error("hub is not ready yet")]
    NotReady,

    #[error("connect cancelled")]
    Cancelled,

    #[error("handshake timed out")]
    Timeout,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Terminal outcome of [`ConnectionRunner::run`](crate::ConnectionRunner::run).
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("access token rejected, not retrying")]
    Unauthorized,
}
