//! Message framing over a chunked WebSocket.
//!
//! A WebSocket receive may deliver a message in several chunks; the
//! [`TransportPipeline`] reassembles them into one JSON document, and owns
//! the close handshake so that it is attempted exactly once.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::TransportError;

/// Size of each receive call into the socket.
const RECEIVE_CHUNK_SIZE: usize = 4096;

/// How long a close handshake may take before it is abandoned.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the socket to report `Closed`.
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    /// The remote sent a close frame; our half is still open.
    CloseReceived,
    CloseSent,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
    Close,
}

/// Outcome of a single receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub count: usize,
    pub kind: FrameKind,
    pub end_of_message: bool,
}

/// The socket seen by the pipeline.
///
/// `receive` fills `buf` with at most `buf.len()` bytes of the current
/// message and reports whether the message is complete.
pub trait WebSocketClient: Send + Sync + 'static {
    fn state(&self) -> SocketState;

    fn receive(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<Received, TransportError>> + Send;

    fn send_text(&self, payload: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Full close handshake, initiated locally.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes our half after the remote has already sent its close frame.
    fn close_output(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Typed JSON messages over a [`WebSocketClient`].
pub struct TransportPipeline<S> {
    socket: S,
    read_buf: Mutex<Vec<u8>>,
    close_started: AtomicBool,
    internal_cancel: CancellationToken,
}

impl<S: WebSocketClient> TransportPipeline<S> {
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            read_buf: Mutex::new(Vec::with_capacity(RECEIVE_CHUNK_SIZE)),
            close_started: AtomicBool::new(false),
            internal_cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SocketState {
        self.socket.state()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        let state = self.socket.state();
        if state != SocketState::Open || self.internal_cancel.is_cancelled() {
            return Err(TransportError::NotOpen(state));
        }
        Ok(())
    }

    /// Receives one complete message and deserializes it.
    ///
    /// Resolves to [`TransportError::Cancelled`] when `cancel` fires or when
    /// the remote closes the socket; in the latter case the close handshake
    /// is completed before returning. A literal `null` payload is reported as
    /// [`TransportError::EmptyMessage`].
    pub async fn receive_message<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
    ) -> Result<T, TransportError> {
        self.ensure_open()?;

        let mut buf = self.read_buf.lock().await;
        buf.clear();

        tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            _ = self.internal_cancel.cancelled() => return Err(TransportError::Cancelled),
            read = self.read_whole_message(&mut buf) => read?,
        }

        trace!(bytes = buf.len(), "message received");
        let message: Option<T> = serde_json::from_slice(&buf)?;
        message.ok_or(TransportError::EmptyMessage)
    }

    async fn read_whole_message(&self, buf: &mut Vec<u8>) -> Result<(), TransportError> {
        loop {
            let start = buf.len();
            buf.resize(start + RECEIVE_CHUNK_SIZE, 0);

            let received = match self.socket.receive(&mut buf[start..]).await {
                Ok(received) => received,
                Err(e) => {
                    buf.truncate(start);
                    return Err(e);
                }
            };

            if received.kind == FrameKind::Close
                || self.socket.state() == SocketState::CloseReceived
            {
                buf.truncate(start);
                debug!("remote sent close frame");
                self.close().await;
                return Err(TransportError::Cancelled);
            }

            buf.truncate(start + received.count);
            if received.end_of_message {
                return Ok(());
            }
        }
    }

    /// Serializes `message` and sends it as one text frame.
    pub async fn send_message<T: Serialize + ?Sized>(
        &self,
        message: &T,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let payload = serde_json::to_string(message)?;
        self.socket.send_text(payload).await
    }

    /// Sends an already serialized JSON text frame.
    pub async fn send_raw(&self, payload: String) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.socket.send_text(payload).await
    }

    /// Closes the socket. Only the first call performs the handshake; later
    /// calls return immediately. Failures are logged and swallowed.
    pub async fn close(&self) {
        if self.close_started.swap(true, Ordering::AcqRel) {
            return;
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, self.close_handshake()).await {
            Ok(Ok(())) => trace!("socket closed"),
            Ok(Err(e)) => debug!(error = %e, "error closing socket"),
            Err(_) => debug!("timed out closing socket"),
        }
        self.internal_cancel.cancel();
    }

    async fn close_handshake(&self) -> Result<(), TransportError> {
        match self.socket.state() {
            SocketState::CloseReceived => {
                self.socket.close_output().await?;
                while self.socket.state() != SocketState::Closed {
                    tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
                }
                Ok(())
            }
            SocketState::Open => self.socket.close().await,
            _ => Ok(()),
        }
    }

    pub fn is_closing(&self) -> bool {
        self.close_started.load(Ordering::Acquire)
    }
}
