//! In-memory socket for tests.
//!
//! [`mock_pair`] returns a [`MockSocket`] to hand to a
//! [`TransportPipeline`](crate::TransportPipeline) and a [`MockRemote`] that
//! plays the hub: it pushes inbound frames and observes what was sent.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use homelink_protocol::HubMessage;

use crate::connection::{Connection, ConnectionOptions};
use crate::error::TransportError;
use crate::transport::{FrameKind, Received, SocketState, TransportPipeline, WebSocketClient};

enum Inbound {
    Chunk { data: Vec<u8>, end_of_message: bool },
    Close,
}

struct PartialChunk {
    data: Vec<u8>,
    offset: usize,
    end_of_message: bool,
}

struct Shared {
    state: StdMutex<SocketState>,
    receive_calls: AtomicUsize,
    close_calls: AtomicUsize,
    close_output_calls: AtomicUsize,
    fail_close: AtomicBool,
}

impl Shared {
    fn state(&self) -> SocketState {
        self.state.lock().map(|s| *s).unwrap_or(SocketState::Closed)
    }

    fn set_state(&self, state: SocketState) {
        if let Ok(mut s) = self.state.lock() {
            *s = state;
        }
    }
}

/// Socket half handed to the code under test.
pub struct MockSocket {
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    partial: Mutex<Option<PartialChunk>>,
    sent_tx: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
}

/// Hub side of a [`MockSocket`].
pub struct MockRemote {
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    sent_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    shared: Arc<Shared>,
}

/// Creates an open socket and its remote end.
pub fn mock_pair() -> (MockSocket, MockRemote) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        state: StdMutex::new(SocketState::Open),
        receive_calls: AtomicUsize::new(0),
        close_calls: AtomicUsize::new(0),
        close_output_calls: AtomicUsize::new(0),
        fail_close: AtomicBool::new(false),
    });

    let socket = MockSocket {
        inbound: Mutex::new(inbound_rx),
        partial: Mutex::new(None),
        sent_tx,
        shared: shared.clone(),
    };
    let remote = MockRemote {
        inbound_tx,
        sent_rx: Mutex::new(sent_rx),
        shared,
    };
    (socket, remote)
}

/// Creates a live [`Connection`] over a mock socket.
pub fn mock_connection(options: ConnectionOptions) -> (Connection, MockRemote) {
    let (socket, remote) = mock_pair();
    let connection = match Connection::new(TransportPipeline::new(socket), options) {
        Ok(connection) => connection,
        Err(e) => panic!("mock socket starts open: {e}"),
    };
    (connection, remote)
}

impl WebSocketClient for MockSocket {
    fn state(&self) -> SocketState {
        self.shared.state()
    }

    async fn receive(&self, buf: &mut [u8]) -> Result<Received, TransportError> {
        self.shared.receive_calls.fetch_add(1, Ordering::Relaxed);

        let mut partial = self.partial.lock().await;
        if partial.is_none() {
            let next = self.inbound.lock().await.recv().await;
            match next {
                Some(Inbound::Chunk {
                    data,
                    end_of_message,
                }) => {
                    *partial = Some(PartialChunk {
                        data,
                        offset: 0,
                        end_of_message,
                    });
                }
                Some(Inbound::Close) | None => {
                    self.shared.set_state(SocketState::CloseReceived);
                    return Ok(Received {
                        count: 0,
                        kind: FrameKind::Close,
                        end_of_message: true,
                    });
                }
            }
        }

        let Some(chunk) = partial.as_mut() else {
            return Err(TransportError::Closed);
        };
        let remaining = &chunk.data[chunk.offset..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        chunk.offset += count;

        let exhausted = chunk.offset == chunk.data.len();
        let end_of_message = exhausted && chunk.end_of_message;
        if exhausted {
            *partial = None;
        }
        Ok(Received {
            count,
            kind: FrameKind::Text,
            end_of_message,
        })
    }

    async fn send_text(&self, payload: String) -> Result<(), TransportError> {
        if self.shared.state() != SocketState::Open {
            return Err(TransportError::NotOpen(self.shared.state()));
        }
        self.sent_tx
            .send(payload)
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared.close_calls.fetch_add(1, Ordering::Relaxed);
        if self.shared.fail_close.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        self.shared.set_state(SocketState::Closed);
        Ok(())
    }

    async fn close_output(&self) -> Result<(), TransportError> {
        self.shared.close_output_calls.fetch_add(1, Ordering::Relaxed);
        self.shared.set_state(SocketState::Closed);
        Ok(())
    }
}

impl MockRemote {
    /// Pushes one complete text message.
    pub fn push_text(&self, text: &str) {
        let _ = self.inbound_tx.send(Inbound::Chunk {
            data: text.as_bytes().to_vec(),
            end_of_message: true,
        });
    }

    /// Pushes one message split into frames of `chunk_size` bytes.
    pub fn push_chunked(&self, text: &str, chunk_size: usize) {
        let bytes = text.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(chunk_size.max(1)).collect();
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let _ = self.inbound_tx.send(Inbound::Chunk {
                data: chunk.to_vec(),
                end_of_message: i == last,
            });
        }
    }

    pub fn push_json(&self, value: &Value) {
        self.push_text(&value.to_string());
    }

    pub fn push_message(&self, message: &HubMessage) {
        match serde_json::to_string(message) {
            Ok(text) => self.push_text(&text),
            Err(e) => panic!("hub message serializes: {e}"),
        }
    }

    /// Sends a close frame from the hub.
    pub fn close_from_remote(&self) {
        let _ = self.inbound_tx.send(Inbound::Close);
    }

    /// Waits for the next frame the client sent.
    pub async fn next_sent(&self) -> Value {
        let text = self.sent_rx.lock().await.recv().await;
        match text {
            Some(text) => match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(e) => panic!("client sent invalid JSON {text:?}: {e}"),
            },
            None => panic!("socket dropped before sending"),
        }
    }

    /// Returns a sent frame if one is already queued.
    pub async fn try_next_sent(&self) -> Option<Value> {
        let text = self.sent_rx.lock().await.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Waits for the next command and answers it with a successful result.
    pub async fn reply_ok(&self, result: Value) -> Value {
        let command = self.next_sent().await;
        let id = command["id"].as_u64().unwrap_or_default();
        self.push_message(&HubMessage::result_ok(id, Some(result)));
        command
    }

    /// Answers sent commands forever using `handler`.
    ///
    /// Returning `None` leaves a command unanswered.
    pub async fn serve<F>(&self, mut handler: F)
    where
        F: FnMut(&Value) -> Option<Value>,
    {
        loop {
            let command = self.next_sent().await;
            let Some(id) = command["id"].as_u64() else {
                continue;
            };
            if let Some(result) = handler(&command) {
                self.push_message(&HubMessage::result_ok(id, Some(result)));
            }
        }
    }

    pub fn set_state(&self, state: SocketState) {
        self.shared.set_state(state);
    }

    pub fn state(&self) -> SocketState {
        self.shared.state()
    }

    pub fn fail_close(&self, fail: bool) {
        self.shared.fail_close.store(fail, Ordering::Relaxed);
    }

    pub fn receive_calls(&self) -> usize {
        self.shared.receive_calls.load(Ordering::Relaxed)
    }

    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::Relaxed)
    }

    pub fn close_output_calls(&self) -> usize {
        self.shared.close_output_calls.load(Ordering::Relaxed)
    }
}
