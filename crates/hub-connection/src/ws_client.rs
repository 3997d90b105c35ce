//! tokio-tungstenite backed [`WebSocketClient`].

use std::sync::atomic::{AtomicU8, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::transport::{FrameKind, Received, SocketState, WebSocketClient};

/// Registry and state dumps from a large installation run to tens of MiB.
const MAX_MESSAGE_SIZE: usize = 64 << 20;

struct ReadHalf<T> {
    stream: SplitStream<WebSocketStream<T>>,
    frame: Option<Frame>,
}

/// A frame that did not fit into the caller's buffer.
struct Frame {
    kind: FrameKind,
    data: Vec<u8>,
    offset: usize,
}

/// A WebSocket connection split into independently locked halves, so a
/// blocked receive never stalls a send.
pub struct TungsteniteSocket<T = MaybeTlsStream<TcpStream>> {
    read: Mutex<ReadHalf<T>>,
    write: Mutex<SplitSink<WebSocketStream<T>, Message>>,
    state: AtomicU8,
}

impl TungsteniteSocket {
    /// Opens a WebSocket to `url` (`ws://` or `wss://`).
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(MAX_MESSAGE_SIZE);
        config.max_frame_size = Some(MAX_MESSAGE_SIZE);
        let (stream, _) = tokio_tungstenite::connect_async_with_config(url, Some(config), false).await?;
        debug!(url, "websocket opened");
        Ok(Self::from_stream(stream))
    }
}

impl<T> TungsteniteSocket<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn from_stream(stream: WebSocketStream<T>) -> Self {
        let (write, read) = stream.split();
        Self {
            read: Mutex::new(ReadHalf {
                stream: read,
                frame: None,
            }),
            write: Mutex::new(write),
            state: AtomicU8::new(encode_state(SocketState::Open)),
        }
    }

    fn set_state(&self, state: SocketState) {
        self.state.store(encode_state(state), Ordering::Release);
    }
}

impl<T> WebSocketClient for TungsteniteSocket<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn state(&self) -> SocketState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    async fn receive(&self, buf: &mut [u8]) -> Result<Received, TransportError> {
        let mut read = self.read.lock().await;
        loop {
            if let Some(frame) = read.frame.as_mut() {
                let remaining = &frame.data[frame.offset..];
                let count = remaining.len().min(buf.len());
                buf[..count].copy_from_slice(&remaining[..count]);
                frame.offset += count;

                let kind = frame.kind;
                let end_of_message = frame.offset == frame.data.len();
                if end_of_message {
                    read.frame = None;
                }
                return Ok(Received {
                    count,
                    kind,
                    end_of_message,
                });
            }

            match read.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    read.frame = Some(Frame {
                        kind: FrameKind::Text,
                        data: text.as_bytes().to_vec(),
                        offset: 0,
                    });
                }
                Some(Ok(Message::Binary(data))) => {
                    read.frame = Some(Frame {
                        kind: FrameKind::Binary,
                        data: data.to_vec(),
                        offset: 0,
                    });
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "received close frame");
                    self.set_state(SocketState::CloseReceived);
                    return Ok(close_received());
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    trace!("control frame");
                }
                Some(Err(e)) => {
                    self.set_state(SocketState::Closed);
                    return Err(e.into());
                }
                None => {
                    debug!("websocket stream ended");
                    self.set_state(SocketState::CloseReceived);
                    return Ok(close_received());
                }
            }
        }
    }

    async fn send_text(&self, payload: String) -> Result<(), TransportError> {
        let mut write = self.write.lock().await;
        write.send(Message::text(payload)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.set_state(SocketState::CloseSent);
        let result = self.write.lock().await.send(Message::Close(None)).await;
        self.set_state(SocketState::Closed);
        ignore_closed(result)
    }

    async fn close_output(&self) -> Result<(), TransportError> {
        let result = self.write.lock().await.send(Message::Close(None)).await;
        self.set_state(SocketState::Closed);
        ignore_closed(result)
    }
}

fn close_received() -> Received {
    Received {
        count: 0,
        kind: FrameKind::Close,
        end_of_message: true,
    }
}

/// A close racing the peer's own close is not a failure. Once the peer's
/// close frame has been read, tungstenite queues the reply itself and
/// rejects ours with `SendAfterClosing`.
fn ignore_closed(result: Result<(), tungstenite::Error>) -> Result<(), TransportError> {
    match result {
        Ok(())
        | Err(tungstenite::Error::ConnectionClosed)
        | Err(tungstenite::Error::AlreadyClosed)
        | Err(tungstenite::Error::Protocol(ProtocolError::SendAfterClosing)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn encode_state(state: SocketState) -> u8 {
    match state {
        SocketState::Connecting => 0,
        SocketState::Open => 1,
        SocketState::CloseReceived => 2,
        SocketState::CloseSent => 3,
        SocketState::Closed => 4,
    }
}

fn decode_state(value: u8) -> SocketState {
    match value {
        0 => SocketState::Connecting,
        1 => SocketState::Open,
        2 => SocketState::CloseReceived,
        3 => SocketState::CloseSent,
        _ => SocketState::Closed,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::transport::TransportPipeline;

    async fn socket_pair() -> (TungsteniteSocket<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        (TungsteniteSocket::from_stream(client), server)
    }

    #[test]
    fn state_encoding_round_trips() {
        for state in [
            SocketState::Connecting,
            SocketState::Open,
            SocketState::CloseReceived,
            SocketState::CloseSent,
            SocketState::Closed,
        ] {
            assert_eq!(decode_state(encode_state(state)), state);
        }
    }

    #[tokio::test]
    async fn large_frame_is_served_in_chunks() {
        let (socket, mut server) = socket_pair().await;
        server
            .send(Message::text("abcdefghij".to_string()))
            .await
            .unwrap();

        let mut buf = [0u8; 4];
        let first = socket.receive(&mut buf).await.unwrap();
        assert_eq!(first.count, 4);
        assert!(!first.end_of_message);
        assert_eq!(&buf, b"abcd");

        let second = socket.receive(&mut buf).await.unwrap();
        assert_eq!(second.count, 4);
        assert!(!second.end_of_message);

        let third = socket.receive(&mut buf).await.unwrap();
        assert_eq!(third.count, 2);
        assert!(third.end_of_message);
        assert_eq!(&buf[..2], b"ij");
        assert_eq!(third.kind, FrameKind::Text);
    }

    #[tokio::test]
    async fn pipeline_over_real_websocket() {
        let (socket, mut server) = socket_pair().await;
        let pipeline = TransportPipeline::new(socket);

        pipeline
            .send_message(&json!({"type": "ping", "id": 1}))
            .await
            .unwrap();
        let sent = server.next().await.unwrap().unwrap();
        let sent: Value = serde_json::from_str(sent.to_text().unwrap()).unwrap();
        assert_eq!(sent, json!({"type": "ping", "id": 1}));

        server
            .send(Message::text(r#"{"type":"pong","id":1}"#.to_string()))
            .await
            .unwrap();
        let reply: Value = pipeline
            .receive_message(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply["type"], "pong");
    }

    #[tokio::test]
    async fn server_close_is_reported_as_close_frame() {
        let (socket, mut server) = socket_pair().await;
        server.send(Message::Close(None)).await.unwrap();

        let mut buf = [0u8; 16];
        let received = socket.receive(&mut buf).await.unwrap();
        assert_eq!(received.kind, FrameKind::Close);
        assert_eq!(socket.state(), SocketState::CloseReceived);

        socket.close_output().await.unwrap();
        assert_eq!(socket.state(), SocketState::Closed);
    }

    #[test]
    fn send_after_peer_close_is_ignored() {
        let after_close = tungstenite::Error::Protocol(ProtocolError::SendAfterClosing);
        assert!(ignore_closed(Err(after_close)).is_ok());
        assert!(ignore_closed(Err(tungstenite::Error::AlreadyClosed)).is_ok());

        let other = tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake);
        assert!(ignore_closed(Err(other)).is_err());
    }

    #[tokio::test]
    async fn pipeline_completes_remote_close_without_error() {
        let (socket, mut server) = socket_pair().await;
        let pipeline = TransportPipeline::new(socket);
        server.send(Message::Close(None)).await.unwrap();

        let err = pipeline
            .receive_message::<Value>(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
        assert_eq!(pipeline.state(), SocketState::Closed);
    }
}
