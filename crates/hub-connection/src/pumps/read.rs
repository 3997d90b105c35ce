//! Read pump: correlates results and fans out everything else.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use homelink_protocol::HubMessage;

use crate::error::TransportError;
use crate::pending::PendingMap;
use crate::transport::{TransportPipeline, WebSocketClient};

/// Reads messages until the socket closes or `cancel` fires.
///
/// On exit every pending command is failed, `cancel` is fired so the write
/// pump stops too, and `closed` is fired last.
pub(crate) async fn read_pump<S: WebSocketClient>(
    pipeline: Arc<TransportPipeline<S>>,
    pending: PendingMap,
    messages_tx: broadcast::Sender<HubMessage>,
    remote_closed: Arc<AtomicBool>,
    cancel: CancellationToken,
    closed: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = pipeline.receive_message::<HubMessage>(&cancel) => msg,
        };

        match msg {
            Ok(msg) => dispatch_message(msg, &pending, &messages_tx).await,
            Err(TransportError::Json(e)) => warn!("failed to parse message: {e}"),
            Err(TransportError::EmptyMessage) => debug!("ignoring empty message"),
            Err(TransportError::Cancelled) => {
                if !cancel.is_cancelled() {
                    debug!("hub closed the connection");
                    remote_closed.store(true, Ordering::Release);
                }
                break;
            }
            Err(e) => {
                warn!("WebSocket read error: {e}");
                break;
            }
        }
    }

    let stranded = pending.lock().await.close();
    if !stranded.is_empty() {
        debug!(count = stranded.len(), "failing commands still waiting for a result");
    }
    for command in stranded {
        command.fail();
    }

    cancel.cancel();
    closed.cancel();
    trace!("read pump stopped");
}

/// Routes a result to its waiting command; anything else is broadcast.
pub(crate) async fn dispatch_message(
    msg: HubMessage,
    pending: &PendingMap,
    messages_tx: &broadcast::Sender<HubMessage>,
) {
    trace!(msg_type = %msg.msg_type, id = ?msg.id, "received message");

    if msg.is_result()
        && let Some(id) = msg.id
    {
        let command = pending.lock().await.take(id);
        if let Some(command) = command {
            if let Some(result) = msg.into_result() {
                command.resolve(result);
            }
            return;
        }
        debug!(id, "result for unknown command");
    }

    // No subscribers is fine.
    let _ = messages_tx.send(msg);
}
