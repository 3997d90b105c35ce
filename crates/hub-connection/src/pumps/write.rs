//! Write pump: serialises outbound frames onto the pipeline.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use crate::error::TransportError;
use crate::transport::{TransportPipeline, WebSocketClient};

/// A serialized frame plus the channel that reports the write outcome.
pub(crate) struct WriteRequest {
    pub(crate) payload: String,
    pub(crate) done: oneshot::Sender<Result<(), TransportError>>,
}

/// Writes frames in order until cancelled, then closes the pipeline.
///
/// A failed write fires `cancel` before closing, so the read pump sees a
/// local shutdown rather than a hub-initiated close.
pub(crate) async fn write_pump<S: WebSocketClient>(
    pipeline: Arc<TransportPipeline<S>>,
    mut write_rx: mpsc::Receiver<WriteRequest>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            request = write_rx.recv() => {
                let Some(WriteRequest { payload, done }) = request else {
                    break;
                };
                let result = pipeline.send_raw(payload).await;
                let failed = result.is_err();
                if let Err(e) = &result {
                    error!("WebSocket write error: {e}");
                }
                let _ = done.send(result);
                if failed {
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    trace!("write pump stopped");
    pipeline.close().await;
}
