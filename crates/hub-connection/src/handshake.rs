//! Pre-command authentication exchange.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use homelink_protocol::HubMessage;
use homelink_protocol::constants::{MSG_AUTH_INVALID, MSG_AUTH_OK, MSG_AUTH_REQUIRED};
use homelink_protocol::messages::AuthMessage;

use crate::error::ConnectError;
use crate::transport::{TransportPipeline, WebSocketClient};

/// Runs `auth_required` → `auth` → `auth_ok` on a fresh pipeline.
///
/// On `auth_invalid` the socket is closed before returning
/// [`ConnectError::Unauthorized`].
pub(crate) async fn authenticate<S: WebSocketClient>(
    pipeline: &TransportPipeline<S>,
    token: &str,
    cancel: &CancellationToken,
) -> Result<(), ConnectError> {
    let greeting: HubMessage = pipeline.receive_message(cancel).await?;
    if greeting.msg_type != MSG_AUTH_REQUIRED {
        return Err(ConnectError::Handshake(format!(
            "expected {MSG_AUTH_REQUIRED}, got {}",
            greeting.msg_type
        )));
    }

    pipeline.send_message(&AuthMessage::new(token)).await?;

    let reply: HubMessage = pipeline.receive_message(cancel).await?;
    match reply.msg_type.as_str() {
        MSG_AUTH_OK => {
            debug!(version = ?reply.ha_version, "authenticated with hub");
            Ok(())
        }
        MSG_AUTH_INVALID => {
            warn!(message = ?reply.message, "hub rejected access token");
            pipeline.close().await;
            Err(ConnectError::Unauthorized)
        }
        other => Err(ConnectError::Handshake(format!(
            "unexpected reply to auth: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::mock_pair;

    #[tokio::test]
    async fn sends_token_after_auth_required() {
        let (socket, remote) = mock_pair();
        let pipeline = TransportPipeline::new(socket);
        remote.push_json(&json!({"type": "auth_required", "ha_version": "2024.3.0"}));
        remote.push_json(&json!({"type": "auth_ok", "ha_version": "2024.3.0"}));

        authenticate(&pipeline, "secret", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            remote.next_sent().await,
            json!({"type": "auth", "access_token": "secret"})
        );
    }

    #[tokio::test]
    async fn auth_invalid_closes_socket() {
        let (socket, remote) = mock_pair();
        let pipeline = TransportPipeline::new(socket);
        remote.push_json(&json!({"type": "auth_required"}));
        remote.push_json(&json!({"type": "auth_invalid", "message": "Invalid access token"}));

        let err = authenticate(&pipeline, "wrong", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Unauthorized));
        assert_eq!(remote.close_calls(), 1);
    }

    #[tokio::test]
    async fn unexpected_greeting_is_a_handshake_error() {
        let (socket, remote) = mock_pair();
        let pipeline = TransportPipeline::new(socket);
        remote.push_json(&json!({"type": "auth_ok"}));

        let err = authenticate(&pipeline, "t", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Handshake(_)));
    }
}
