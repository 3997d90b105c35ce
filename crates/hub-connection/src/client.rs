//! Opens authenticated connections to a hub.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use homelink_protocol::constants::HUB_STATE_RUNNING;

use crate::connection::{Connection, ConnectionOptions};
use crate::error::ConnectError;
use crate::handshake::authenticate;
use crate::runner::Connector;
use crate::settings::HubSettings;
use crate::transport::{TransportPipeline, WebSocketClient};
use crate::ws_client::TungsteniteSocket;

/// Default limit for the authentication and readiness exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub handshake_timeout: Duration,
    pub connection: ConnectionOptions,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            connection: ConnectionOptions::default(),
        }
    }
}

/// Turns an open pipeline into a ready [`Connection`].
///
/// Authenticates, checks that the hub reports `RUNNING`, and subscribes to
/// all events so they flow from the moment the connection is returned.
/// Each phase is bounded by `handshake_timeout`. On any failure the
/// socket is closed.
pub async fn establish<S: WebSocketClient>(
    pipeline: TransportPipeline<S>,
    token: &str,
    options: &ConnectOptions,
    cancel: &CancellationToken,
) -> Result<Connection, ConnectError> {
    let authenticated =
        tokio::time::timeout(options.handshake_timeout, authenticate(&pipeline, token, cancel))
            .await
            .unwrap_or(Err(ConnectError::Timeout));
    if let Err(e) = authenticated {
        pipeline.close().await;
        return Err(e);
    }

    let connection = Connection::new(pipeline, options.connection.clone())?;
    let ready = tokio::time::timeout(options.handshake_timeout, async {
        let config = connection.get_config(cancel).await?;
        if config.state != HUB_STATE_RUNNING {
            debug!(state = %config.state, "hub is still starting");
            return Err(ConnectError::NotReady);
        }
        connection.subscribe_events(None, cancel).await?;
        Ok::<_, ConnectError>(config)
    })
    .await
    .unwrap_or(Err(ConnectError::Timeout));

    match ready {
        Ok(config) => {
            info!(version = %config.version, location = %config.location_name, "hub ready");
            Ok(connection)
        }
        Err(e) => {
            connection.dispose().await;
            Err(e)
        }
    }
}

/// Connects to the hub described by [`HubSettings`] over tokio-tungstenite.
#[derive(Clone)]
pub struct HubClient {
    url: String,
    token: String,
    options: ConnectOptions,
}

impl HubClient {
    pub fn new(settings: &HubSettings) -> Self {
        Self {
            url: settings.websocket_url(),
            token: settings.token.clone(),
            options: settings.connect_options(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for HubClient {
    async fn connect(&self, cancel: &CancellationToken) -> Result<Connection, ConnectError> {
        debug!(url = %self.url, "connecting to hub");
        let socket = tokio::select! {
            _ = cancel.cancelled() => return Err(ConnectError::Cancelled),
            socket = TungsteniteSocket::connect(&self.url) => socket?,
        };

        let result = establish(TransportPipeline::new(socket), &self.token, &self.options, cancel).await;
        match result {
            Err(_) if cancel.is_cancelled() => Err(ConnectError::Cancelled),
            other => other,
        }
    }
}
