//! Keeps one live connection to the hub, reconnecting with backoff.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::ProgressiveBackoff;
use crate::connection::Connection;
use crate::error::{ConnectError, RunnerError};
use crate::types::{DisconnectReason, RunnerState};

const NOTIFY_CAPACITY: usize = 16;

/// Opens a ready connection. Implemented by [`HubClient`](crate::HubClient).
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Connection, ConnectError>> + Send;
}

/// Reconnect loop around a [`Connector`].
///
/// Publishes every new connection and one [`DisconnectReason`] per lost
/// connection or failed attempt. Owns the current connection: it is
/// disposed before the next attempt starts.
pub struct ConnectionRunner {
    backoff: ProgressiveBackoff,
    current: RwLock<Option<Arc<Connection>>>,
    connect_tx: broadcast::Sender<Arc<Connection>>,
    disconnect_tx: broadcast::Sender<DisconnectReason>,
    state_tx: watch::Sender<RunnerState>,
    shutdown: CancellationToken,
}

impl ConnectionRunner {
    pub fn new(backoff: ProgressiveBackoff) -> Self {
        let (connect_tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        let (disconnect_tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        let (state_tx, _) = watch::channel(RunnerState::Idle);
        Self {
            backoff,
            current: RwLock::new(None),
            connect_tx,
            disconnect_tx,
            state_tx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Connections as they are established.
    pub fn subscribe_connect(&self) -> broadcast::Receiver<Arc<Connection>> {
        self.connect_tx.subscribe()
    }

    pub fn subscribe_disconnect(&self) -> broadcast::Receiver<DisconnectReason> {
        self.disconnect_tx.subscribe()
    }

    pub fn state(&self) -> RunnerState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<RunnerState> {
        self.state_tx.subscribe()
    }

    pub async fn current_connection(&self) -> Option<Arc<Connection>> {
        self.current.read().await.clone()
    }

    /// Stops [`run`](Self::run) as if its token had been cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Connects, waits for the connection to end, and reconnects until
    /// cancelled.
    ///
    /// Returns `Ok(())` when stopped through `cancel` or [`shutdown`](Self::shutdown),
    /// and [`RunnerError::Unauthorized`] if the hub rejects the token.
    pub async fn run<C: Connector>(
        &self,
        connector: &C,
        cancel: &CancellationToken,
    ) -> Result<(), RunnerError> {
        let mut backoff = self.backoff.clone();
        let mut first_attempt = true;

        loop {
            if !first_attempt {
                let delay = backoff.next_delay();
                self.set_state(RunnerState::Idle);
                debug!(delay_ms = delay.as_millis() as u64, "reconnecting after delay");
                tokio::select! {
                    _ = self.stopped(cancel) => {
                        self.stop();
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            first_attempt = false;

            self.set_state(RunnerState::Connecting);
            let connected = tokio::select! {
                _ = self.stopped(cancel) => {
                    self.stop();
                    return Ok(());
                }
                connected = connector.connect(cancel) => connected,
            };

            let connection = match connected {
                Ok(connection) => Arc::new(connection),
                Err(e) => {
                    let reason = if self.is_stopped(cancel) {
                        DisconnectReason::Client
                    } else {
                        DisconnectReason::from(&e)
                    };
                    match reason {
                        DisconnectReason::Unauthorized => {
                            error!("hub rejected the access token, giving up");
                            self.publish_disconnect(reason);
                            self.set_state(RunnerState::Stopped);
                            return Err(RunnerError::Unauthorized);
                        }
                        DisconnectReason::Client => {
                            self.stop();
                            return Ok(());
                        }
                        DisconnectReason::NotReady => info!("hub is not ready yet"),
                        _ => warn!(error = %e, "failed to connect to hub"),
                    }
                    self.set_state(RunnerState::Faulted);
                    self.publish_disconnect(reason);
                    continue;
                }
            };

            backoff.reset();
            *self.current.write().await = Some(connection.clone());
            self.set_state(RunnerState::Connected);
            info!("connected to hub");
            let _ = self.connect_tx.send(connection.clone());

            let stopped = tokio::select! {
                _ = self.stopped(cancel) => true,
                _ = connection.closed() => false,
            };
            let reason = if stopped {
                DisconnectReason::Client
            } else if connection.closed_by_remote() {
                DisconnectReason::Remote
            } else {
                DisconnectReason::Error
            };

            self.set_state(if stopped {
                RunnerState::Disconnecting
            } else {
                RunnerState::Faulted
            });
            info!(?reason, "disconnected from hub");
            self.publish_disconnect(reason);

            connection.dispose().await;
            *self.current.write().await = None;

            if stopped {
                self.set_state(RunnerState::Stopped);
                return Ok(());
            }
        }
    }

    async fn stopped(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    fn is_stopped(&self, cancel: &CancellationToken) -> bool {
        cancel.is_cancelled() || self.shutdown.is_cancelled()
    }

    fn stop(&self) {
        debug!("runner stopped");
        self.publish_disconnect(DisconnectReason::Client);
        self.set_state(RunnerState::Stopped);
    }

    fn publish_disconnect(&self, reason: DisconnectReason) {
        // No subscribers is fine.
        let _ = self.disconnect_tx.send(reason);
    }

    fn set_state(&self, state: RunnerState) {
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use super::*;
    use crate::connection::ConnectionOptions;
    use crate::testing::{MockRemote, mock_connection};

    enum Outcome {
        Connect,
        Fail(ConnectError),
    }

    /// Plays back a fixed list of outcomes, then hangs.
    struct ScriptedConnector {
        outcomes: Mutex<VecDeque<Outcome>>,
        attempts: Mutex<Vec<Instant>>,
        remotes: mpsc::UnboundedSender<MockRemote>,
    }

    impl ScriptedConnector {
        fn new(outcomes: Vec<Outcome>) -> (Arc<Self>, mpsc::UnboundedReceiver<MockRemote>) {
            let (remotes, remotes_rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                attempts: Mutex::new(Vec::new()),
                remotes,
            });
            (connector, remotes_rx)
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl Connector for ScriptedConnector {
        async fn connect(&self, _cancel: &CancellationToken) -> Result<Connection, ConnectError> {
            self.attempts.lock().unwrap().push(Instant::now());
            let next = self.outcomes.lock().unwrap().pop_front();
            match next {
                Some(Outcome::Connect) => {
                    let (connection, remote) = mock_connection(ConnectionOptions::default());
                    let _ = self.remotes.send(remote);
                    Ok(connection)
                }
                Some(Outcome::Fail(e)) => Err(e),
                None => std::future::pending().await,
            }
        }
    }

    fn backoff() -> ProgressiveBackoff {
        ProgressiveBackoff::new(Duration::from_millis(100), Duration::from_millis(1000), 2.0)
            .unwrap()
    }

    fn spawn_run(
        runner: &Arc<ConnectionRunner>,
        connector: &Arc<ScriptedConnector>,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<Result<(), RunnerError>> {
        let runner = runner.clone();
        let connector = connector.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { runner.run(&*connector, &cancel).await })
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_is_terminal() {
        let runner = Arc::new(ConnectionRunner::new(backoff()));
        let mut disconnects = runner.subscribe_disconnect();
        let (connector, _remotes) = ScriptedConnector::new(vec![
            Outcome::Fail(ConnectError::Unauthorized),
            Outcome::Connect,
        ]);

        let result = spawn_run(&runner, &connector, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(result, Err(RunnerError::Unauthorized)));
        assert_eq!(disconnects.recv().await.unwrap(), DisconnectReason::Unauthorized);
        assert_eq!(runner.state(), RunnerState::Stopped);
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_back_off_then_connect() {
        let runner = Arc::new(ConnectionRunner::new(backoff()));
        let mut disconnects = runner.subscribe_disconnect();
        let mut connects = runner.subscribe_connect();
        let (connector, _remotes) = ScriptedConnector::new(vec![
            Outcome::Fail(ConnectError::Timeout),
            Outcome::Fail(ConnectError::NotReady),
            Outcome::Connect,
        ]);
        let cancel = CancellationToken::new();
        let handle = spawn_run(&runner, &connector, &cancel);

        let connection = connects.recv().await.unwrap();
        assert!(!connection.is_closed());
        assert_eq!(runner.state(), RunnerState::Connected);
        assert!(runner.current_connection().await.is_some());

        let attempts = connector.attempts();
        assert_eq!(attempts[1] - attempts[0], Duration::from_millis(100));
        assert_eq!(attempts[2] - attempts[1], Duration::from_millis(200));

        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(disconnects.recv().await.unwrap(), DisconnectReason::Error);
        assert_eq!(disconnects.recv().await.unwrap(), DisconnectReason::NotReady);
        assert_eq!(disconnects.recv().await.unwrap(), DisconnectReason::Client);
        assert!(connection.is_disposed());
        assert!(runner.current_connection().await.is_none());
        assert_eq!(runner.state(), RunnerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_close_reconnects_with_reset_backoff() {
        let runner = Arc::new(ConnectionRunner::new(backoff()));
        let mut disconnects = runner.subscribe_disconnect();
        let mut connects = runner.subscribe_connect();
        let (connector, mut remotes) =
            ScriptedConnector::new(vec![Outcome::Connect, Outcome::Connect]);
        let handle = spawn_run(&runner, &connector, &CancellationToken::new());

        let first = connects.recv().await.unwrap();
        let remote = remotes.recv().await.unwrap();
        remote.close_from_remote();

        assert_eq!(disconnects.recv().await.unwrap(), DisconnectReason::Remote);
        let second = connects.recv().await.unwrap();
        assert!(first.is_disposed());
        assert!(!Arc::ptr_eq(&first, &second));

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1] - attempts[0], Duration::from_millis(100));

        runner.shutdown();
        handle.await.unwrap().unwrap();
        assert_eq!(disconnects.recv().await.unwrap(), DisconnectReason::Client);
        assert!(second.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_unblocks_pending_connect() {
        let runner = Arc::new(ConnectionRunner::new(backoff()));
        let mut disconnects = runner.subscribe_disconnect();
        let (connector, _remotes) = ScriptedConnector::new(Vec::new());
        let cancel = CancellationToken::new();
        let handle = spawn_run(&runner, &connector, &cancel);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(runner.state(), RunnerState::Connecting);
        cancel.cancel();

        handle.await.unwrap().unwrap();
        assert_eq!(disconnects.recv().await.unwrap(), DisconnectReason::Client);
        assert_eq!(runner.state(), RunnerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn state_changes_are_observable() {
        let runner = Arc::new(ConnectionRunner::new(backoff()));
        let mut state = runner.watch_state();
        assert_eq!(*state.borrow(), RunnerState::Idle);

        let (connector, _remotes) = ScriptedConnector::new(vec![Outcome::Connect]);
        let handle = spawn_run(&runner, &connector, &CancellationToken::new());

        state
            .wait_for(|s| *s == RunnerState::Connected)
            .await
            .unwrap();
        runner.shutdown();
        handle.await.unwrap().unwrap();
        assert_eq!(*state.borrow(), RunnerState::Stopped);
    }
}
