//! An authenticated session with the hub.
//!
//! Commands get a fresh numeric id and are written by a dedicated write
//! pump; a read pump matches `result` messages back to their command and
//! broadcasts everything else (events, pongs, unmatched results).

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use homelink_protocol::{Command, ErrorCode, HassError, HassEvent, HubMessage, ResultMessage, encode_command};

use crate::error::{ConnectionError, EventRecvError};
use crate::pending::{PendingCommand, PendingCommands, PendingMap};
use crate::pumps::read::read_pump;
use crate::pumps::write::{WriteRequest, write_pump};
use crate::supervisor::{DEFAULT_RESULT_TIMEOUT, ResultSupervisor};
use crate::transport::{SocketState, TransportPipeline, WebSocketClient};

/// How long `dispose` waits for the read loop to stop.
const DISPOSE_GRACE: Duration = Duration::from_secs(5);

const WRITE_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Time before a missing result is logged as a warning.
    pub result_timeout: Duration,
    /// Buffered inbound messages per subscriber before it lags.
    pub message_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            result_timeout: DEFAULT_RESULT_TIMEOUT,
            message_capacity: 1024,
        }
    }
}

pub struct Connection {
    next_id: AtomicU64,
    write_tx: mpsc::Sender<WriteRequest>,
    pending: PendingMap,
    messages_tx: broadcast::Sender<HubMessage>,
    supervisor: ResultSupervisor,
    disposed: AtomicBool,
    remote_closed: Arc<AtomicBool>,
    /// Stops both pumps.
    cancel: CancellationToken,
    /// Fired once the read pump has exited.
    closed: CancellationToken,
    read_handle: StdMutex<Option<JoinHandle<()>>>,
    write_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Starts the pumps over an already authenticated pipeline.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<S: WebSocketClient>(
        pipeline: TransportPipeline<S>,
        options: ConnectionOptions,
    ) -> Result<Self, ConnectionError> {
        let state = pipeline.state();
        if state != SocketState::Open {
            return Err(ConnectionError::NotOpen(state));
        }

        let pipeline = Arc::new(pipeline);
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let pending: PendingMap = Arc::new(Mutex::new(PendingCommands::default()));
        let (messages_tx, _) = broadcast::channel(options.message_capacity.max(1));
        let remote_closed = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let closed = CancellationToken::new();

        let write_handle = tokio::spawn(write_pump(pipeline.clone(), write_rx, cancel.clone()));
        let read_handle = tokio::spawn(read_pump(
            pipeline,
            pending.clone(),
            messages_tx.clone(),
            remote_closed.clone(),
            cancel.clone(),
            closed.clone(),
        ));

        Ok(Self {
            next_id: AtomicU64::new(1),
            write_tx,
            pending,
            messages_tx,
            supervisor: ResultSupervisor::new(options.result_timeout),
            disposed: AtomicBool::new(false),
            remote_closed,
            cancel,
            closed,
            read_handle: StdMutex::new(Some(read_handle)),
            write_handle: StdMutex::new(Some(write_handle)),
        })
    }

    /// Sends a command without waiting for its result.
    ///
    /// The result is still watched in the background and failures are
    /// logged. Returns once the frame has been written.
    pub async fn send<C: Command + ?Sized>(&self, command: &C) -> Result<(), ConnectionError> {
        let (id, payload) = self.prepare(command)?;
        let (supervisor_tx, supervisor_rx) = oneshot::channel();
        self.register(
            id,
            PendingCommand {
                caller: None,
                supervisor: supervisor_tx,
            },
        )
        .await?;

        let reserved = self.reserve().await;
        self.finish_write(id, reserved, &payload).await?;
        self.supervisor
            .track(supervisor_rx, command.command_type(), &payload);
        Ok(())
    }

    /// Sends a command and waits for its correlated result.
    ///
    /// If `cancel` fires before the frame is queued the command is dropped
    /// unsent. Once queued it is written and stays supervised; cancelling
    /// then only abandons this wait.
    pub async fn send_and_await_result<C: Command + ?Sized>(
        &self,
        command: &C,
        cancel: &CancellationToken,
    ) -> Result<ResultMessage, ConnectionError> {
        let (id, payload) = self.prepare(command)?;
        let (caller_tx, caller_rx) = oneshot::channel();
        let (supervisor_tx, supervisor_rx) = oneshot::channel();
        self.register(
            id,
            PendingCommand {
                caller: Some(caller_tx),
                supervisor: supervisor_tx,
            },
        )
        .await?;

        let reserved = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectionError::Cancelled),
            reserved = self.reserve() => reserved,
        };
        self.finish_write(id, reserved, &payload).await?;
        self.supervisor
            .track(supervisor_rx, command.command_type(), &payload);

        tokio::select! {
            biased;
            outcome = caller_rx => outcome.unwrap_or(Err(ConnectionError::TransportClosed)),
            _ = cancel.cancelled() => Err(ConnectionError::Cancelled),
        }
    }

    /// Sends a command and returns its raw `result` payload.
    ///
    /// A result with `success: false` becomes [`ConnectionError::CommandFailed`].
    pub async fn send_and_get_raw<C: Command + ?Sized>(
        &self,
        command: &C,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, ConnectionError> {
        let result = self.send_and_await_result(command, cancel).await?;
        Ok(check_success(command.command_type(), result)?.result)
    }

    /// Sends a command and deserializes its `result` payload.
    pub async fn send_and_parse<C, T>(
        &self,
        command: &C,
        cancel: &CancellationToken,
    ) -> Result<Option<T>, ConnectionError>
    where
        C: Command + ?Sized,
        T: DeserializeOwned,
    {
        let result = self.send_and_await_result(command, cancel).await?;
        let result = check_success(command.command_type(), result)?;
        Ok(result.parse_result()?)
    }

    /// Writes a command that expects no `result` message. Returns its id.
    pub(crate) async fn send_unsupervised<C: Command + ?Sized>(
        &self,
        command: &C,
    ) -> Result<u64, ConnectionError> {
        let (id, payload) = self.prepare(command)?;
        self.write(payload).await?;
        Ok(id)
    }

    /// Every inbound message that is not a correlated result.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<HubMessage> {
        self.messages_tx.subscribe()
    }

    /// Events pushed by the hub from the moment of subscribing.
    pub fn events(&self) -> EventSubscription {
        EventSubscription {
            rx: self.messages_tx.subscribe(),
            closed: self.closed.clone(),
        }
    }

    /// Resolves once the connection has stopped reading, for any reason.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Whether the hub, rather than us, ended the session.
    pub fn closed_by_remote(&self) -> bool {
        self.remote_closed.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Number of commands still waiting for a result.
    pub async fn pending_commands(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Closes the socket and stops the pumps.
    ///
    /// Idempotent. Waits a bounded time for the read loop, then for any
    /// supervised results still outstanding.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("disposing connection");
        self.cancel.cancel();

        // The write pump closes the socket on its way out.
        for (name, slot) in [("write", &self.write_handle), ("read", &self.read_handle)] {
            let handle = slot.lock().ok().and_then(|mut h| h.take());
            if let Some(mut handle) = handle
                && tokio::time::timeout(DISPOSE_GRACE, &mut handle).await.is_err()
            {
                warn!(pump = name, "pump did not stop in time, aborting");
                handle.abort();
            }
        }

        self.supervisor.shutdown().await;
    }

    fn prepare<C: Command + ?Sized>(&self, command: &C) -> Result<(u64, String), ConnectionError> {
        if self.is_disposed() {
            return Err(ConnectionError::Disposed);
        }
        if self.is_closed() {
            return Err(ConnectionError::TransportClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = encode_command(command, Some(id))?;
        Ok((id, serde_json::to_string(&frame)?))
    }

    async fn register(&self, id: u64, command: PendingCommand) -> Result<(), ConnectionError> {
        let rejected = self.pending.lock().await.register(id, command);
        match rejected {
            Ok(()) => Ok(()),
            Err(_) => Err(ConnectionError::TransportClosed),
        }
    }

    async fn reserve(&self) -> Result<mpsc::Permit<'_, WriteRequest>, ConnectionError> {
        self.write_tx
            .reserve()
            .await
            .map_err(|_| ConnectionError::TransportClosed)
    }

    /// Writes a registered command through `reserved`, unregistering it if
    /// the slot was never obtained or the write failed.
    async fn finish_write(
        &self,
        id: u64,
        reserved: Result<mpsc::Permit<'_, WriteRequest>, ConnectionError>,
        payload: &str,
    ) -> Result<(), ConnectionError> {
        let written = match reserved {
            Ok(permit) => write_with(permit, payload.to_string()).await,
            Err(e) => Err(e),
        };
        if written.is_err() {
            self.pending.lock().await.take(id);
        }
        written
    }

    async fn write(&self, payload: String) -> Result<(), ConnectionError> {
        write_with(self.reserve().await?, payload).await
    }
}

async fn write_with(
    permit: mpsc::Permit<'_, WriteRequest>,
    payload: String,
) -> Result<(), ConnectionError> {
    let (done, written) = oneshot::channel();
    permit.send(WriteRequest { payload, done });
    written
        .await
        .map_err(|_| ConnectionError::TransportClosed)??;
    Ok(())
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
        for slot in [&mut self.read_handle, &mut self.write_handle] {
            if let Ok(handle) = slot.get_mut()
                && let Some(handle) = handle.take()
            {
                handle.abort();
            }
        }
    }
}

pub(crate) fn check_success(command_type: &str, result: ResultMessage) -> Result<ResultMessage, ConnectionError> {
    if result.success {
        return Ok(result);
    }
    Err(ConnectionError::CommandFailed {
        command_type: command_type.to_string(),
        error: result.error.unwrap_or_else(|| HassError {
            code: ErrorCode::Text("unknown_error".into()),
            message: "no error details".into(),
        }),
    })
}

/// Stream of hub events for one subscriber.
pub struct EventSubscription {
    rx: broadcast::Receiver<HubMessage>,
    closed: CancellationToken,
}

impl EventSubscription {
    /// Next event.
    ///
    /// Fails with [`EventRecvError::Lagged`] when messages were dropped
    /// because this subscriber fell behind, and with
    /// [`EventRecvError::Closed`] once the connection has closed and
    /// everything buffered has been delivered.
    pub async fn recv(&mut self) -> Result<HassEvent, EventRecvError> {
        loop {
            let msg = tokio::select! {
                biased;
                msg = self.rx.recv() => msg,
                _ = self.closed.cancelled() => match self.rx.try_recv() {
                    Ok(msg) => Ok(msg),
                    Err(TryRecvError::Lagged(skipped)) => Err(RecvError::Lagged(skipped)),
                    Err(_) => return Err(EventRecvError::Closed),
                },
            };
            match msg {
                Ok(msg) => {
                    if msg.is_event()
                        && let Some(event) = msg.event
                    {
                        return Ok(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, events dropped");
                    return Err(EventRecvError::Lagged(skipped));
                }
                Err(RecvError::Closed) => return Err(EventRecvError::Closed),
            }
        }
    }

    /// Drops everything buffered so the next [`recv`](Self::recv) only sees
    /// messages broadcast from now on.
    pub fn skip_backlog(&mut self) {
        self.rx = self.rx.resubscribe();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use homelink_protocol::messages::{CallServiceCommand, SimpleCommand, UnsubscribeEventsCommand};
    use serde_json::json;

    use super::*;
    use crate::testing::{mock_connection, mock_pair};

    fn connection() -> (Connection, crate::testing::MockRemote) {
        mock_connection(ConnectionOptions::default())
    }

    #[tokio::test]
    async fn ids_start_at_one_and_increase() {
        let (conn, remote) = connection();
        for _ in 0..3 {
            conn.send(&SimpleCommand::new("ping")).await.unwrap();
        }
        let ids: Vec<u64> = [
            remote.next_sent().await,
            remote.next_sent().await,
            remote.next_sent().await,
        ]
        .iter()
        .map(|f| f["id"].as_u64().unwrap())
        .collect();
        assert_eq!(ids, vec![1, 2, 3]);
        conn.dispose().await;
    }

    #[tokio::test]
    async fn command_frame_carries_type_id_and_fields() {
        let (conn, remote) = connection();
        conn.send(&UnsubscribeEventsCommand { subscription: 5 })
            .await
            .unwrap();
        assert_eq!(
            remote.next_sent().await,
            json!({"type": "unsubscribe_events", "id": 1, "subscription": 5})
        );
        conn.dispose().await;
    }

    #[tokio::test]
    async fn result_is_matched_by_id() {
        let (conn, remote) = connection();
        let conn = Arc::new(conn);

        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.send_and_await_result(&SimpleCommand::new("get_states"), &CancellationToken::new())
                    .await
            })
        };

        let sent = remote.next_sent().await;
        let id = sent["id"].as_u64().unwrap();
        // An unrelated result must not resolve the waiter.
        remote.push_message(&HubMessage::result_ok(id + 100, None));
        remote.push_message(&HubMessage::result_ok(id, Some(json!([]))));

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(result.id, id);
        assert_eq!(result.result, Some(json!([])));
        conn.dispose().await;
    }

    #[tokio::test]
    async fn concurrent_commands_resolve_independently() {
        let (conn, remote) = connection();
        let conn = Arc::new(conn);

        let mut waiters = Vec::new();
        for n in 0..3 {
            let conn = conn.clone();
            waiters.push(tokio::spawn(async move {
                let command = CallServiceCommand::new("light", format!("scene_{n}"));
                let result = conn
                    .send_and_await_result(&command, &CancellationToken::new())
                    .await;
                (command.service, result)
            }));
        }

        let mut sent_ids = HashMap::new();
        for _ in 0..3 {
            let frame = remote.next_sent().await;
            let service = frame["service"].as_str().unwrap().to_string();
            sent_ids.insert(service, frame["id"].as_u64().unwrap());
        }
        // Answer out of order, echoing the service in the payload.
        let mut answers: Vec<_> = sent_ids.iter().collect();
        answers.sort_by_key(|(_, id)| std::cmp::Reverse(**id));
        for (service, id) in answers {
            remote.push_message(&HubMessage::result_ok(*id, Some(json!({"echo": service}))));
        }

        for waiter in waiters {
            let (service, result) = waiter.await.unwrap();
            let result = result.unwrap();
            assert_eq!(result.id, sent_ids[&service]);
            assert_eq!(result.result, Some(json!({"echo": service})));
        }
        assert_eq!(conn.pending_commands().await, 0);
        conn.dispose().await;
    }

    #[tokio::test]
    async fn cancelled_before_write_sends_nothing() {
        let (conn, remote) = connection();
        let cancel = CancellationToken::new();
        cancel.cancel();

        for _ in 0..40 {
            assert!(matches!(
                conn.send_and_await_result(&SimpleCommand::new("get_states"), &cancel)
                    .await,
                Err(ConnectionError::Cancelled)
            ));
        }

        assert_eq!(conn.pending_commands().await, 0);
        assert_eq!(conn.supervisor.pending(), 0);
        tokio::task::yield_now().await;
        assert!(remote.try_next_sent().await.is_none());

        // The connection is still usable afterwards.
        conn.send(&SimpleCommand::new("ping")).await.unwrap();
        assert_eq!(remote.next_sent().await["type"], "ping");
        conn.dispose().await;
    }

    #[tokio::test]
    async fn failed_result_becomes_command_failed() {
        let (conn, remote) = connection();
        let conn = Arc::new(conn);
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.send_and_parse::<_, Value>(&SimpleCommand::new("call_service"), &CancellationToken::new())
                    .await
            })
        };
        let id = remote.next_sent().await["id"].as_u64().unwrap();
        remote.push_message(&HubMessage::result_err(id, "not_found", "Service not found."));

        let err = waiter.await.unwrap().unwrap_err();
        match err {
            ConnectionError::CommandFailed { command_type, error } => {
                assert_eq!(command_type, "call_service");
                assert_eq!(error.message, "Service not found.");
            }
            other => panic!("unexpected error: {other}"),
        }
        conn.dispose().await;
    }

    #[tokio::test]
    async fn cancelled_caller_leaves_command_supervised() {
        let (conn, remote) = connection();
        let cancel = CancellationToken::new();
        let conn = Arc::new(conn);
        let waiter = {
            let conn = conn.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                conn.send_and_await_result(&SimpleCommand::new("get_states"), &cancel)
                    .await
            })
        };

        let id = remote.next_sent().await["id"].as_u64().unwrap();
        cancel.cancel();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(ConnectionError::Cancelled)
        ));
        assert_eq!(conn.pending_commands().await, 1);

        // A late result is still consumed by the correlation layer.
        remote.push_message(&HubMessage::result_ok(id, None));
        tokio::time::timeout(Duration::from_secs(1), async {
            while conn.pending_commands().await > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        conn.dispose().await;
    }

    #[tokio::test]
    async fn events_reach_every_subscriber() {
        let (conn, remote) = connection();
        let mut first = conn.events();
        let mut second = conn.events();

        remote.push_json(&json!({
            "id": 1,
            "type": "event",
            "event": {"event_type": "state_changed", "data": {"entity_id": "light.kitchen"}}
        }));

        assert_eq!(first.recv().await.unwrap().event_type, "state_changed");
        assert_eq!(second.recv().await.unwrap().event_type, "state_changed");
        conn.dispose().await;
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let (conn, remote) = connection();
        let mut early = conn.subscribe_messages();

        remote.push_json(&json!({"type": "event", "event": {"event_type": "first"}}));
        early.recv().await.unwrap();

        let mut late = conn.events();
        remote.push_json(&json!({"type": "event", "event": {"event_type": "second"}}));
        assert_eq!(late.recv().await.unwrap().event_type, "second");
        conn.dispose().await;
    }

    /// Pushes `count` numbered events and returns once the read pump has
    /// dispatched all of them.
    async fn flood(conn: &Connection, remote: &crate::testing::MockRemote, count: usize) {
        let hub = async {
            let id = remote.next_sent().await["id"].as_u64().unwrap();
            for n in 0..count {
                remote.push_json(&json!({"type": "event", "event": {"event_type": format!("e{n}")}}));
            }
            remote.push_message(&HubMessage::result_ok(id, None));
        };
        let token = CancellationToken::new();
        let ping = SimpleCommand::new("ping");
        let (result, ()) = tokio::join!(
            conn.send_and_await_result(&ping, &token),
            hub
        );
        result.unwrap();
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_how_much_it_missed() {
        let (conn, remote) = mock_connection(ConnectionOptions {
            message_capacity: 8,
            ..Default::default()
        });
        let mut events = conn.events();

        flood(&conn, &remote, 20).await;

        assert_eq!(events.recv().await, Err(EventRecvError::Lagged(12)));
        assert_eq!(events.recv().await.unwrap().event_type, "e12");

        events.skip_backlog();
        remote.push_json(&json!({"type": "event", "event": {"event_type": "fresh"}}));
        assert_eq!(events.recv().await.unwrap().event_type, "fresh");
        conn.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn remote_close_fails_waiters_and_signals_closed() {
        let (conn, remote) = connection();
        let conn = Arc::new(conn);
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.send_and_await_result(&SimpleCommand::new("get_states"), &CancellationToken::new())
                    .await
            })
        };
        remote.next_sent().await;
        let mut events = conn.events();

        remote.close_from_remote();
        conn.closed().await;

        assert!(conn.closed_by_remote());
        assert!(matches!(
            waiter.await.unwrap(),
            Err(ConnectionError::TransportClosed)
        ));
        assert_eq!(events.recv().await, Err(EventRecvError::Closed));
        assert!(matches!(
            conn.send(&SimpleCommand::new("ping")).await,
            Err(ConnectionError::TransportClosed)
        ));
        conn.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn remote_close_fails_every_outstanding_command() {
        let (conn, remote) = connection();
        let conn = Arc::new(conn);

        let mut waiters = Vec::new();
        for _ in 0..4 {
            let conn = conn.clone();
            waiters.push(tokio::spawn(async move {
                conn.send_and_await_result(&SimpleCommand::new("get_states"), &CancellationToken::new())
                    .await
            }));
        }
        for _ in 0..4 {
            remote.next_sent().await;
        }
        assert_eq!(conn.pending_commands().await, 4);

        remote.close_from_remote();
        for waiter in waiters {
            assert!(matches!(
                waiter.await.unwrap(),
                Err(ConnectionError::TransportClosed)
            ));
        }
        assert_eq!(conn.pending_commands().await, 0);
        conn.dispose().await;
    }

    #[tokio::test]
    async fn new_rejects_socket_that_is_not_open() {
        for state in [SocketState::Closed, SocketState::CloseReceived, SocketState::Connecting] {
            let (socket, remote) = mock_pair();
            remote.set_state(state);
            let result = Connection::new(TransportPipeline::new(socket), ConnectionOptions::default());
            assert!(matches!(result, Err(ConnectionError::NotOpen(s)) if s == state));
        }
    }

    #[tokio::test]
    async fn write_failure_is_not_a_remote_close() {
        let (conn, remote) = connection();
        remote.set_state(SocketState::CloseSent);

        assert!(matches!(
            conn.send(&SimpleCommand::new("ping")).await,
            Err(ConnectionError::Transport(_))
        ));
        tokio::time::timeout(Duration::from_secs(1), conn.closed())
            .await
            .unwrap();
        assert!(!conn.closed_by_remote());
        assert_eq!(conn.pending_commands().await, 0);
        conn.dispose().await;
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_rejects_sends() {
        let (conn, remote) = connection();
        conn.dispose().await;
        conn.dispose().await;

        assert_eq!(remote.close_calls(), 1);
        assert!(conn.is_closed());
        assert!(!conn.closed_by_remote());
        assert!(matches!(
            conn.send(&SimpleCommand::new("ping")).await,
            Err(ConnectionError::Disposed)
        ));
    }

    #[tokio::test]
    async fn dispose_survives_close_failure() {
        let (conn, remote) = connection();
        remote.fail_close(true);
        conn.dispose().await;
        assert_eq!(remote.close_calls(), 1);
        assert!(conn.is_disposed());
    }
}
