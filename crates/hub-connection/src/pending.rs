//! Commands awaiting their result message.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, oneshot};

use homelink_protocol::ResultMessage;

use crate::error::ConnectionError;

pub(crate) type PendingOutcome = Result<ResultMessage, ConnectionError>;

/// One in-flight command. The supervisor always gets the outcome; the
/// caller only when it is awaiting the result.
pub(crate) struct PendingCommand {
    pub(crate) caller: Option<oneshot::Sender<PendingOutcome>>,
    pub(crate) supervisor: oneshot::Sender<PendingOutcome>,
}

impl PendingCommand {
    pub(crate) fn resolve(self, result: ResultMessage) {
        if let Some(caller) = self.caller {
            let _ = caller.send(Ok(result.clone()));
        }
        let _ = self.supervisor.send(Ok(result));
    }

    pub(crate) fn fail(self) {
        if let Some(caller) = self.caller {
            let _ = caller.send(Err(ConnectionError::TransportClosed));
        }
        let _ = self.supervisor.send(Err(ConnectionError::TransportClosed));
    }
}

#[derive(Default)]
pub(crate) struct PendingCommands {
    entries: HashMap<u64, PendingCommand>,
    closed: bool,
}

pub(crate) type PendingMap = Arc<Mutex<PendingCommands>>;

impl PendingCommands {
    /// Registers a command. Once the read side has stopped nothing can
    /// resolve it, so the entry is handed back.
    pub(crate) fn register(&mut self, id: u64, command: PendingCommand) -> Result<(), PendingCommand> {
        if self.closed {
            return Err(command);
        }
        self.entries.insert(id, command);
        Ok(())
    }

    pub(crate) fn take(&mut self, id: u64) -> Option<PendingCommand> {
        self.entries.remove(&id)
    }

    /// Marks the map closed and returns everything still waiting.
    pub(crate) fn close(&mut self) -> Vec<PendingCommand> {
        self.closed = true;
        self.entries.drain().map(|(_, command)| command).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
