//! Background watch over every command's result.
//!
//! A caller that fires a command without awaiting it still gets failures
//! reported: slow results are logged at warn, failed and broken ones at
//! error, each with the original command payload.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, warn};

use crate::pending::PendingOutcome;

/// Default time before a missing result is reported.
pub const DEFAULT_RESULT_TIMEOUT: Duration = Duration::from_secs(20);

/// How long [`ResultSupervisor::shutdown`] waits for outstanding results.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct ResultSupervisor {
    timeout: Duration,
    tracker: TaskTracker,
    abandon: CancellationToken,
}

impl ResultSupervisor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            tracker: TaskTracker::new(),
            abandon: CancellationToken::new(),
        }
    }

    /// Watches `outcome` in the background until it resolves.
    pub(crate) fn track(
        &self,
        outcome: oneshot::Receiver<PendingOutcome>,
        command_type: &str,
        command_json: &str,
    ) {
        let timeout = self.timeout;
        let abandon = self.abandon.clone();
        let command_type = command_type.to_string();
        let command_json = command_json.to_string();

        self.tracker.spawn(async move {
            tokio::select! {
                _ = abandon.cancelled() => {}
                _ = supervise(outcome, timeout, &command_type, &command_json) => {}
            }
        });
    }

    /// Number of results still being watched.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits up to five seconds for outstanding results, then abandons
    /// whatever is left.
    pub async fn shutdown(&self) {
        self.tracker.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tracker.wait())
            .await
            .is_err()
        {
            error!(
                pending = self.tracker.len(),
                "results still pending while closing connection"
            );
            self.abandon.cancel();
        }
    }
}

async fn supervise(
    mut outcome: oneshot::Receiver<PendingOutcome>,
    timeout: Duration,
    command_type: &str,
    command_json: &str,
) {
    let outcome = match tokio::time::timeout(timeout, &mut outcome).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(
                command_type,
                command = command_json,
                "command did not get a response in a timely fashion"
            );
            outcome.await
        }
    };

    match outcome {
        Ok(Ok(result)) if !result.success => {
            let reason = result
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no error details".to_string());
            error!(
                command_type,
                error = %reason,
                command = command_json,
                "command failed"
            );
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            error!(
                command_type,
                error = %e,
                command = command_json,
                "error waiting for result"
            );
        }
        Err(_) => {
            error!(
                command_type,
                command = command_json,
                "result channel dropped before a result arrived"
            );
        }
    }
}
