//! Latest state of every entity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use homelink_hub_connection::{Connection, EventRecvError, EventSubscription};
use homelink_protocol::{EntityState, StateChangedData};

use crate::error::CacheError;

const CHANGES_CAPACITY: usize = 1024;

/// Entity states keyed by entity id.
///
/// Filled from `get_states`, then updated from `state_changed` events. Each
/// change is written to the cache before it is broadcast, so a subscriber
/// reading the cache after a notification sees that value or a newer one.
///
/// If the cache falls behind the event stream it reloads the snapshot and
/// broadcasts the differences. If that reload fails the cache reports
/// itself uninitialized until the next [`initialize`](Self::initialize).
pub struct EntityStateCache {
    inner: Arc<StateInner>,
    update_task: Mutex<Option<JoinHandle<()>>>,
}

struct StateInner {
    states: RwLock<HashMap<String, EntityState>>,
    initialized: AtomicBool,
    changes_tx: broadcast::Sender<StateChangedData>,
}

impl EntityStateCache {
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(CHANGES_CAPACITY);
        Self {
            inner: Arc::new(StateInner {
                states: RwLock::new(HashMap::new()),
                initialized: AtomicBool::new(false),
                changes_tx,
            }),
            update_task: Mutex::new(None),
        }
    }

    /// Loads a fresh snapshot from `connection` and follows its events.
    ///
    /// Replaces the previous snapshot and stops following the previous
    /// connection. On error the cache keeps its previous contents. `cancel`
    /// also bounds later reloads.
    pub async fn initialize(
        &self,
        connection: &Arc<Connection>,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        // Subscribe before fetching so no change between the two is lost.
        let events = connection.events();
        let snapshot = connection.get_states(cancel).await?;
        let count = snapshot.len();

        self.stop_updates();
        {
            let mut states = self.inner.write();
            states.clear();
            states.extend(snapshot.into_iter().map(|s| (s.entity_id.clone(), s)));
        }
        self.inner.initialized.store(true, Ordering::Release);
        debug!(entities = count, "state cache initialized");

        let task = tokio::spawn(apply_state_changes(
            self.inner.clone(),
            connection.clone(),
            events,
            cancel.clone(),
        ));
        *self.update_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Current state of `entity_id`, or `None` if the hub does not know it.
    pub fn get(&self, entity_id: &str) -> Result<Option<EntityState>, CacheError> {
        if !self.is_initialized() {
            return Err(CacheError::NotInitialized);
        }
        Ok(self.inner.read().get(entity_id).cloned())
    }

    pub fn all_entity_ids(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// Every state change applied to the cache, after it was applied.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChangedData> {
        self.inner.changes_tx.subscribe()
    }

    fn stop_updates(&self) {
        let previous = self
            .update_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = previous {
            task.abort();
        }
    }
}

impl Default for EntityStateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EntityStateCache {
    fn drop(&mut self) {
        self.stop_updates();
    }
}

impl StateInner {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, EntityState>> {
        self.states.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, EntityState>> {
        self.states.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, change: &StateChangedData) {
        let mut states = self.write();
        match &change.new_state {
            Some(state) => {
                states.insert(change.entity_id.clone(), state.clone());
            }
            None => {
                states.remove(&change.entity_id);
            }
        }
    }

    /// Swaps in `snapshot` and returns a change for every entity that
    /// differs from what was cached.
    fn resync(&self, snapshot: Vec<EntityState>) -> Vec<StateChangedData> {
        let fresh: HashMap<String, EntityState> = snapshot
            .into_iter()
            .map(|s| (s.entity_id.clone(), s))
            .collect();

        let mut states = self.write();
        let mut changes = Vec::new();
        for (entity_id, old) in states.iter() {
            let new = fresh.get(entity_id);
            if new != Some(old) {
                changes.push(StateChangedData {
                    entity_id: entity_id.clone(),
                    old_state: Some(old.clone()),
                    new_state: new.cloned(),
                });
            }
        }
        for (entity_id, new) in &fresh {
            if !states.contains_key(entity_id) {
                changes.push(StateChangedData {
                    entity_id: entity_id.clone(),
                    old_state: None,
                    new_state: Some(new.clone()),
                });
            }
        }
        *states = fresh;
        changes
    }
}

async fn apply_state_changes(
    inner: Arc<StateInner>,
    connection: Arc<Connection>,
    mut events: EventSubscription,
    cancel: CancellationToken,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(EventRecvError::Lagged(skipped)) => {
                warn!(skipped, "state events dropped, reloading states");
                // The reload supersedes everything still buffered.
                events.skip_backlog();
                match connection.get_states(&cancel).await {
                    Ok(snapshot) => {
                        let changes = inner.resync(snapshot);
                        debug!(changed = changes.len(), "state cache resynchronized");
                        for change in changes {
                            let _ = inner.changes_tx.send(change);
                        }
                        continue;
                    }
                    Err(e) => {
                        inner.initialized.store(false, Ordering::Release);
                        error!(error = %e, "failed to reload states, state cache is stale");
                        return;
                    }
                }
            }
            Err(EventRecvError::Closed) => break,
        };

        let change = match event.state_changed() {
            Some(Ok(change)) => change,
            Some(Err(e)) => {
                warn!(error = %e, "malformed state_changed event");
                continue;
            }
            None => continue,
        };

        inner.apply(&change);
        trace!(entity_id = %change.entity_id, "state updated");
        let _ = inner.changes_tx.send(change);
    }
    debug!("connection closed, state cache stopped following events");
}
