//! Area of every entity, derived from the hub's registries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use homelink_hub_connection::{Connection, EventRecvError, EventSubscription};
use homelink_protocol::constants::{
    EVENT_AREA_REGISTRY_UPDATED, EVENT_DEVICE_REGISTRY_UPDATED, EVENT_ENTITY_REGISTRY_UPDATED,
};
use homelink_protocol::types::{Area, Device, EntityRegistration};

use crate::error::CacheError;

const RELOADS_CAPACITY: usize = 16;

/// Sent after the area map has been rebuilt from the registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreasReloaded {
    /// Entities with a known area.
    pub entities: usize,
}

/// Entity id to [`Area`], resolved through the entity's own area or, failing
/// that, its device's area.
///
/// Rebuilt whenever the hub reports an area, device or entity registry
/// update.
pub struct EntityAreaCache {
    inner: Arc<AreaInner>,
    update_task: Mutex<Option<JoinHandle<()>>>,
}

struct AreaInner {
    areas: RwLock<HashMap<String, Area>>,
    initialized: AtomicBool,
    reloads_tx: broadcast::Sender<AreasReloaded>,
}

impl EntityAreaCache {
    pub fn new() -> Self {
        let (reloads_tx, _) = broadcast::channel(RELOADS_CAPACITY);
        Self {
            inner: Arc::new(AreaInner {
                areas: RwLock::new(HashMap::new()),
                initialized: AtomicBool::new(false),
                reloads_tx,
            }),
            update_task: Mutex::new(None),
        }
    }

    /// Loads the registries from `connection` and follows its registry
    /// update events. `cancel` also bounds later reloads.
    pub async fn initialize(
        &self,
        connection: &Arc<Connection>,
        cancel: &CancellationToken,
    ) -> Result<(), CacheError> {
        let events = connection.events();
        let areas = load_areas(connection, cancel).await?;

        self.stop_updates();
        let entities = self.inner.replace(areas);
        self.inner.initialized.store(true, Ordering::Release);
        debug!(entities, "area cache initialized");

        let task = tokio::spawn(reload_on_registry_updates(
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

    /// Area of `entity_id`, or `None` if it has none.
    pub fn get(&self, entity_id: &str) -> Result<Option<Area>, CacheError> {
        if !self.is_initialized() {
            return Err(CacheError::NotInitialized);
        }
        Ok(self.inner.read().get(entity_id).cloned())
    }

    /// Entities with a known area.
    pub fn all_entity_ids(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AreasReloaded> {
        self.inner.reloads_tx.subscribe()
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

impl Default for EntityAreaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EntityAreaCache {
    fn drop(&mut self) {
        self.stop_updates();
    }
}

impl AreaInner {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Area>> {
        self.areas.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swaps in a new map and returns its size.
    fn replace(&self, areas: HashMap<String, Area>) -> usize {
        let len = areas.len();
        *self.areas.write().unwrap_or_else(PoisonError::into_inner) = areas;
        len
    }
}

async fn load_areas(
    connection: &Connection,
    cancel: &CancellationToken,
) -> Result<HashMap<String, Area>, CacheError> {
    let entities = connection.get_entities(cancel).await?;
    let devices = connection.get_devices(cancel).await?;
    let areas = connection.get_areas(cancel).await?;
    Ok(resolve_areas(entities, devices, areas))
}

fn resolve_areas(
    entities: Vec<EntityRegistration>,
    devices: Vec<Device>,
    areas: Vec<Area>,
) -> HashMap<String, Area> {
    let areas: HashMap<String, Area> = areas
        .into_iter()
        .map(|a| (a.area_id.clone(), a))
        .collect();
    let device_areas: HashMap<String, String> = devices
        .into_iter()
        .filter_map(|d| Some((d.id, d.area_id.filter(|id| !id.is_empty())?)))
        .collect();

    entities
        .into_iter()
        .filter_map(|entity| {
            let own = entity
                .area_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .and_then(|id| areas.get(id));
            let area = own.or_else(|| {
                let device_id = entity.device_id.as_deref()?;
                areas.get(device_areas.get(device_id)?)
            })?;
            Some((entity.entity_id, area.clone()))
        })
        .collect()
}

fn is_registry_update(event_type: &str) -> bool {
    matches!(
        event_type,
        EVENT_AREA_REGISTRY_UPDATED | EVENT_DEVICE_REGISTRY_UPDATED | EVENT_ENTITY_REGISTRY_UPDATED
    )
}

async fn reload_on_registry_updates(
    inner: Arc<AreaInner>,
    connection: Arc<Connection>,
    mut events: EventSubscription,
    cancel: CancellationToken,
) {
    loop {
        match events.recv().await {
            Ok(event) if is_registry_update(&event.event_type) => {
                debug!(event_type = %event.event_type, "registry changed, reloading areas");
            }
            Ok(_) => continue,
            Err(EventRecvError::Lagged(skipped)) => {
                // A dropped registry update cannot be told apart from any
                // other dropped event.
                warn!(skipped, "events dropped, reloading areas");
                events.skip_backlog();
            }
            Err(EventRecvError::Closed) => break,
        }
        match load_areas(&connection, &cancel).await {
            Ok(areas) => {
                let entities = inner.replace(areas);
                info!(entities, "areas reloaded");
                let _ = inner.reloads_tx.send(AreasReloaded { entities });
            }
            Err(e) => warn!(error = %e, "failed to reload areas, keeping previous map"),
        }
    }
    debug!("connection closed, area cache stopped following events");
}
