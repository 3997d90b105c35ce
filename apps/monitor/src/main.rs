//! Keeps a session with the hub alive, re-syncs the entity caches after
//! every reconnect and logs state changes as they arrive.
//!
//! Usage: `homelink-monitor [config.toml]`. The path may also come from
//! `HOMELINK_CONFIG`; `HOMELINK_TOKEN` overrides the configured token.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use homelink_hub_cache::{EntityAreaCache, EntityStateCache};
use homelink_hub_connection::{Connection, ConnectionRunner, HubClient, HubSettings};
use homelink_protocol::{EntityState, StateChangedData};

const DEFAULT_CONFIG_PATH: &str = "homelink.toml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = config_path();
    let mut settings = HubSettings::load(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    if let Ok(token) = std::env::var("HOMELINK_TOKEN") {
        settings.token = token;
    }
    if settings.token.is_empty() {
        bail!(
            "no access token: set `token` in {} or HOMELINK_TOKEN",
            path.display()
        );
    }

    let backoff = settings
        .reconnect
        .backoff()
        .context("invalid reconnect settings")?;
    let runner = ConnectionRunner::new(backoff);
    let client = HubClient::new(&settings);
    let states = Arc::new(EntityStateCache::new());
    let areas = Arc::new(EntityAreaCache::new());
    let cancel = CancellationToken::new();

    // Subscribe before the runner starts so the first connection is seen.
    let sync = tokio::spawn(sync_caches(
        runner.subscribe_connect(),
        states.clone(),
        areas.clone(),
        cancel.clone(),
    ));
    let changes = tokio::spawn(log_changes(
        states.subscribe(),
        areas.clone(),
        cancel.clone(),
    ));
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                cancel.cancel();
            }
        }
    });

    info!(url = client.url(), "starting monitor");
    let outcome = runner.run(&client, &cancel).await;

    cancel.cancel();
    let _ = tokio::join!(sync, changes);
    outcome.context("monitor stopped")?;
    Ok(())
}

fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOMELINK_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Re-initializes both caches on every new connection.
async fn sync_caches(
    mut connects: broadcast::Receiver<Arc<Connection>>,
    states: Arc<EntityStateCache>,
    areas: Arc<EntityAreaCache>,
    cancel: CancellationToken,
) {
    loop {
        let connection = tokio::select! {
            _ = cancel.cancelled() => break,
            next = connects.recv() => match next {
                Ok(connection) => connection,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        };

        if let Err(e) = states.initialize(&connection, &cancel).await {
            warn!(error = %e, "failed to load entity states");
            continue;
        }
        if let Err(e) = areas.initialize(&connection, &cancel).await {
            warn!(error = %e, "failed to load areas");
        }
        info!(
            entities = states.all_entity_ids().len(),
            with_area = areas.all_entity_ids().len(),
            "caches synchronized"
        );
    }
}

async fn log_changes(
    mut changes: broadcast::Receiver<StateChangedData>,
    areas: Arc<EntityAreaCache>,
    cancel: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            _ = cancel.cancelled() => break,
            next = changes.recv() => match next {
                Ok(change) => change,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "state change log fell behind");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        let area = areas.get(&change.entity_id).ok().flatten();
        info!(
            entity_id = %change.entity_id,
            area = area.as_ref().map_or("-", |a| a.name.as_str()),
            from = state_text(change.old_state.as_ref()),
            to = state_text(change.new_state.as_ref()),
            "state changed"
        );
    }
}

fn state_text(state: Option<&EntityState>) -> &str {
    state.map_or("<none>", |s| s.state.as_str())
}
