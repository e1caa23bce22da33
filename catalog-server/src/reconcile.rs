//! Background reconcile loop: watches the config store for new revisions
//! and re-initialises the plugins whose section actually changed, on a
//! fixed poll cadence plus whenever `apply_sources` (or a `K8sConfigStore`
//! external-edit poll) publishes a `ChangeEvent`.
//!
//! A `tokio::spawn`ed loop with a fixed `tokio::time::interval`, logging
//! each pass at `debug`, applied to config reconciliation.

use std::sync::Arc;
use std::time::Duration;

use catalog_core::cache::DiscoveryCache;
use catalog_core::config_model::CatalogSourcesConfig;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

use crate::config_store::ConfigStore;
use crate::loader;
use crate::registry::Registry;

/// Runs until the process exits. Started once from `server::create_server`
/// as a background `tokio::spawn` task. `initial_config` is the document
/// already loaded (and handed to `loader::load_all`) at startup, so the
/// first reconcile pass only reinitialises plugins whose section changed
/// since then rather than redoing the startup load unconditionally.
pub async fn run(
    registry: Arc<Registry>,
    config_store: Arc<dyn ConfigStore>,
    discovery_cache: Arc<DiscoveryCache>,
    poll_interval: Duration,
    initial_config: CatalogSourcesConfig,
) {
    let mut changes = config_store.watch();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let previous = Mutex::new(Some(initial_config));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tracing::debug!("reconcile: poll tick");
                if let Err(e) = config_store.poll_external_edits().await {
                    tracing::warn!(error = %e, "reconcile: failed polling for external edits");
                }
                reconcile_once(&registry, config_store.as_ref(), &discovery_cache, &previous).await;
            }
            event = changes.recv() => {
                match event {
                    Ok(event) => {
                        tracing::info!(version = %event.version, "reconcile: config change observed");
                        reconcile_once(&registry, config_store.as_ref(), &discovery_cache, &previous).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "reconcile: missed config change events, reconciling anyway");
                        reconcile_once(&registry, config_store.as_ref(), &discovery_cache, &previous).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!("reconcile: config store watch channel closed, falling back to poll-only");
                        // Re-subscribe is impossible once the sender side is gone (the store
                        // outlives this task for the server's whole lifetime in practice), so
                        // just stop selecting on it and keep ticking.
                        std::future::pending::<()>().await;
                    }
                }
            }
        }
    }
}

async fn reconcile_once(
    registry: &Registry,
    config_store: &dyn ConfigStore,
    discovery_cache: &DiscoveryCache,
    previous: &Mutex<Option<CatalogSourcesConfig>>,
) {
    let (config, version) = match config_store.load().await {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "reconcile: failed to load config store");
            return;
        }
    };

    let mut previous = previous.lock().await;
    let results = loader::load_changed(registry, previous.as_ref(), &config).await;
    *previous = Some(config);

    if results.is_empty() {
        tracing::debug!(version = %version, "reconcile: no plugin sections changed");
        return;
    }
    let failed: Vec<&str> = results
        .iter()
        .filter(|r| !matches!(r.state, crate::plugin::PluginState::Active))
        .map(|r| r.plugin.as_str())
        .collect();
    if failed.is_empty() {
        tracing::info!(version = %version, changed = results.len(), "reconcile: changed plugins re-initialised");
    } else {
        tracing::warn!(version = %version, ?failed, "reconcile: some plugins failed to re-initialise");
    }
    discovery_cache.clear();
}
