//! Process-wide plugin registry.
//!
//! A concurrent map plus an ordered name list, `register`/`list`/`get`
//! operations, `tracing` on registration. Single-writer at init, frozen
//! once the server starts serving: registration happens before server
//! construction, and after `server.init` begins, the registry is frozen.

use std::sync::Arc;

use catalog_core::error::CoreError;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::plugin::{CatalogPlugin, PluginState, PluginStatus};

pub struct Registry {
    plugins: DashMap<String, Arc<dyn CatalogPlugin>>,
    order: RwLock<Vec<String>>,
    status: DashMap<String, PluginStatus>,
    frozen: std::sync::atomic::AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            plugins: DashMap::new(),
            order: RwLock::new(Vec::new()),
            status: DashMap::new(),
            frozen: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Register a plugin instance. Fails with `Conflict` if the name is
    /// already taken, or if the registry has been frozen.
    pub async fn register(&self, plugin: Arc<dyn CatalogPlugin>) -> Result<(), CoreError> {
        if self.frozen.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CoreError::Conflict {
                message: "registry is frozen; cannot register new plugins after server init"
                    .to_string(),
            });
        }
        let name = plugin.identity().name.clone();
        if self.plugins.contains_key(&name) {
            return Err(CoreError::Conflict {
                message: format!("plugin already registered: {name}"),
            });
        }
        self.plugins.insert(name.clone(), plugin);
        self.status.insert(
            name.clone(),
            PluginStatus {
                state: PluginState::Inactive,
                last_error: None,
            },
        );
        self.order.write().await.push(name.clone());
        tracing::info!(plugin = %name, "plugin registered");
        Ok(())
    }

    /// Freeze the registry; called once by `create_server` right before the
    /// first plugin `init` pass begins.
    pub fn freeze(&self) {
        self.frozen.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CatalogPlugin>> {
        self.plugins.get(name).map(|e| e.value().clone())
    }

    /// All registered plugins in stable registration order.
    pub async fn all(&self) -> Vec<Arc<dyn CatalogPlugin>> {
        let order = self.order.read().await;
        order
            .iter()
            .filter_map(|name| self.plugins.get(name).map(|e| e.value().clone()))
            .collect()
    }

    pub fn set_status(&self, name: &str, state: PluginState, last_error: Option<String>) {
        self.status.insert(
            name.to_string(),
            PluginStatus { state, last_error },
        );
    }

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.status.get(name).map(|e| e.value().clone())
    }

    pub async fn any_healthy(&self) -> bool {
        let order = self.order.read().await;
        order
            .iter()
            .any(|name| self.status.get(name).map(|s| s.healthy()).unwrap_or(false))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
