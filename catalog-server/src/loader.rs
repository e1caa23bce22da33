//! Drives plugin (re-)initialisation against the current config store
//! contents.
//!
//! Generalises a one-time startup call into something the reconcile loop
//! can also invoke: for every plugin in the registry, resolve its config
//! section by `source_key` and call `CatalogPlugin::init`, recording the
//! resulting `PluginState` back onto the registry so `/api/plugins` and
//! `readyz` can report it.
//!
//! A missing config section is not an error — a plugin with no configured
//! sources simply stays `Active` with an empty entity set, matching the
//! "disabled source: retain but skip refresh" resolution for sources, applied
//! one level up to whole plugins.

use catalog_core::config_model::{CatalogSourcesConfig, Section};

use crate::plugin::{PluginConfig, PluginState};
use crate::registry::Registry;

/// Outcome of loading (or reloading) a single plugin.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub plugin: String,
    pub state: PluginState,
}

fn empty_section() -> Section {
    Section {
        sources: Vec::new(),
        labels: None,
        named_queries: None,
    }
}

/// Initialise every registered plugin against `config`. Called once at
/// startup, after `Registry::freeze`.
pub async fn load_all(registry: &Registry, config: &CatalogSourcesConfig) -> Vec<LoadResult> {
    let mut results = Vec::new();
    for plugin in registry.all().await {
        let identity = plugin.identity().clone();
        registry.set_status(&identity.name, PluginState::Starting, None);

        let section = config
            .catalogs
            .get(&identity.source_key)
            .cloned()
            .unwrap_or_else(empty_section);

        let outcome = plugin
            .init(PluginConfig {
                section: &section,
                base_path: identity.base_path(),
                source_id: None,
            })
            .await;

        let state = match outcome {
            Ok(()) => {
                tracing::info!(plugin = %identity.name, "plugin initialised");
                PluginState::Active
            }
            Err(err) => {
                tracing::warn!(plugin = %identity.name, error = %err, "plugin init failed");
                PluginState::Failed(err.to_string())
            }
        };
        registry.set_status(
            &identity.name,
            state.clone(),
            match &state {
                PluginState::Failed(msg) => Some(msg.clone()),
                _ => None,
            },
        );
        results.push(LoadResult {
            plugin: identity.name,
            state,
        });
    }
    results
}

/// Like `load_all`, but only re-initialises plugins whose config section
/// actually differs from `previous` (by deep equality, not just the
/// document's top-level version string) — a label-only edit to one section
/// leaves every other plugin's already-loaded entities untouched. Plugins
/// with no prior reconcile pass (`previous` is `None`, or it's missing that
/// plugin's section entirely) are always (re)initialised.
pub async fn load_changed(
    registry: &Registry,
    previous: Option<&CatalogSourcesConfig>,
    config: &CatalogSourcesConfig,
) -> Vec<LoadResult> {
    let mut results = Vec::new();
    for plugin in registry.all().await {
        let identity = plugin.identity().clone();

        let section = config
            .catalogs
            .get(&identity.source_key)
            .cloned()
            .unwrap_or_else(empty_section);

        let unchanged = previous
            .and_then(|p| p.catalogs.get(&identity.source_key))
            .is_some_and(|prior_section| prior_section == &section);
        if unchanged {
            continue;
        }

        registry.set_status(&identity.name, PluginState::Starting, None);

        let outcome = plugin
            .init(PluginConfig {
                section: &section,
                base_path: identity.base_path(),
                source_id: None,
            })
            .await;

        let state = match outcome {
            Ok(()) => {
                tracing::info!(plugin = %identity.name, "plugin re-initialised after config change");
                PluginState::Active
            }
            Err(err) => {
                tracing::warn!(plugin = %identity.name, error = %err, "plugin init failed");
                PluginState::Failed(err.to_string())
            }
        };
        registry.set_status(
            &identity.name,
            state.clone(),
            match &state {
                PluginState::Failed(msg) => Some(msg.clone()),
                _ => None,
            },
        );
        results.push(LoadResult {
            plugin: identity.name,
            state,
        });
    }
    results
}

/// Re-initialise a single plugin, optionally scoped to one source id. Used
/// by the reconcile loop on config change and by `refresh` jobs.
pub async fn refresh_plugin(
    registry: &Registry,
    config: &CatalogSourcesConfig,
    plugin_name: &str,
    source_id: Option<String>,
) -> Option<LoadResult> {
    let plugin = registry.get(plugin_name)?;
    let identity = plugin.identity().clone();

    let section = config
        .catalogs
        .get(&identity.source_key)
        .cloned()
        .unwrap_or_else(empty_section);

    let outcome = plugin
        .init(PluginConfig {
            section: &section,
            base_path: identity.base_path(),
            source_id,
        })
        .await;

    let state = match outcome {
        Ok(()) => PluginState::Active,
        Err(err) => PluginState::Failed(err.to_string()),
    };
    registry.set_status(
        &identity.name,
        state.clone(),
        match &state {
            PluginState::Failed(msg) => Some(msg.clone()),
            _ => None,
        },
    );
    Some(LoadResult {
        plugin: identity.name,
        state,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use catalog_core::config_model::CatalogSourcesConfig;
    use catalog_core::entity::{AssetResource, CapabilitiesDocument};
    use catalog_core::error::CoreError;

    use super::*;
    use crate::plugin::{CatalogPlugin, ListPage, ListQuery, PluginIdentity};
    use crate::request_context::TenantContext;

    struct StubPlugin {
        identity: PluginIdentity,
        fail: bool,
    }

    #[async_trait]
    impl CatalogPlugin for StubPlugin {
        fn identity(&self) -> &PluginIdentity {
            &self.identity
        }

        async fn init(&self, _config: PluginConfig<'_>) -> Result<(), CoreError> {
            if self.fail {
                Err(CoreError::config("boom"))
            } else {
                Ok(())
            }
        }

        fn capabilities(&self) -> CapabilitiesDocument {
            CapabilitiesDocument {
                plugin: self.identity.name.clone(),
                version: self.identity.version.clone(),
                kinds: vec![],
                actions: vec![],
                source_manageable: true,
            }
        }

        async fn list(
            &self,
            _kind: &str,
            _tenant: &TenantContext,
            _query: &ListQuery,
        ) -> Result<ListPage, CoreError> {
            Ok(ListPage::default())
        }

        async fn get(
            &self,
            _kind: &str,
            _tenant: &TenantContext,
            _name: &str,
        ) -> Result<AssetResource, CoreError> {
            Err(CoreError::not_found("no entities"))
        }
    }

    fn identity(name: &str) -> PluginIdentity {
        PluginIdentity {
            name: name.to_string(),
            version: "v1".to_string(),
            description: "stub".to_string(),
            source_key: name.to_string(),
        }
    }

    #[tokio::test]
    async fn load_all_reports_failure_without_aborting_others() {
        let registry = Registry::new();
        registry
            .register(Arc::new(StubPlugin {
                identity: identity("good"),
                fail: false,
            }))
            .await
            .unwrap();
        registry
            .register(Arc::new(StubPlugin {
                identity: identity("bad"),
                fail: true,
            }))
            .await
            .unwrap();
        registry.freeze();

        let config = CatalogSourcesConfig::default();
        let results = load_all(&registry, &config).await;

        assert_eq!(results.len(), 2);
        assert!(matches!(
            results.iter().find(|r| r.plugin == "good").unwrap().state,
            PluginState::Active
        ));
        assert!(matches!(
            results.iter().find(|r| r.plugin == "bad").unwrap().state,
            PluginState::Failed(_)
        ));
        assert!(registry.status("good").unwrap().healthy());
        assert!(!registry.status("bad").unwrap().healthy());
    }

    #[tokio::test]
    async fn missing_section_is_not_an_error() {
        let registry = Registry::new();
        registry
            .register(Arc::new(StubPlugin {
                identity: identity("orphan"),
                fail: false,
            }))
            .await
            .unwrap();
        registry.freeze();

        let config = CatalogSourcesConfig::default();
        let results = load_all(&registry, &config).await;
        assert!(matches!(results[0].state, PluginState::Active));
    }
}
