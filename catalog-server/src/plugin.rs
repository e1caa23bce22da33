//! Plugin trait and lifecycle types.
//!
//! An open set of asset kinds: `Box<dyn CatalogPlugin>` lets the host
//! support many kinds today and more later, while every plugin is still a
//! compiled Rust type registered by one explicit call
//! (`plugins::register_builtin_plugins`) — no dynamic loading.

use std::collections::HashMap;

use async_trait::async_trait;
use catalog_core::config_model::Section;
use catalog_core::entity::{AssetResource, CapabilitiesDocument};
use catalog_core::error::CoreError;
use catalog_core::providers::Diagnostics;
use serde_json::Value;

use crate::request_context::TenantContext;

/// Lifecycle state of a mounted plugin.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginState {
    Inactive,
    Starting,
    Active,
    Failed(String),
}

/// Static identity, read once at registration and used to build `basePath`
/// and the capabilities document version stamp.
#[derive(Debug, Clone)]
pub struct PluginIdentity {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Overrides `name` for config-section lookup (e.g. plugin `model`
    /// reads config section `models`).
    pub source_key: String,
}

impl PluginIdentity {
    pub fn base_path(&self) -> String {
        format!("/api/{}_catalog/{}", self.name, self.version)
    }
}

/// Configuration handed to a plugin's `init`: its config section, the
/// resolved base path, and a namespaced view for logging.
pub struct PluginConfig<'a> {
    pub section: &'a Section,
    pub base_path: String,
    /// Scopes a refresh to a single source id. `None` means re-enumerate
    /// every enabled source in `section`.
    pub source_id: Option<String>,
}

/// Everything a registered catalog plugin must provide.
///
/// `init` is both setup and the point at which the plugin first loads its
/// section's sources — there is no separate `start` phase.
#[async_trait]
pub trait CatalogPlugin: Send + Sync {
    fn identity(&self) -> &PluginIdentity;

    /// (Re-)initialise against a config section. Called once at startup and
    /// again by the reconcile loop whenever the section changes. Must be
    /// idempotent: `init(P); init(P)` yields the same entity set.
    async fn init(&self, config: PluginConfig<'_>) -> Result<(), CoreError>;

    /// The plugin's capabilities document.
    fn capabilities(&self) -> CapabilitiesDocument;

    /// List entities of `kind` in `namespace`, honouring `filter_query` and
    /// friends opaquely (the generic plugin applies simple equality
    /// filtering; per-domain query languages are out of scope).
    async fn list(
        &self,
        kind: &str,
        tenant: &TenantContext,
        query: &ListQuery,
    ) -> Result<ListPage, CoreError>;

    async fn get(&self, kind: &str, tenant: &TenantContext, name: &str) -> Result<AssetResource, CoreError>;

    /// Optional capability: a plugin-specific action provider. Returning
    /// `None` (the default) falls through to the built-in overlay-backed
    /// handlers (`tag`/`annotate`/`deprecate`).
    async fn dispatch_action(
        &self,
        _kind: &str,
        _name: &str,
        _action_id: &str,
        _params: &Value,
        _dry_run: bool,
    ) -> Result<Option<Value>, CoreError> {
        Ok(None)
    }

    async fn health_check(&self) -> Result<(), CoreError> {
        Ok(())
    }

    /// Per-source sync diagnostics, keyed by source id. Default empty for
    /// plugins that don't track per-source state.
    fn diagnostics(&self) -> HashMap<String, Diagnostics> {
        HashMap::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filter_query: Option<String>,
    pub order_by: Option<String>,
    pub sort_order: Option<String>,
    pub page_size: Option<usize>,
    pub next_page_token: Option<String>,
    pub named_query: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<AssetResource>,
    pub next_page_token: Option<String>,
}

/// Metadata the registry keeps about a plugin after a (possibly failed)
/// `init`, backing `GET /api/plugins`.
#[derive(Debug, Clone)]
pub struct PluginStatus {
    pub state: PluginState,
    pub last_error: Option<String>,
}

impl PluginStatus {
    pub fn healthy(&self) -> bool {
        matches!(self.state, PluginState::Active)
    }
}
