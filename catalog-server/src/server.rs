//! # HTTP Server Module
//!
//! Builds the `axum::Router`: wires the plugin registry, config store,
//! overlay store, job queue, and governance store into one `AppState`,
//! mounts the discovery/governance/management routers plus one dynamic
//! route set per registered plugin, and layers the request middleware
//! stack in a fixed order.
//!
//! One struct of `Arc`-wrapped components, a `ServiceBuilder` layering CORS
//! first and a timeout last.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use catalog_core::cache::DiscoveryCache;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use crate::config::{Config, ConfigStoreMode};
use crate::config_store::{ConfigStore, FileConfigStore, K8sConfigStore};
use crate::governance::{self, GovernanceStore};
use crate::handlers::{self, assets, management};
use crate::jobs::{JobQueue, JobQueueConfig};
use crate::middleware::authz::DecisionCache;
use crate::middleware::{audit, authz, cache, cors_layer, identity, tenancy};
use crate::overlay_store::OverlayStore;
use crate::plugins::register_builtin_plugins;
use crate::registry::Registry;
use crate::request_context::{Identity, TenantContext};

/// Shared application state handed to every handler and middleware stage.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub config_store: Arc<dyn ConfigStore>,
    pub overlay_store: Arc<OverlayStore>,
    pub job_queue: Arc<JobQueue>,
    pub discovery_cache: Arc<DiscoveryCache>,
    pub decision_cache: Arc<DecisionCache>,
    pub audit_log: Arc<audit::RequestAuditLog>,
    pub governance: Arc<GovernanceStore>,
}

pub async fn create_server(config: Config) -> anyhow::Result<Router> {
    // `store_mode` selects the backend explicitly: `k8s` watches a mounted
    // `ConfigMap` directory for out-of-band edits, `file`/`none` both use the
    // in-memory file-backed store (the only difference being whether the
    // reconcile loop is started below).
    let config_store: Arc<dyn ConfigStore> = match config.sources.store_mode {
        ConfigStoreMode::K8s => {
            let dir = config
                .sources
                .watch_dir
                .clone()
                .ok_or_else(|| anyhow::anyhow!("sources.store_mode is k8s but no watch_dir configured"))?;
            let initial = catalog_core::config_model::load_configs(&config.sources.paths)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            Arc::new(K8sConfigStore::new(dir, initial).map_err(|e| anyhow::anyhow!(e.to_string()))?)
        }
        ConfigStoreMode::File | ConfigStoreMode::None => Arc::new(
            FileConfigStore::load_from_sources(&config.sources.paths)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?,
        ),
    };

    let registry = Arc::new(Registry::new());
    register_builtin_plugins(&registry)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    registry.freeze();

    let (initial_config, _version) = config_store
        .load()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    crate::loader::load_all(&registry, &initial_config).await;

    let state = AppState {
        config: Arc::new(config.clone()),
        registry,
        config_store,
        overlay_store: Arc::new(OverlayStore::new(chrono::Duration::from_std(config.audit.retention)?)),
        job_queue: Arc::new(JobQueue::new(JobQueueConfig {
            lease_timeout: chrono::Duration::from_std(config.jobs.lease_timeout)?,
            max_attempts: config.jobs.max_attempts,
            backoff_base: chrono::Duration::from_std(config.jobs.backoff_base)?,
            backoff_max: chrono::Duration::from_std(config.jobs.backoff_max)?,
            poll_interval: chrono::Duration::from_std(config.jobs.poll_interval)?,
            retention: chrono::Duration::from_std(config.jobs.retention)?,
        })),
        discovery_cache: Arc::new(DiscoveryCache::new(config.cache.max_size)),
        decision_cache: Arc::new(DecisionCache::new(
            config.authz.decision_cache_size,
            config.authz.decision_cache_ttl,
        )),
        audit_log: Arc::new(audit::RequestAuditLog::new(10_000)),
        governance: Arc::new(GovernanceStore::new()),
    };

    if config.server.cors.enabled && config.server.cors.allowed_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS is enabled with wildcard origins; unsafe for production");
    }

    if config.sources.store_mode != ConfigStoreMode::None {
        tokio::spawn(crate::reconcile::run(
            state.registry.clone(),
            state.config_store.clone(),
            state.discovery_cache.clone(),
            config.reconcile.poll_interval,
            initial_config,
        ));
    }
    for _ in 0..config.jobs.concurrency {
        tokio::spawn(management::run_job_worker(state.clone()));
    }

    let mut app = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/api/plugins", get(handlers::list_plugins))
        .route("/api/plugins/{name}/capabilities", get(handlers::plugin_capabilities))
        .route("/api/tenancy/namespaces", get(handlers::list_namespaces))
        .nest("/api/governance/v1alpha1", governance_router())
        .nest("/api/management/v1alpha1", management_router());

    for plugin in state.registry.all().await {
        app = app.merge(plugin_router(plugin.as_ref()));
    }

    // Layer order below is outer-to-inner (the first `.layer()` call runs
    // first on the way in, last on the way out). Tenancy and identity must
    // run before both audit and authz, since those two read the
    // `TenantContext`/`Identity` extensions on entry. Audit must wrap
    // outside authz to observe a 403 deny.
    let app = app
        .layer(
            ServiceBuilder::new()
                .layer(cors_layer(&config.server.cors))
                .layer(axum::middleware::from_fn_with_state(state.clone(), tenancy::tenancy_middleware))
                .layer(axum::middleware::from_fn(identity::identity_middleware))
                .layer(axum::middleware::from_fn_with_state(state.clone(), audit::audit_middleware))
                .layer(axum::middleware::from_fn_with_state(state.clone(), authz::authz_middleware))
                .layer(axum::middleware::from_fn_with_state(state.clone(), cache::cache_middleware))
                .layer(TimeoutLayer::new(config.server.timeout)),
        )
        .with_state(state);

    Ok(app)
}

fn governance_router() -> Router<AppState> {
    Router::new()
        .route("/assets/{plugin}/{kind}/{name}", get(governance::get_overlay).patch(governance::patch_overlay))
        .route("/assets/{plugin}/{kind}/{name}/history", get(governance::get_history))
        .route(
            "/assets/{plugin}/{kind}/{name}/versions",
            get(governance::list_versions).post(governance::create_version),
        )
        .route(
            "/assets/{plugin}/{kind}/{name}/bindings",
            get(governance::list_bindings).patch(governance::set_binding),
        )
        .route("/approvals", get(governance::list_approvals))
        .route("/approvals/{id}/decisions", post(governance::decide_approval))
        .route("/approvals/{id}/cancel", post(governance::cancel_approval))
}

fn management_router() -> Router<AppState> {
    Router::new()
        .route("/sources", get(management::get_sources))
        .route("/sources/validate", post(management::validate_sources))
        .route("/sources/apply", post(management::apply_sources))
        .route("/revisions", get(management::list_revisions))
        .route("/revisions/{version}/rollback", post(management::rollback_revision))
        .route("/refresh", post(management::refresh))
        .route("/jobs", get(management::list_jobs))
        .route("/jobs/{id}", get(management::get_job))
        .route("/diagnostics", get(management::diagnostics))
}

/// Builds the list/get/action routes for one plugin from its own
/// capabilities document, assembling a route table at startup instead of
/// one handler per static endpoint. Every built-in plugin exposes exactly
/// one kind today, so `caps.kinds[0]`'s endpoint
/// strings double as the literal `axum` route patterns (`get_endpoint`
/// already reads `"{base}/{plural}/{name}"`, `{name}` included verbatim).
/// The per-plugin name is captured by value in each closure since
/// `assets::*` take it as a plain parameter rather than a path extractor.
fn plugin_router(plugin: &dyn crate::plugin::CatalogPlugin) -> Router<AppState> {
    let identity = plugin.identity().clone();
    let caps = plugin.capabilities();
    let Some(kind_caps) = caps.kinds.into_iter().next() else {
        return Router::new();
    };

    let plugin_name = identity.name.clone();
    let kind = kind_caps.kind.clone();
    let list_handler = move |State(state): State<AppState>, tenant: TenantContext, query: assets::ListQueryExtractor| {
        let plugin_name = plugin_name.clone();
        let kind = kind.clone();
        async move { assets::list(state, plugin_name, kind, tenant, query).await }
    };

    let plugin_name = identity.name.clone();
    let kind = kind_caps.kind.clone();
    let item_handler = move |state: State<AppState>,
                              tenant: TenantContext,
                              identity_ctx: Identity,
                              path: axum::extract::Path<String>,
                              body: Option<axum::Json<serde_json::Value>>| {
        let plugin_name = plugin_name.clone();
        let kind = kind.clone();
        async move { item_dispatch(state, tenant, identity_ctx, path, body, plugin_name, kind).await }
    };

    Router::new()
        .route(&kind_caps.list_endpoint, get(list_handler))
        .route(&kind_caps.get_endpoint, get(item_handler.clone()).post(item_handler))
}

/// Single handler for the `{base}/{plural}/{name}` route, covering both a
/// plain `GET` (asset detail) and a `POST .../{name}:action` (action
/// dispatch) — `axum`'s router matches the whole final path segment as one
/// capture, so the two are disambiguated here by stripping a `:action`
/// suffix off `name` rather than by two separate route patterns.
#[allow(clippy::too_many_arguments)]
async fn item_dispatch(
    State(state): State<AppState>,
    tenant: TenantContext,
    identity_ctx: Identity,
    axum::extract::Path(raw_name): axum::extract::Path<String>,
    body: Option<axum::Json<serde_json::Value>>,
    plugin_name: String,
    kind: String,
) -> Result<axum::response::Response, crate::api_error::ApiError> {
    use axum::response::IntoResponse;

    if let Some(name) = raw_name.strip_suffix(":action") {
        let axum::Json(body) = body.ok_or_else(|| crate::api_error::ApiError::invalid("action dispatch requires a JSON body"))?;
        let action_body: assets::ActionBody = serde_json::from_value(body)
            .map_err(|e| crate::api_error::ApiError::invalid(e.to_string()))?;
        return assets::dispatch_action(
            state,
            plugin_name,
            kind,
            identity_ctx,
            axum::extract::Path(name.to_string()),
            axum::Json(action_body),
        )
        .await
        .map(IntoResponse::into_response);
    }

    assets::get(state, plugin_name, kind, tenant, axum::extract::Path(raw_name))
        .await
        .map(IntoResponse::into_response)
}
