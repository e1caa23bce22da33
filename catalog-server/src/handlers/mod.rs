//! Discovery endpoints: process health plus the plugin and tenancy
//! discovery documents.
//!
//! Follows the `State<AppState>` extractor / `Json<Value>` response /
//! errors-mapped-through-the-crate's-HTTP-error-type style used throughout
//! this crate's handlers, applied to the catalog's own discovery surface.

pub mod assets;
pub mod management;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api_error::ApiError;
use crate::server::AppState;

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "data": { "status": "ok" } }))
}

/// Liveness: the process is up and serving, regardless of plugin health.
pub async fn livez() -> impl IntoResponse {
    Json(json!({ "data": { "status": "alive" } }))
}

/// Readiness: at least one plugin must be healthy. Discovery endpoints list
/// unhealthy plugins rather than making the whole process unready, but a
/// process with zero healthy plugins cannot serve anything useful.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.registry.any_healthy().await {
        Json(json!({ "data": { "status": "ready" } })).into_response()
    } else {
        (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "data": { "status": "not_ready" } })),
        )
            .into_response()
    }
}

pub async fn list_plugins(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let mut plugins = Vec::new();
    for plugin in state.registry.all().await {
        let identity = plugin.identity();
        let status = state.registry.status(&identity.name);
        plugins.push(json!({
            "name": identity.name,
            "version": identity.version,
            "description": identity.description,
            "basePath": identity.base_path(),
            "state": status.as_ref().map(|s| format!("{:?}", s.state)),
            "lastError": status.and_then(|s| s.last_error),
        }));
    }
    Ok(Json(json!({ "data": plugins })))
}

pub async fn plugin_capabilities(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let plugin = state
        .registry
        .get(&name)
        .ok_or_else(|| ApiError::not_found(format!("unknown plugin: {name}")))?;
    Ok(Json(json!({ "data": plugin.capabilities() })))
}

pub async fn list_namespaces(State(state): State<AppState>) -> impl IntoResponse {
    let namespaces: Vec<&str> = state
        .config
        .tenancy
        .roles
        .iter()
        .flat_map(|r| r.namespaces.iter().map(|n| n.as_str()))
        .collect();
    Json(json!({
        "data": {
            "defaultNamespace": state.config.tenancy.default_namespace,
            "namespaces": namespaces,
        }
    }))
}
