//! Per-plugin asset list/get/action handlers.
//!
//! Routes are mounted dynamically per plugin from its capabilities document
//! (`server::create_server`), so these are plain async helpers taking the
//! plugin name and kind explicitly rather than `axum` handlers extracting
//! them from the path. `server.rs` closes over the per-plugin strings and
//! wraps each helper in a small closure that *is* a valid `axum` handler
//! (extractors only) when it mounts the route, building a route table at
//! startup from each plugin's capabilities document.

use axum::extract::{Path, Query};
use axum::response::IntoResponse;
use axum::Json;
use catalog_core::overlay::OverlayKey;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::action_dispatcher::{self, ActionRequest};
use crate::api_error::ApiError;
use crate::governance::merge_overlay;
use crate::plugin::ListQuery;
use crate::request_context::{Identity, TenantContext};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQueryParams {
    #[serde(default)]
    pub filter_query: Option<String>,
    #[serde(default)]
    pub order_by: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub named_query: Option<String>,
}

pub type ListQueryExtractor = Query<ListQueryParams>;

impl From<ListQueryParams> for ListQuery {
    fn from(p: ListQueryParams) -> Self {
        ListQuery {
            filter_query: p.filter_query,
            order_by: p.order_by,
            sort_order: p.sort_order,
            page_size: p.page_size,
            next_page_token: p.next_page_token,
            named_query: p.named_query,
        }
    }
}

pub async fn list(
    state: AppState,
    plugin_name: String,
    kind: String,
    tenant: TenantContext,
    Query(params): ListQueryExtractor,
) -> Result<impl IntoResponse, ApiError> {
    let plugin = state
        .registry
        .get(&plugin_name)
        .ok_or_else(|| ApiError::not_found(format!("unknown plugin: {plugin_name}")))?;

    let query: ListQuery = params.into();
    let page = plugin.list(&kind, &tenant, &query).await?;

    let items: Vec<Value> = page
        .items
        .into_iter()
        .map(|resource| {
            let key = OverlayKey {
                plugin: plugin_name.clone(),
                kind: kind.clone(),
                name: resource.metadata.name.clone(),
            };
            let merged = merge_overlay(resource, &state.overlay_store, &key);
            serde_json::to_value(merged).unwrap_or(Value::Null)
        })
        .collect();

    Ok(Json(json!({
        "data": items,
        "nextPageToken": page.next_page_token,
    })))
}

pub async fn get(
    state: AppState,
    plugin_name: String,
    kind: String,
    tenant: TenantContext,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let plugin = state
        .registry
        .get(&plugin_name)
        .ok_or_else(|| ApiError::not_found(format!("unknown plugin: {plugin_name}")))?;

    let resource = plugin.get(&kind, &tenant, &name).await?;
    let key = OverlayKey {
        plugin: plugin_name,
        kind,
        name,
    };
    let merged = merge_overlay(resource, &state.overlay_store, &key);
    Ok(Json(json!({ "data": merged })))
}

#[derive(Debug, Deserialize)]
pub struct ActionBody {
    pub action_id: String,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub dry_run: bool,
}

pub async fn dispatch_action(
    state: AppState,
    plugin_name: String,
    kind: String,
    identity: Identity,
    Path(name): Path<String>,
    Json(body): Json<ActionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let plugin = state
        .registry
        .get(&plugin_name)
        .ok_or_else(|| ApiError::not_found(format!("unknown plugin: {plugin_name}")))?;

    let caps = plugin.capabilities();
    let descriptor = caps
        .actions
        .iter()
        .find(|a| a.id == body.action_id)
        .ok_or_else(|| ApiError::invalid(format!("unknown action id: {}", body.action_id)))?;

    if body.dry_run && !descriptor.supports_dry_run {
        return Err(ApiError::invalid(format!(
            "action {} does not support dryRun",
            body.action_id
        )));
    }

    let target_name = body.target_name.clone().unwrap_or(name);
    let actor = identity.user.unwrap_or_else(|| "anonymous".to_string());

    let result = action_dispatcher::dispatch(
        plugin.as_ref(),
        &state.overlay_store,
        &state.governance,
        ActionRequest {
            plugin: &plugin_name,
            kind: &kind,
            name: &target_name,
            action_id: &body.action_id,
            actor: &actor,
            params: body.params,
            dry_run: body.dry_run,
        },
    )
    .await?;

    let status = if result.dry_run { "dry-run" } else { "completed" };
    Ok(Json(json!({
        "actionId": result.action_id,
        "status": status,
        "dryRun": result.dry_run,
        "result": result.result,
    })))
}
