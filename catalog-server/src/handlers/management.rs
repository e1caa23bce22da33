//! Source management endpoints, mounted at `/api/management/v1alpha1/...`.
//! These are the only handlers that touch the config store and job queue
//! directly; everything else reaches the catalog through a plugin.
//!
//! Follows the same `envelope`/`to_json` and `State<AppState>` shape
//! `governance.rs` uses.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use catalog_core::config_model::CatalogSourcesConfig;
use catalog_core::error::CoreError;
use catalog_core::providers::create_provider;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api_error::ApiError;
use crate::loader;
use crate::server::AppState;

fn envelope(value: Value) -> impl IntoResponse {
    Json(json!({ "data": value }))
}

fn to_json<T: Serialize>(value: T) -> Result<Value, ApiError> {
    serde_json::to_value(value)
        .map_err(CoreError::from)
        .map_err(ApiError::from)
}

pub async fn get_sources(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let (config, version) = state.config_store.load().await?;
    Ok(envelope(to_json(json!({ "config": config, "version": version }))?))
}

#[derive(Debug, Deserialize)]
pub struct ValidateSourcesRequest {
    pub config: CatalogSourcesConfig,
}

#[derive(Debug, Clone, Serialize)]
struct ValidationIssue {
    catalog: String,
    source_id: String,
    message: String,
}

/// Checks the candidate config loads cleanly and every source's `type`
/// names a provider this binary actually registers, without touching the
/// live config store (`validate-source` must not mutate state). Shared by
/// `validate_sources` and `apply_sources`, so both paths reject the same
/// inputs.
fn collect_validation_issues(config: &CatalogSourcesConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for (catalog, section) in &config.catalogs {
        let mut seen = std::collections::HashSet::new();
        for source in &section.sources {
            if !seen.insert(&source.id) {
                issues.push(ValidationIssue {
                    catalog: catalog.clone(),
                    source_id: source.id.clone(),
                    message: "duplicate source id in catalog".to_string(),
                });
                continue;
            }
            if let Err(e) = create_provider(&source.source_type) {
                issues.push(ValidationIssue {
                    catalog: catalog.clone(),
                    source_id: source.id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }
    issues
}

pub async fn validate_sources(
    State(_state): State<AppState>,
    Json(body): Json<ValidateSourcesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let issues = collect_validation_issues(&body.config);
    let valid = issues.is_empty();
    Ok(envelope(to_json(json!({ "valid": valid, "issues": issues }))?))
}

#[derive(Debug, Deserialize)]
pub struct ApplySourcesRequest {
    pub config: CatalogSourcesConfig,
    pub expected_version: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Writes a new config revision (CAS-checked against `expectedVersion`).
/// Runs the same checks as `validate_sources` first; a failing check blocks
/// the save unless `force=true` is set, in which case the save proceeds and
/// an audit row records the bypass and `reason`. The reconcile loop picks up
/// the resulting `ChangeEvent` from the store's watch channel and
/// re-initialises affected plugins; this handler does not re-init anything
/// itself.
pub async fn apply_sources(
    State(state): State<AppState>,
    Json(body): Json<ApplySourcesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let issues = collect_validation_issues(&body.config);
    if !issues.is_empty() {
        if !body.force {
            return Err(ApiError::invalid(format!(
                "source validation failed: {}",
                issues
                    .iter()
                    .map(|i| i.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            )));
        }
        let reason = body.reason.clone().unwrap_or_else(|| "no reason given".to_string());
        tracing::warn!(issues = issues.len(), reason = %reason, "apply-sources forced past validation failures");
        state.audit_log.push(crate::middleware::audit::AuditLogEntry {
            actor: "management-api".to_string(),
            namespace: state.config.tenancy.default_namespace.clone(),
            method: "POST".to_string(),
            path: "/api/management/v1alpha1/sources/apply".to_string(),
            status: 200,
            outcome: "forced",
            reason: Some(reason),
            at: chrono::Utc::now(),
        });
    }

    let version = state
        .config_store
        .save(body.config, &body.expected_version)
        .await?;
    Ok(envelope(to_json(json!({ "version": version }))?))
}

pub async fn list_revisions(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(envelope(to_json(state.config_store.list_revisions().await?)?))
}

pub async fn rollback_revision(
    State(state): State<AppState>,
    Path(version): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (config, version) = state.config_store.rollback(&version).await?;
    Ok(envelope(to_json(json!({ "config": config, "version": version }))?))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub plugin: String,
    #[serde(default)]
    pub source_id: Option<String>,
}

/// Enqueues a refresh job and returns immediately: the job queue's
/// idempotence key coalesces repeated requests for the same plugin+source
/// into the one already pending.
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if state.registry.get(&body.plugin).is_none() {
        return Err(ApiError::not_found(format!("unknown plugin: {}", body.plugin)));
    }
    let payload = json!({ "plugin": body.plugin, "sourceId": body.source_id });
    let run_id = state.job_queue.enqueue("refresh", payload).await;
    Ok((StatusCode::ACCEPTED, envelope(to_json(json!({ "runId": run_id }))?)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .job_queue
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("job not found: {id}")))?;
    Ok(envelope(to_json(job)?))
}

pub async fn list_jobs(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(envelope(to_json(state.job_queue.list().await)?))
}

/// Per-plugin, per-source sync diagnostics.
pub async fn diagnostics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let mut by_plugin = serde_json::Map::new();
    for plugin in state.registry.all().await {
        let identity = plugin.identity();
        by_plugin.insert(identity.name.clone(), to_json(plugin.diagnostics())?);
    }
    Ok(envelope(Value::Object(by_plugin)))
}

/// Worker loop that drains the job queue. Only `refresh` jobs exist today;
/// one or more of these run as a background `tokio::spawn` task per
/// `jobs.concurrency`, started from `server::create_server`.
pub async fn run_job_worker(state: AppState) {
    loop {
        let job = state.job_queue.claim("catalog-server").await;
        let Some(job) = job else {
            state.job_queue.evict_expired().await;
            tokio::time::sleep(state.config.jobs.poll_interval).await;
            continue;
        };
        if let Err(e) = state.job_queue.heartbeat(&job.id, "catalog-server") {
            tracing::warn!(job = %job.id, error = %e, "failed to mark job running");
            continue;
        }
        let outcome = run_refresh_job(&state, &job.payload).await;
        match outcome {
            Ok(()) => {
                if let Err(e) = state.job_queue.complete(&job.id, "catalog-server") {
                    tracing::warn!(job = %job.id, error = %e, "failed to mark job complete");
                }
            }
            Err(e) => {
                tracing::warn!(job = %job.id, error = %e, "refresh job failed");
                if let Err(e) = state.job_queue.fail(&job.id, "catalog-server", e.to_string()) {
                    tracing::warn!(job = %job.id, error = %e, "failed to mark job failed");
                }
            }
        }
    }
}

async fn run_refresh_job(state: &AppState, payload: &Value) -> Result<(), CoreError> {
    let plugin_name = payload
        .get("plugin")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CoreError::validation("refresh job missing plugin"))?;
    let source_id = payload
        .get("sourceId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let (config, _version) = state.config_store.load().await?;
    let result = loader::refresh_plugin(&state.registry, &config, plugin_name, source_id)
        .await
        .ok_or_else(|| CoreError::not_found(format!("unknown plugin: {plugin_name}")))?;

    match result.state {
        crate::plugin::PluginState::Failed(msg) => Err(CoreError::TransientError { message: msg }),
        _ => Ok(()),
    }
}
