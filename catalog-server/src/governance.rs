//! Governance API store and handlers, mounted at `/api/governance/v1alpha1`.
//! Versions, bindings, and approvals use the same `DashMap` + per-key
//! serialization idiom as `overlay_store`, since they carry the same
//! concurrency requirements: exactly-one-per-key invariants, append-only
//! history.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use catalog_core::entity::AssetResource;
use catalog_core::error::CoreError;
use catalog_core::governance::{
    ApprovalDecision, ApprovalRequest, ApprovalStatus, AssetRef, Binding, Provenance, VersionRecord,
};
use catalog_core::overlay::OverlayKey;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::overlay_store::OverlayStore;
use crate::server::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindingKey {
    asset: OverlayKey,
    environment: String,
}

pub struct GovernanceStore {
    versions: DashMap<OverlayKey, Vec<VersionRecord>>,
    bindings: DashMap<BindingKey, Binding>,
    approvals: DashMap<String, ApprovalRequest>,
}

impl GovernanceStore {
    pub fn new() -> Self {
        Self {
            versions: DashMap::new(),
            bindings: DashMap::new(),
            approvals: DashMap::new(),
        }
    }

    pub fn list_versions(&self, key: &OverlayKey) -> Vec<VersionRecord> {
        self.versions.get(key).map(|v| v.clone()).unwrap_or_default()
    }

    /// Versions are immutable and ordered once created: this only ever
    /// appends.
    pub fn create_version(&self, key: &OverlayKey, version: VersionRecord) {
        self.versions.entry(key.clone()).or_default().push(version);
    }

    pub fn get_binding(&self, key: &OverlayKey, environment: &str) -> Option<Binding> {
        self.bindings
            .get(&BindingKey {
                asset: key.clone(),
                environment: environment.to_string(),
            })
            .map(|b| b.clone())
    }

    pub fn list_bindings(&self, key: &OverlayKey) -> Vec<Binding> {
        self.bindings
            .iter()
            .filter(|e| e.key().asset == *key)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Exactly one binding per `(asset, environment)`; records the replaced
    /// binding's version id so `rollback` can restore it.
    pub fn set_binding(&self, mut binding: Binding) -> Binding {
        let key = BindingKey {
            asset: OverlayKey {
                plugin: binding.plugin.clone(),
                kind: binding.kind.clone(),
                name: binding.name.clone(),
            },
            environment: binding.environment.clone(),
        };
        if let Some(previous) = self.bindings.get(&key) {
            binding.previous_version_id = Some(previous.version_id.clone());
        }
        self.bindings.insert(key, binding.clone());
        binding
    }

    /// Copies `from_env`'s binding onto `to_env`, pointing it at the same
    /// version id. Goes through `set_binding` so `to_env`'s prior version id
    /// (if any) is recorded as `previous_version_id`, the same as any other
    /// bind.
    pub fn promote(&self, key: &OverlayKey, from_env: &str, to_env: &str, bound_by: &str) -> Result<Binding, CoreError> {
        let source = self
            .get_binding(key, from_env)
            .ok_or_else(|| CoreError::not_found(format!("no binding for environment {from_env}")))?;
        let binding = Binding {
            plugin: key.plugin.clone(),
            kind: key.kind.clone(),
            name: key.name.clone(),
            environment: to_env.to_string(),
            version_id: source.version_id,
            bound_by: bound_by.to_string(),
            bound_at: Utc::now(),
            previous_version_id: None,
        };
        Ok(self.set_binding(binding))
    }

    /// Restores `environment`'s binding to `version_id` (typically a prior
    /// `previous_version_id`). Also goes through `set_binding`, so the
    /// version being rolled back away from becomes this call's
    /// `previous_version_id` in turn.
    pub fn rollback(&self, key: &OverlayKey, environment: &str, version_id: &str, bound_by: &str) -> Binding {
        let binding = Binding {
            plugin: key.plugin.clone(),
            kind: key.kind.clone(),
            name: key.name.clone(),
            environment: environment.to_string(),
            version_id: version_id.to_string(),
            bound_by: bound_by.to_string(),
            bound_at: Utc::now(),
            previous_version_id: None,
        };
        self.set_binding(binding)
    }

    pub fn list_approvals(&self) -> Vec<ApprovalRequest> {
        self.approvals.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get_approval(&self, id: &str) -> Option<ApprovalRequest> {
        self.approvals.get(id).map(|e| e.value().clone())
    }

    pub fn create_approval(&self, asset_ref: AssetRef, action: String, requester: String, policy_id: Option<String>) -> ApprovalRequest {
        let request = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            asset_ref,
            action,
            requester,
            status: ApprovalStatus::Pending,
            policy_id,
            created_at: Utc::now(),
            decisions: Vec::new(),
        };
        self.approvals.insert(request.id.clone(), request.clone());
        request
    }

    /// Terminal statuses are immutable: rejects decisions/cancels once the
    /// request is no longer pending.
    pub fn decide_approval(&self, id: &str, decision: ApprovalDecision) -> Result<ApprovalRequest, CoreError> {
        let mut entry = self
            .approvals
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(format!("approval not found: {id}")))?;
        if entry.status.is_terminal() {
            return Err(CoreError::Conflict {
                message: format!("approval {id} is already {:?}", entry.status),
            });
        }
        entry.status = if decision.approve {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Denied
        };
        entry.decisions.push(decision);
        Ok(entry.clone())
    }

    pub fn cancel_approval(&self, id: &str) -> Result<ApprovalRequest, CoreError> {
        let mut entry = self
            .approvals
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(format!("approval not found: {id}")))?;
        if entry.status.is_terminal() {
            return Err(CoreError::Conflict {
                message: format!("approval {id} is already {:?}", entry.status),
            });
        }
        entry.status = ApprovalStatus::Canceled;
        Ok(entry.clone())
    }
}

impl Default for GovernanceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn envelope(value: Value) -> impl IntoResponse {
    axum::Json(json!({ "data": value }))
}

fn to_json<T: Serialize>(value: T) -> Result<Value, ApiError> {
    serde_json::to_value(value)
        .map_err(CoreError::from)
        .map_err(ApiError::from)
}

fn asset_key(plugin: &str, kind: &str, name: &str) -> OverlayKey {
    OverlayKey {
        plugin: plugin.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

pub async fn get_overlay(
    State(state): State<AppState>,
    Path((plugin, kind, name)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let key = asset_key(&plugin, &kind, &name);
    let record = state.overlay_store.get(&key).unwrap_or_default();
    Ok(envelope(to_json(record)?))
}

#[derive(Debug, Deserialize)]
pub struct OverlayPatch {
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub annotations: Option<HashMap<String, String>>,
}

pub async fn patch_overlay(
    State(state): State<AppState>,
    Path((plugin, kind, name)): Path<(String, String, String)>,
    Json(patch): Json<OverlayPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let key = asset_key(&plugin, &kind, &name);
    if let Some(tags) = patch.tags {
        state.overlay_store.tag(&key, "governance-api", tags).await?;
    }
    if let Some(annotations) = patch.annotations {
        state
            .overlay_store
            .annotate(&key, "governance-api", annotations)
            .await?;
    }
    let record = state.overlay_store.get(&key).unwrap_or_default();
    Ok(envelope(to_json(record)?))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub page_size: Option<usize>,
}

pub async fn get_history(
    State(state): State<AppState>,
    Path((plugin, kind, name)): Path<(String, String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let key = asset_key(&plugin, &kind, &name);
    let mut events = state.overlay_store.history(&key).await;
    if let Some(limit) = query.page_size {
        events.truncate(limit);
    }
    Ok(envelope(to_json(events)?))
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path((plugin, kind, name)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let key = asset_key(&plugin, &kind, &name);
    Ok(envelope(to_json(state.governance.list_versions(&key))?))
}

#[derive(Debug, Deserialize)]
pub struct CreateVersionRequest {
    pub version_label: String,
    pub created_by: String,
    pub source_type: String,
    pub source_uri: String,
    pub source_id: String,
    pub revision_id: Option<String>,
}

pub async fn create_version(
    State(state): State<AppState>,
    Path((plugin, kind, name)): Path<(String, String, String)>,
    Json(body): Json<CreateVersionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let key = asset_key(&plugin, &kind, &name);
    let version = VersionRecord {
        version_id: Uuid::new_v4().to_string(),
        version_label: body.version_label,
        created_by: body.created_by,
        created_at: Utc::now(),
        provenance: Provenance {
            source_type: body.source_type,
            source_uri: body.source_uri,
            source_id: body.source_id,
            revision_id: body.revision_id,
            observed_at: Utc::now(),
            integrity: Default::default(),
        },
    };
    state.governance.create_version(&key, version.clone());
    Ok(envelope(to_json(version)?))
}

pub async fn list_bindings(
    State(state): State<AppState>,
    Path((plugin, kind, name)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let key = asset_key(&plugin, &kind, &name);
    Ok(envelope(to_json(state.governance.list_bindings(&key))?))
}

#[derive(Debug, Deserialize)]
pub struct SetBindingRequest {
    pub environment: String,
    pub version_id: String,
    pub bound_by: String,
}

pub async fn set_binding(
    State(state): State<AppState>,
    Path((plugin, kind, name)): Path<(String, String, String)>,
    Json(body): Json<SetBindingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let binding = Binding {
        plugin,
        kind,
        name,
        environment: body.environment,
        version_id: body.version_id,
        bound_by: body.bound_by,
        bound_at: Utc::now(),
        previous_version_id: None,
    };
    let saved = state.governance.set_binding(binding);
    Ok(envelope(to_json(saved)?))
}

pub async fn list_approvals(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(envelope(to_json(state.governance.list_approvals())?))
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub principal: String,
    pub approve: bool,
    pub comment: Option<String>,
}

pub async fn decide_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DecisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let decision = ApprovalDecision {
        principal: body.principal,
        approve: body.approve,
        comment: body.comment,
        decided_at: Utc::now(),
    };
    let request = state.governance.decide_approval(&id, decision)?;
    Ok(envelope(to_json(request)?))
}

pub async fn cancel_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request = state.governance.cancel_approval(&id)?;
    Ok(envelope(to_json(request)?))
}

/// Unused in handler signatures directly but kept for callers that need to
/// project a governed asset's resource alongside its overlay (e.g. a future
/// combined read); re-exported so `handlers::assets` can merge overlay state
/// onto provider output without duplicating the merge logic.
pub fn merge_overlay(mut resource: AssetResource, overlays: &OverlayStore, key: &OverlayKey) -> AssetResource {
    if let Some(record) = overlays_blocking_get(overlays, key) {
        if let Some(lifecycle) = record.lifecycle {
            resource.status.lifecycle = Some(format!("{:?}", lifecycle.state).to_lowercase());
        }
        resource.metadata.tags = record.tags;
        resource.metadata.labels.extend(record.annotations);
    }
    resource
}

fn overlays_blocking_get(overlays: &OverlayStore, key: &OverlayKey) -> Option<catalog_core::overlay::OverlayRecord> {
    overlays.get(key)
}
