//! Universal entity projection and capabilities document types.
//!
//! Every plugin defines its own entity type internally, but the host treats
//! entities opaquely except for one requirement: each entity MUST project to
//! `AssetResource`. This module also carries the provider-facing
//! `EntityRecord` wire type and the per-plugin `CapabilitiesDocument`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source-id provenance for an asset, set once on ingest and never touched
/// by governance overlays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source_ref: SourceRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetStatus {
    /// Overlay-derived lifecycle state, merged in at response time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
}

/// The universal projection every plugin entity must produce.
///
/// `name` is unique within `(plugin, kind)`. `spec` stays opaque
/// (`serde_json::Value`) because plugin-specific schema details are out of
/// scope for the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetResource {
    pub api_version: String,
    pub kind: String,
    pub metadata: AssetMetadata,
    pub spec: Value,
    #[serde(default)]
    pub status: AssetStatus,
}

/// A raw record yielded by a provider's `Enumerate` stream, before it is
/// upserted into a plugin's store and before overlay merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub name: String,
    pub source_id: String,
    pub payload: Value,
    /// Optional integrity digest (sha256 etc.) for externally fetched
    /// artifacts; a mismatch at verification time raises `IntegrityError`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Git commit SHA / OCI digest, captured per-entry where the source supports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Operator set a filter field supports in list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterField {
    pub field: String,
    pub operators: Vec<String>,
}

/// One action entry in a plugin's capabilities document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub id: String,
    pub scope: ActionScope,
    #[serde(default)]
    pub supports_dry_run: bool,
    #[serde(default)]
    pub idempotent: bool,
    #[serde(default)]
    pub destructive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionScope {
    Asset,
    Source,
}

/// Per-kind section of a plugin's capabilities document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindCapabilities {
    pub kind: String,
    pub list_endpoint: String,
    pub get_endpoint: String,
    pub action_endpoint: String,
    pub columns: Vec<String>,
    pub filter_fields: Vec<FilterField>,
    pub detail_groups: Vec<String>,
    pub action_ids: Vec<String>,
}

/// The full machine-readable description of a plugin's entity kinds,
/// endpoints, columns, filters, and actions, version-stamped so clients can
/// detect drift after a reconcile-triggered re-init.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesDocument {
    pub plugin: String,
    pub version: String,
    pub kinds: Vec<KindCapabilities>,
    pub actions: Vec<ActionDescriptor>,
    /// Whether this plugin supports source management endpoints
    /// (`sources` CRUD, `validate-source`, `apply-source`, `refresh`,
    /// `diagnostics`) — mounted under `basePath/management` only when true.
    pub source_manageable: bool,
}
