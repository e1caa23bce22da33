//! Version, binding, and approval types backing the governance API
//! (`catalog-server::governance`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Integrity {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub source_type: String,
    pub source_uri: String,
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub integrity: Integrity,
}

/// Versions are immutable and ordered once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_id: String,
    pub version_label: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub provenance: Provenance,
}

/// Exactly one binding per `(asset, environment)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub plugin: String,
    pub kind: String,
    pub name: String,
    pub environment: String,
    pub version_id: String,
    pub bound_by: String,
    pub bound_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Canceled,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub principal: String,
    pub approve: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRef {
    pub plugin: String,
    pub kind: String,
    pub name: String,
}

/// Terminal statuses are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub asset_ref: AssetRef,
    pub action: String,
    pub requester: String,
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub decisions: Vec<ApprovalDecision>,
}
