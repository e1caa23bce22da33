//! Governance overlay and audit event types.
//!
//! Overlay vs entity separation: governance state lives exclusively here.
//! Entity providers must never set these fields — they are merged onto the
//! universal projection at response time by `catalog-server::overlay_store`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Draft,
    Active,
    Deprecated,
    Archived,
}

impl LifecycleState {
    /// `deprecated` and `archived` are terminal for new bindings;
    /// `deprecated -> active` requires an explicit un-deprecate action.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Deprecated | LifecycleState::Archived)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleTransition {
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Owner {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Risk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sla {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Compliance {
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Key identifying an overlay/audit subject: `(plugin, kind, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverlayKey {
    pub plugin: String,
    pub kind: String,
    pub name: String,
}

impl std::fmt::Display for OverlayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.plugin, self.kind, self.name)
    }
}

/// At most one per key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverlayRecord {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<LifecycleTransition>,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default)]
    pub risk: Risk,
    #[serde(default)]
    pub sla: Sla,
    #[serde(default)]
    pub compliance: Compliance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Allow,
    Deny,
    Success,
    Failure,
}

/// Append-only; retained per configured retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub plugin: String,
    pub kind: String,
    pub name: String,
    pub event_type: String,
    pub actor: String,
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
