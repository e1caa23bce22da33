//! Async refresh job types shared between the loader and the job queue
//! (`catalog-server::jobs`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Claimed,
    Running,
    Succeeded,
    Failed,
}

/// Payload for a `refresh` job: refresh one source, or every enabled source
/// in the plugin's section when `source_id` is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshPayload {
    pub plugin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: String,
    pub payload: Value,
    pub state: JobState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A job in `claimed`/`running` whose lease has expired is reclaimable
    /// by any worker.
    pub fn lease_expired(&self, lease_timeout: chrono::Duration, now: DateTime<Utc>) -> bool {
        matches!(self.state, JobState::Claimed | JobState::Running)
            && self
                .claimed_at
                .map(|t| t + lease_timeout < now)
                .unwrap_or(false)
    }
}
