//! Per-key overlay state plus the append-only audit log.
//!
//! `dashmap` for the hot map, one `tokio::sync::Mutex` per key for
//! serialized read-modify-write — a lock per logical unit rather than one
//! global lock. Overlay writes and their audit event are applied under the
//! same per-key lock so a reader can never observe one without the other.

use std::collections::HashMap;
use std::sync::Arc;

use catalog_core::error::CoreError;
use catalog_core::overlay::{AuditEvent, AuditOutcome, LifecycleTransition, OverlayKey, OverlayRecord};
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Guards read-modify-write access to a single overlay key. Acquired for
/// every mutation so concurrent `tag`/`annotate`/`deprecate` calls against
/// the same asset serialize instead of racing.
struct KeyLock;

pub struct OverlayStore {
    overlays: DashMap<OverlayKey, OverlayRecord>,
    locks: DashMap<OverlayKey, Arc<Mutex<KeyLock>>>,
    audit: Mutex<Vec<AuditEvent>>,
    audit_retention: chrono::Duration,
}

impl OverlayStore {
    pub fn new(audit_retention: chrono::Duration) -> Self {
        Self {
            overlays: DashMap::new(),
            locks: DashMap::new(),
            audit: Mutex::new(Vec::new()),
            audit_retention,
        }
    }

    fn lock_for(&self, key: &OverlayKey) -> Arc<Mutex<KeyLock>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(KeyLock)))
            .clone()
    }

    pub fn get(&self, key: &OverlayKey) -> Option<OverlayRecord> {
        self.overlays.get(key).map(|e| e.value().clone())
    }

    /// Applies `mutate` to the current (or default) overlay record under the
    /// key's lock, then appends the audit event, atomically from a caller's
    /// perspective.
    async fn apply<F>(
        &self,
        key: &OverlayKey,
        actor: &str,
        action: &str,
        event_type: &str,
        mutate: F,
    ) -> Result<OverlayRecord, CoreError>
    where
        F: FnOnce(&mut OverlayRecord) -> Result<(), CoreError>,
    {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let mut record = self.get(key).unwrap_or_default();
        let outcome = match mutate(&mut record) {
            Ok(()) => {
                self.overlays.insert(key.clone(), record.clone());
                AuditOutcome::Success
            }
            Err(err) => {
                self.push_audit(key, actor, action, event_type, AuditOutcome::Failure, Some(err.to_string()))
                    .await;
                return Err(err);
            }
        };
        self.push_audit(key, actor, action, event_type, outcome, None).await;
        Ok(record)
    }

    async fn push_audit(
        &self,
        key: &OverlayKey,
        actor: &str,
        action: &str,
        event_type: &str,
        outcome: AuditOutcome,
        reason: Option<String>,
    ) {
        let event = AuditEvent {
            id: Uuid::new_v4().to_string(),
            plugin: key.plugin.clone(),
            kind: key.kind.clone(),
            name: key.name.clone(),
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            action: action.to_string(),
            outcome,
            reason,
            created_at: Utc::now(),
        };
        let mut log = self.audit.lock().await;
        log.push(event);
        self.trim_locked(&mut log);
    }

    fn trim_locked(&self, log: &mut Vec<AuditEvent>) {
        let cutoff = Utc::now() - self.audit_retention;
        log.retain(|e| e.created_at >= cutoff);
    }

    pub async fn tag(&self, key: &OverlayKey, actor: &str, tags: Vec<String>) -> Result<OverlayRecord, CoreError> {
        self.apply(key, actor, "tag", "overlay.tag", move |record| {
            for tag in tags {
                if !record.tags.contains(&tag) {
                    record.tags.push(tag);
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn annotate(
        &self,
        key: &OverlayKey,
        actor: &str,
        annotations: HashMap<String, String>,
    ) -> Result<OverlayRecord, CoreError> {
        self.apply(key, actor, "annotate", "overlay.annotate", move |record| {
            record.annotations.extend(annotations);
            Ok(())
        })
        .await
    }

    /// Transitions lifecycle state. Rejects leaving a terminal state without
    /// an explicit un-deprecate/un-archive action id.
    pub async fn transition_lifecycle(
        &self,
        key: &OverlayKey,
        actor: &str,
        action: &str,
        transition: LifecycleTransition,
    ) -> Result<OverlayRecord, CoreError> {
        self.apply(key, actor, action, "overlay.lifecycle", move |record| {
            if let Some(current) = &record.lifecycle {
                if current.state.is_terminal() && action != "un-deprecate" && action != "un-archive" {
                    return Err(CoreError::Conflict {
                        message: format!(
                            "lifecycle state {:?} is terminal; use an explicit un-deprecate/un-archive action",
                            current.state
                        ),
                    });
                }
            }
            record.lifecycle = Some(transition);
            Ok(())
        })
        .await
    }

    /// Audit trail for one key, newest first.
    pub async fn history(&self, key: &OverlayKey) -> Vec<AuditEvent> {
        let log = self.audit.lock().await;
        let mut events: Vec<AuditEvent> = log
            .iter()
            .filter(|e| e.plugin == key.plugin && e.kind == key.kind && e.name == key.name)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events
    }

    /// Records an authorization decision without mutating overlay state.
    /// Every request is audited, allowed or not.
    pub async fn audit_authz(&self, key: &OverlayKey, actor: &str, action: &str, allowed: bool) {
        self.push_audit(
            key,
            actor,
            action,
            "authz.decision",
            if allowed { AuditOutcome::Allow } else { AuditOutcome::Deny },
            None,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> OverlayKey {
        OverlayKey {
            plugin: "model".to_string(),
            kind: "model".to_string(),
            name: "gpt".to_string(),
        }
    }

    #[tokio::test]
    async fn tag_is_idempotent_and_audited() {
        let store = OverlayStore::new(chrono::Duration::days(30));
        store
            .tag(&key(), "alice", vec!["prod".to_string()])
            .await
            .unwrap();
        store
            .tag(&key(), "alice", vec!["prod".to_string(), "gpu".to_string()])
            .await
            .unwrap();

        let record = store.get(&key()).unwrap();
        assert_eq!(record.tags, vec!["prod", "gpu"]);

        let history = store.history(&key()).await;
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.outcome == AuditOutcome::Success));
    }

    #[tokio::test]
    async fn deprecated_asset_rejects_further_deprecation_without_un_deprecate() {
        let store = OverlayStore::new(chrono::Duration::days(30));
        store
            .transition_lifecycle(
                &key(),
                "bob",
                "deprecate",
                LifecycleTransition {
                    state: catalog_core::overlay::LifecycleState::Deprecated,
                    reason: Some("superseded".to_string()),
                    changed_by: "bob".to_string(),
                    changed_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let err = store
            .transition_lifecycle(
                &key(),
                "bob",
                "deprecate",
                LifecycleTransition {
                    state: catalog_core::overlay::LifecycleState::Deprecated,
                    reason: None,
                    changed_by: "bob".to_string(),
                    changed_at: Utc::now(),
                },
            )
            .await;
        assert!(err.is_err());
    }
}
