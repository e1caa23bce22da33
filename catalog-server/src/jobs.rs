//! Async refresh job queue.
//!
//! Uses a circuit-breaker-style state machine for the
//! pending/claimed/running/succeeded/failed transitions, and `DashMap`-backed
//! concurrent stores as used elsewhere in this crate. Jobs are kept in
//! memory only — unlike config revisions and overlays, job state is
//! explicitly ephemeral and does not survive a restart.

use std::collections::HashMap;
use std::sync::Arc;

use catalog_core::error::CoreError;
use catalog_core::job::{Job, JobState};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub lease_timeout: chrono::Duration,
    pub max_attempts: u32,
    pub backoff_base: chrono::Duration,
    pub backoff_max: chrono::Duration,
    /// How long an idle worker sleeps between polls when nothing is eligible
    /// to claim.
    pub poll_interval: chrono::Duration,
    /// How long a terminal (succeeded/failed) job is kept before `evict_expired`
    /// removes it.
    pub retention: chrono::Duration,
}

/// Coalescing key so repeated `refresh(plugin, source_id)` requests queued
/// while one is already pending collapse into a single job.
fn idempotence_key(kind: &str, payload: &Value) -> String {
    format!("{kind}:{payload}")
}

pub struct JobQueue {
    jobs: DashMap<String, Job>,
    by_idempotence_key: DashMap<String, String>,
    order: RwLock<Vec<String>>,
    config: JobQueueConfig,
}

impl JobQueue {
    pub fn new(config: JobQueueConfig) -> Self {
        Self {
            jobs: DashMap::new(),
            by_idempotence_key: DashMap::new(),
            order: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Enqueues a job, or returns the id of an already-pending job with the
    /// same kind+payload instead of creating a duplicate.
    pub async fn enqueue(&self, kind: &str, payload: Value) -> String {
        let key = idempotence_key(kind, &payload);
        if let Some(existing) = self.by_idempotence_key.get(&key) {
            let id = existing.value().clone();
            if let Some(job) = self.jobs.get(&id) {
                if matches!(job.state, JobState::Pending | JobState::Claimed | JobState::Running) {
                    return id;
                }
            }
        }

        let id = Uuid::new_v4().to_string();
        let job = Job {
            id: id.clone(),
            kind: kind.to_string(),
            payload,
            state: JobState::Pending,
            attempts: 0,
            claimed_by: None,
            claimed_at: None,
            not_before: None,
            last_error: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.jobs.insert(id.clone(), job);
        self.by_idempotence_key.insert(key, id.clone());
        self.order.write().await.push(id.clone());
        id
    }

    /// Reclaims any job whose lease has expired, then claims the oldest
    /// eligible pending job for `worker_id`.
    pub async fn claim(&self, worker_id: &str) -> Option<Job> {
        self.reclaim_expired();

        let order = self.order.read().await;
        let now = Utc::now();
        for id in order.iter() {
            let mut entry = match self.jobs.get_mut(id) {
                Some(e) => e,
                None => continue,
            };
            let eligible = matches!(entry.state, JobState::Pending)
                && entry.not_before.map(|t| t <= now).unwrap_or(true);
            if eligible {
                entry.state = JobState::Claimed;
                entry.claimed_by = Some(worker_id.to_string());
                entry.claimed_at = Some(now);
                entry.attempts += 1;
                return Some(entry.clone());
            }
        }
        None
    }

    fn reclaim_expired(&self) {
        let now = Utc::now();
        for mut entry in self.jobs.iter_mut() {
            if entry.lease_expired(self.config.lease_timeout, now) {
                tracing::warn!(job = %entry.id, "reclaiming job with expired lease");
                entry.state = JobState::Pending;
                entry.claimed_by = None;
                entry.claimed_at = None;
            }
        }
    }

    pub fn heartbeat(&self, job_id: &str, worker_id: &str) -> Result<(), CoreError> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| CoreError::not_found(format!("job not found: {job_id}")))?;
        if entry.claimed_by.as_deref() != Some(worker_id) {
            return Err(CoreError::Conflict {
                message: format!("job {job_id} is not claimed by {worker_id}"),
            });
        }
        entry.state = JobState::Running;
        entry.claimed_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&self, job_id: &str, worker_id: &str) -> Result<(), CoreError> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| CoreError::not_found(format!("job not found: {job_id}")))?;
        if entry.claimed_by.as_deref() != Some(worker_id) {
            return Err(CoreError::Conflict {
                message: format!("job {job_id} is not claimed by {worker_id}"),
            });
        }
        entry.state = JobState::Succeeded;
        entry.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Marks a job failed. Reschedules with exponential backoff unless
    /// `max_attempts` has been exhausted, in which case it stays `failed`.
    pub fn fail(&self, job_id: &str, worker_id: &str, error: impl Into<String>) -> Result<(), CoreError> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| CoreError::not_found(format!("job not found: {job_id}")))?;
        if entry.claimed_by.as_deref() != Some(worker_id) {
            return Err(CoreError::Conflict {
                message: format!("job {job_id} is not claimed by {worker_id}"),
            });
        }
        entry.last_error = Some(error.into());
        if entry.attempts >= self.config.max_attempts {
            entry.state = JobState::Failed;
            entry.finished_at = Some(Utc::now());
        } else {
            entry.state = JobState::Pending;
            entry.claimed_by = None;
            entry.claimed_at = None;
            entry.not_before = Some(Utc::now() + self.backoff_for(entry.attempts));
        }
        Ok(())
    }

    fn backoff_for(&self, attempt: u32) -> chrono::Duration {
        let scaled = self.config.backoff_base * 2i32.saturating_pow(attempt.saturating_sub(1));
        scaled.min(self.config.backoff_max)
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.get(job_id).map(|e| e.value().clone())
    }

    pub async fn list(&self) -> Vec<Job> {
        let order = self.order.read().await;
        order
            .iter()
            .filter_map(|id| self.jobs.get(id).map(|e| e.value().clone()))
            .collect()
    }

    /// Drops terminal jobs (`succeeded`/`failed`) whose `finished_at` is older
    /// than `config.retention`, from `jobs`, `order`, and `by_idempotence_key`.
    pub async fn evict_expired(&self) {
        let cutoff = Utc::now() - self.config.retention;
        let expired: Vec<String> = self
            .jobs
            .iter()
            .filter(|e| {
                matches!(e.state, JobState::Succeeded | JobState::Failed)
                    && e.finished_at.is_some_and(|t| t < cutoff)
            })
            .map(|e| e.id.clone())
            .collect();
        if expired.is_empty() {
            return;
        }
        let expired_set: std::collections::HashSet<&str> = expired.iter().map(|s| s.as_str()).collect();
        self.order.write().await.retain(|id| !expired_set.contains(id.as_str()));
        self.by_idempotence_key.retain(|_, id| !expired_set.contains(id.as_str()));
        for id in &expired {
            self.jobs.remove(id);
        }
    }
}

pub fn shared(config: JobQueueConfig) -> Arc<JobQueue> {
    Arc::new(JobQueue::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JobQueueConfig {
        JobQueueConfig {
            lease_timeout: chrono::Duration::seconds(60),
            max_attempts: 3,
            backoff_base: chrono::Duration::seconds(1),
            backoff_max: chrono::Duration::seconds(60),
            poll_interval: chrono::Duration::seconds(1),
            retention: chrono::Duration::seconds(7 * 24 * 3600),
        }
    }

    #[tokio::test]
    async fn enqueue_coalesces_duplicate_pending_jobs() {
        let queue = JobQueue::new(config());
        let payload = serde_json::json!({"plugin": "model"});
        let id1 = queue.enqueue("refresh", payload.clone()).await;
        let id2 = queue.enqueue("refresh", payload).await;
        assert_eq!(id1, id2);
        assert_eq!(queue.list().await.len(), 1);
    }

    #[tokio::test]
    async fn claim_heartbeat_complete_lifecycle() {
        let queue = JobQueue::new(config());
        let id = queue.enqueue("refresh", serde_json::json!({"plugin": "model"})).await;
        let job = queue.claim("worker-1").await.unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.state, JobState::Claimed);

        queue.heartbeat(&id, "worker-1").unwrap();
        assert_eq!(queue.get(&id).unwrap().state, JobState::Running);

        queue.complete(&id, "worker-1").unwrap();
        assert_eq!(queue.get(&id).unwrap().state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn failed_job_reschedules_until_attempts_exhausted() {
        let queue = JobQueue::new(config());
        let id = queue.enqueue("refresh", serde_json::json!({"plugin": "model"})).await;

        for _ in 0..2 {
            let job = queue.claim("worker-1").await.unwrap();
            assert_eq!(job.id, id);
            queue.fail(&id, "worker-1", "transient error").unwrap();
            let reloaded = queue.get(&id).unwrap();
            assert_eq!(reloaded.state, JobState::Pending);
        }

        // third attempt exhausts max_attempts
        let mut job = queue.get(&id).unwrap();
        job.not_before = None;
        queue.jobs.insert(id.clone(), job);
        let claimed = queue.claim("worker-1").await.unwrap();
        assert_eq!(claimed.attempts, 3);
        queue.fail(&id, "worker-1", "still failing").unwrap();
        assert_eq!(queue.get(&id).unwrap().state, JobState::Failed);
    }

    #[tokio::test]
    async fn evict_expired_drops_old_terminal_jobs() {
        let mut cfg = config();
        cfg.retention = chrono::Duration::seconds(-1);
        let queue = JobQueue::new(cfg);
        let id = queue.enqueue("refresh", serde_json::json!({"plugin": "model"})).await;
        queue.claim("worker-1").await.unwrap();
        queue.complete(&id, "worker-1").unwrap();

        queue.evict_expired().await;

        assert!(queue.get(&id).is_none());
        assert!(queue.list().await.is_empty());
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed() {
        let mut cfg = config();
        cfg.lease_timeout = chrono::Duration::seconds(-1);
        let queue = JobQueue::new(cfg);
        let id = queue.enqueue("refresh", serde_json::json!({"plugin": "model"})).await;
        queue.claim("worker-1").await.unwrap();
        // lease_timeout is negative, so the claim is immediately expired
        let reclaimed = queue.claim("worker-2").await.unwrap();
        assert_eq!(reclaimed.id, id);
    }
}
