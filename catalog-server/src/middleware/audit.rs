//! Audit stage: records `{actor, namespace, method, path, status, outcome,
//! reason?}` for every request after the response is known, including
//! requests the authorization stage denied.
//!
//! Implementation note: to observe an authorization deny, this layer must
//! wrap *outside* the authorization layer in `server::create_server` — the
//! response only becomes known once the inner stack (including
//! authorization) has returned.

use std::sync::Mutex;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::request_context::{Identity, TenantContext};
use crate::server::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub actor: String,
    pub namespace: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub outcome: &'static str,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Bounded ring of recent request audit entries. Unlike the overlay store's
/// per-asset audit trail, this is request-level and not keyed by asset.
pub struct RequestAuditLog {
    entries: Mutex<Vec<AuditLogEntry>>,
    max_entries: usize,
}

impl RequestAuditLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            max_entries,
        }
    }

    pub fn push(&self, entry: AuditLogEntry) {
        let mut entries = self.entries.lock().unwrap();
        entries.push(entry);
        let len = entries.len();
        if len > self.max_entries {
            entries.drain(0..len - self.max_entries);
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<AuditLogEntry> {
        let entries = self.entries.lock().unwrap();
        entries.iter().rev().take(limit).cloned().collect()
    }
}

pub async fn audit_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !state.config.audit.enabled {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let namespace = req
        .extensions()
        .get::<TenantContext>()
        .map(|t| t.namespace.clone())
        .unwrap_or_else(|| state.config.tenancy.default_namespace.clone());
    let actor = req
        .extensions()
        .get::<Identity>()
        .and_then(|i| i.user.clone())
        .unwrap_or_else(|| "anonymous".to_string());

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let outcome = if response.status().is_success() {
        "allow"
    } else if status == 403 {
        "deny"
    } else {
        "error"
    };
    let reason = response
        .extensions()
        .get::<crate::middleware::authz::DenyReason>()
        .map(|r| r.0.clone());

    if outcome != "deny" || state.config.audit.log_denied {
        state.audit_log.push(AuditLogEntry {
            actor,
            namespace,
            method,
            path,
            status,
            outcome,
            reason,
            at: Utc::now(),
        });
    }

    response
}
