//! Per-request context injected by the middleware stack.
//!
//! Request id, auth, and timing are stored in `axum`'s request extensions
//! and read back by downstream middleware/handlers, split into three
//! pieces matching the tenancy/identity stages: `TenantContext`
//! (namespace), `Identity` (remote user/groups), and a slim
//! `RequestContext` with an id/timing/metadata shape for logging and
//! audit.

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Instant;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

/// Resolved tenant namespace for a request, injected by the `tenancy`
/// middleware stage.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub namespace: String,
    pub user: Option<String>,
    pub groups: Vec<String>,
}

impl TenantContext {
    pub fn single(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            user: None,
            groups: Vec::new(),
        }
    }
}

/// Remote identity extracted from `X-Remote-User` / `X-Remote-Group` by the
/// `identity` middleware stage.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub user: Option<String>,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        self.user.is_none()
    }
}

/// Request-scoped tracing/timing context.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub start_time: Instant,
    pub metadata: HashMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            start_time: Instant::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn with_metadata(mut self, key: String, value: String) -> Self {
        self.metadata.insert(key, value);
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Lets handlers (and the closures `server.rs` builds for per-plugin
/// routes) pull `TenantContext`/`Identity` straight out of request
/// extensions as ordinary parameters. Falls back to a single default
/// namespace / anonymous identity rather than rejecting, since the tenancy
/// and identity middleware stages always run first in
/// `server::create_server`'s `ServiceBuilder` stack and insert one — these
/// fallbacks only matter for handlers exercised outside that stack, e.g.
/// in tests.
#[axum::async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<TenantContext>()
            .cloned()
            .unwrap_or_else(|| TenantContext::single("default")))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Identity>().cloned().unwrap_or_default())
    }
}
