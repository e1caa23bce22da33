//! Authorization stage: maps `(method, path)` to `(resource, verb)` and asks
//! the configured authorizer to allow or deny.
//!
//! The `sar` authorizer speaks to a Kubernetes `SubjectAccessReview` endpoint
//! with a direct `reqwest` call, the same way `catalog_core::providers::http`
//! talks to arbitrary HTTP sources — no dedicated k8s client crate needed.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::api_error::ApiError;
use crate::config::AuthzMode;
use crate::request_context::{Identity, TenantContext};
use crate::server::AppState;

/// `(resource, verb)` resolved from the request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceVerb {
    pub resource: &'static str,
    pub verb: &'static str,
}

/// Classifies a request by matching its method and path against a fixed
/// pattern table. Paths not recognised fall back to a permissive
/// `(unknown, read|write)` pair rather than blocking traffic the table
/// doesn't anticipate (e.g. `/healthz`).
pub fn classify(method: &Method, path: &str) -> ResourceVerb {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if method == Method::GET && path == "/api/plugins" {
        return ResourceVerb { resource: "plugins", verb: "list" };
    }
    if method == Method::GET
        && segments.len() == 4
        && segments[0] == "api"
        && segments[1] == "plugins"
        && segments[3] == "capabilities"
    {
        return ResourceVerb { resource: "capabilities", verb: "get" };
    }

    if segments.len() >= 3 && segments[0] == "api" && segments[1] == "management" {
        let rest = &segments[3..];
        return match (method, rest) {
            (&Method::GET, ["sources"]) => ResourceVerb { resource: "catalogsources", verb: "get" },
            (&Method::POST, ["sources", "validate"]) => ResourceVerb { resource: "catalogsources", verb: "get" },
            (&Method::POST, ["sources", "apply"]) => ResourceVerb { resource: "catalogsources", verb: "create" },
            (&Method::GET, ["revisions"]) => ResourceVerb { resource: "catalogsources", verb: "list" },
            (&Method::POST, [.., "rollback"]) => ResourceVerb { resource: "catalogsources", verb: "create" },
            (&Method::POST, ["refresh"]) => ResourceVerb { resource: "jobs", verb: "create" },
            (&Method::GET, ["jobs"]) | (&Method::GET, ["jobs", _]) => ResourceVerb { resource: "jobs", verb: "list" },
            (&Method::GET, ["diagnostics"]) => ResourceVerb { resource: "diagnostics", verb: "get" },
            _ => ResourceVerb { resource: "catalogsources", verb: "write" },
        };
    }

    if let Some(catalog_idx) = segments.iter().position(|s| s.ends_with("_catalog")) {
        let rest = &segments[catalog_idx + 2..]; // skip `{plugin}_catalog` and `{version}`
        if !rest.is_empty() && rest[0] == "management" {
            if method == Method::POST && rest.get(1) == Some(&"apply-source") {
                return ResourceVerb { resource: "catalogsources", verb: "create" };
            }
            if method == Method::DELETE && rest.get(1) == Some(&"sources") {
                return ResourceVerb { resource: "catalogsources", verb: "delete" };
            }
            if method == Method::POST && rest.get(1).map(|s| s.starts_with("refresh")).unwrap_or(false) {
                return ResourceVerb { resource: "jobs", verb: "create" };
            }
        }
        if let Some(last) = rest.last() {
            if last.ends_with(":action") {
                return ResourceVerb { resource: "actions", verb: "execute" };
            }
        }
        if rest.len() == 1 && method == Method::GET {
            return ResourceVerb { resource: "assets", verb: "list" };
        }
        if rest.len() == 2 && method == Method::GET {
            return ResourceVerb { resource: "assets", verb: "get" };
        }
    }

    if path.ends_with(":action") {
        return ResourceVerb { resource: "actions", verb: "execute" };
    }

    ResourceVerb {
        resource: "unknown",
        verb: if method == Method::GET { "list" } else { "write" },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DecisionKey {
    actor: String,
    resource: String,
    verb: String,
    namespace: String,
}

/// Short-lived allow-decision cache keyed by `(identity, resource, verb,
/// namespace)`.
pub struct DecisionCache {
    entries: Mutex<LruCache<DecisionKey, (bool, Option<String>, Instant)>>,
    ttl: Duration,
}

impl DecisionCache {
    pub fn new(size: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(NonZeroUsize::new(size.max(1)).unwrap())),
            ttl,
        }
    }

    fn get(&self, key: &DecisionKey) -> Option<(bool, Option<String>)> {
        let mut entries = self.entries.lock().unwrap();
        if let Some((allowed, reason, at)) = entries.get(key) {
            if at.elapsed() <= self.ttl {
                return Some((*allowed, reason.clone()));
            }
            entries.pop(key);
        }
        None
    }

    fn set(&self, key: DecisionKey, allowed: bool, reason: Option<String>) {
        self.entries.lock().unwrap().put(key, (allowed, reason, Instant::now()));
    }
}

#[derive(Debug, Serialize)]
struct SarRequest<'a> {
    user: &'a str,
    groups: &'a [String],
    resource: &'a str,
    verb: &'a str,
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
struct SarResponse {
    allowed: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Extension carried on a denied response so the audit stage (which wraps
/// outside this one) can log why, without re-running the authorization
/// decision itself.
#[derive(Debug, Clone)]
pub struct DenyReason(pub String);

async fn authorize(
    mode: AuthzMode,
    sar_endpoint: Option<&str>,
    identity: &Identity,
    namespace: &str,
    rv: &ResourceVerb,
) -> (bool, Option<String>) {
    match mode {
        AuthzMode::None => (true, None),
        AuthzMode::Sar => {
            let Some(endpoint) = sar_endpoint else {
                return (false, Some("sar mode enabled with no sar_endpoint configured".to_string()));
            };
            let client = reqwest::Client::new();
            let body = SarRequest {
                user: identity.user.as_deref().unwrap_or(""),
                groups: &identity.groups,
                resource: rv.resource,
                verb: rv.verb,
                namespace,
            };
            match client.post(endpoint).json(&body).send().await {
                Ok(resp) => match resp.json::<SarResponse>().await {
                    Ok(r) => (r.allowed, r.reason),
                    Err(err) => {
                        tracing::warn!(error = %err, "malformed SubjectAccessReview response, denying");
                        (false, Some("malformed sar response".to_string()))
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "SubjectAccessReview call failed, denying");
                    (false, Some("sar request failed".to_string()))
                }
            }
        }
    }
}

pub async fn authz_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let rv = classify(&method, &path);

    let identity = req
        .extensions()
        .get::<Identity>()
        .cloned()
        .unwrap_or_default();
    let namespace = req
        .extensions()
        .get::<TenantContext>()
        .map(|t| t.namespace.clone())
        .unwrap_or_else(|| state.config.tenancy.default_namespace.clone());

    let actor = identity.user.clone().unwrap_or_else(|| "anonymous".to_string());
    let key = DecisionKey {
        actor: actor.clone(),
        resource: rv.resource.to_string(),
        verb: rv.verb.to_string(),
        namespace: namespace.clone(),
    };

    let (allowed, reason) = if let Some(cached) = state.decision_cache.get(&key) {
        cached
    } else {
        let (decided, reason) = authorize(
            state.config.authz.mode,
            state.config.authz.sar_endpoint.as_deref(),
            &identity,
            &namespace,
            &rv,
        )
        .await;
        state.decision_cache.set(key, decided, reason.clone());
        (decided, reason)
    };

    if !allowed {
        let mut response = ApiError::Forbidden {
            message: format!("{actor} may not {} {}", rv.verb, rv.resource),
        }
        .into_response();
        response
            .extensions_mut()
            .insert(DenyReason(reason.unwrap_or_else(|| "denied".to_string())));
        return response;
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_plugin_list_and_capabilities() {
        let rv = classify(&Method::GET, "/api/plugins");
        assert_eq!(rv, ResourceVerb { resource: "plugins", verb: "list" });

        let rv = classify(&Method::GET, "/api/plugins/model/capabilities");
        assert_eq!(rv, ResourceVerb { resource: "capabilities", verb: "get" });
    }

    #[test]
    fn classifies_asset_list_and_get() {
        let rv = classify(&Method::GET, "/api/model_catalog/v1/models");
        assert_eq!(rv, ResourceVerb { resource: "assets", verb: "list" });

        let rv = classify(&Method::GET, "/api/model_catalog/v1/models/gpt");
        assert_eq!(rv, ResourceVerb { resource: "assets", verb: "get" });
    }

    #[test]
    fn classifies_management_and_action_endpoints() {
        let rv = classify(&Method::POST, "/api/model_catalog/v1/management/apply-source");
        assert_eq!(rv, ResourceVerb { resource: "catalogsources", verb: "create" });

        let rv = classify(&Method::DELETE, "/api/model_catalog/v1/management/sources/abc");
        assert_eq!(rv, ResourceVerb { resource: "catalogsources", verb: "delete" });

        let rv = classify(&Method::POST, "/api/model_catalog/v1/management/refresh");
        assert_eq!(rv, ResourceVerb { resource: "jobs", verb: "create" });

        let rv = classify(&Method::POST, "/api/model_catalog/v1/models/gpt:action");
        assert_eq!(rv, ResourceVerb { resource: "actions", verb: "execute" });
    }

    #[tokio::test]
    async fn none_authorizer_always_allows() {
        let identity = Identity::default();
        let rv = ResourceVerb { resource: "assets", verb: "list" };
        let (allowed, reason) = authorize(AuthzMode::None, None, &identity, "default", &rv).await;
        assert!(allowed);
        assert!(reason.is_none());
    }

    #[tokio::test]
    async fn sar_authorizer_denies_without_endpoint() {
        let identity = Identity::default();
        let rv = ResourceVerb { resource: "assets", verb: "list" };
        let (allowed, reason) = authorize(AuthzMode::Sar, None, &identity, "default", &rv).await;
        assert!(!allowed);
        assert!(reason.is_some());
    }
}
