//! Cache stage: serves `GET /api/plugins` and `GET /api/plugins/{name}/capabilities`
//! from the bounded discovery cache when warm.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use catalog_core::cache::DiscoveryCacheKey;

use crate::request_context::TenantContext;
use crate::server::AppState;

/// `/api/plugins` uses the discovery TTL; `/api/plugins/{name}/capabilities`
/// (a 4-segment path ending in `capabilities`) uses the shorter capabilities
/// TTL. Anything else isn't cached.
fn cache_ttl(method: &Method, path: &str, config: &crate::config::CacheConfig) -> Option<Duration> {
    if method != Method::GET {
        return None;
    }
    if path == "/api/plugins" {
        return Some(config.discovery_ttl);
    }
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() == 4 && segments[0] == "api" && segments[1] == "plugins" && segments[3] == "capabilities" {
        return Some(config.capabilities_ttl);
    }
    None
}

pub async fn cache_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(ttl) = (state.config.cache.enabled)
        .then(|| cache_ttl(req.method(), req.uri().path(), &state.config.cache))
        .flatten()
    else {
        return next.run(req).await;
    };

    let namespace = req
        .extensions()
        .get::<TenantContext>()
        .map(|t| t.namespace.clone())
        .unwrap_or_default();
    let key = DiscoveryCacheKey {
        path: req.uri().path().to_string(),
        namespace,
    };

    if let Some(cached) = state.discovery_cache.get(&key) {
        return axum::Json(serde_json::json!({ "data": cached })).into_response();
    }

    let response = next.run(req).await;
    if response.status() != StatusCode::OK {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) {
        if let Some(data) = value.get("data") {
            state.discovery_cache.set(key, data.clone(), ttl);
        }
    }
    Response::from_parts(parts, Body::from(bytes))
}
