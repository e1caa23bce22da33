//! Tenancy stage: resolves the request's namespace.

use axum::extract::{Query, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::api_error::ApiError;
use crate::config::TenancyMode;
use crate::request_context::TenantContext;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
struct NamespaceQuery {
    namespace: Option<String>,
}

pub async fn tenancy_middleware(
    State(state): State<AppState>,
    Query(query): Query<NamespaceQuery>,
    mut req: Request,
    next: Next,
) -> Response {
    let tenancy = &state.config.tenancy;

    if !tenancy.enabled {
        req.extensions_mut()
            .insert(TenantContext::single(tenancy.default_namespace.clone()));
        return next.run(req).await;
    }

    if tenancy.mode == TenancyMode::Single {
        req.extensions_mut()
            .insert(TenantContext::single(tenancy.default_namespace.clone()));
        return next.run(req).await;
    }

    let header_ns = req
        .headers()
        .get(tenancy.header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let requested = query.namespace.or(header_ns);

    let namespace = match requested {
        None => {
            return ApiError::InvalidRequest {
                message: "namespace mode requires a namespace (?namespace= or X-Namespace)".to_string(),
            }
            .into_response();
        }
        Some(ns) => {
            let allowed = tenancy.roles.iter().any(|r| r.namespaces.iter().any(|n| n == &ns || n == "*"));
            if !allowed {
                return ApiError::InvalidRequest {
                    message: format!("namespace not permitted: {ns}"),
                }
                .into_response();
            }
            ns
        }
    };

    req.extensions_mut()
        .insert(TenantContext::single(namespace));
    next.run(req).await
}
