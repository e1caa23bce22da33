//! Shared `reqwest::Client` wrapper used by the `http` and `oci` providers.
//!
//! Shares auth-strategy/default-header construction and `map_error_response`
//! classification across providers, with conditional-fetch (ETag /
//! If-Modified-Since) support for sources that support it.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{header::HeaderMap, Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::CoreError;

#[derive(Clone, Debug)]
pub enum AuthStrategy {
    Bearer { token: String },
    Header { name: String, value: String },
    None,
}

#[derive(Clone)]
pub struct HttpProviderClient {
    http: Client,
    base_url: String,
    default_headers: HeaderMap,
}

impl HttpProviderClient {
    pub fn new(
        timeout: Duration,
        base_url: String,
        headers: &HashMap<String, String>,
        auth: AuthStrategy,
    ) -> Result<Self, CoreError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::config(format!("failed to build http client: {e}")))?;

        let mut default_headers = HeaderMap::new();

        match auth {
            AuthStrategy::Bearer { token } => {
                if let Ok(value) = format!("Bearer {token}").parse() {
                    default_headers.insert("Authorization", value);
                }
            }
            AuthStrategy::Header { name, value } => {
                if let (Ok(name), Ok(value)) =
                    (name.parse::<reqwest::header::HeaderName>(), value.parse())
                {
                    default_headers.insert(name, value);
                }
            }
            AuthStrategy::None => {}
        }

        for (k, v) in headers {
            if let (Ok(name), Ok(value)) = (k.parse::<reqwest::header::HeaderName>(), v.parse()) {
                default_headers.insert(name, value);
            }
        }

        Ok(Self {
            http,
            base_url,
            default_headers,
        })
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if let Some(stripped) = path.strip_prefix('/') {
            format!("{}/{}", self.base_url.trim_end_matches('/'), stripped)
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), path)
        }
    }

    /// GET with optional conditional-fetch headers; returns `None` on a 304
    /// so callers can skip re-processing an unchanged upstream document.
    pub async fn get_conditional<TResp: DeserializeOwned>(
        &self,
        path: &str,
        etag: Option<&str>,
    ) -> Result<Option<(TResp, Option<String>)>, CoreError> {
        let url = self.build_url(path);
        let mut req = self
            .http
            .request(Method::GET, url)
            .headers(self.default_headers.clone());
        if let Some(etag) = etag {
            req = req.header("If-None-Match", etag);
        }
        let resp = req.send().await?;

        if resp.status() == StatusCode::NOT_MODIFIED {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }

        let new_etag = resp
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = resp.json::<TResp>().await?;
        Ok(Some((body, new_etag)))
    }

    /// GET returning the parsed body alongside the `Docker-Content-Digest`
    /// response header, used by the OCI provider to capture the manifest
    /// digest and surface it per-entry, the same way the Git provider
    /// surfaces a commit SHA.
    pub async fn get_with_digest<TResp: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<(TResp, Option<String>), CoreError> {
        let url = self.build_url(path);
        let resp = self
            .http
            .request(Method::GET, url)
            .headers(self.default_headers.clone())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        let digest = resp
            .headers()
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = resp.json::<TResp>().await?;
        Ok((body, digest))
    }

    pub async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, CoreError> {
        let url = self.build_url(path);
        let resp = self
            .http
            .request(Method::GET, url)
            .headers(self.default_headers.clone())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

pub async fn map_error_response(resp: Response) -> CoreError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").cloned())
        .and_then(|e| e.get("message").cloned())
        .and_then(|m| m.as_str().map(|s| s.to_string()))
        .unwrap_or(body);

    match status.as_u16() {
        401 | 403 => CoreError::AuthError { message },
        404 => CoreError::NotFound { message },
        429 => CoreError::RateLimited { message },
        500..=599 => CoreError::TransientError { message },
        _ => CoreError::ValidationError { message },
    }
}
