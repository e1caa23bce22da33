//! # Provider System Module
//!
//! Defines the uniform provider contract: every provider implements
//! `enumerate(ctx, source) -> stream<EntityRecord>` (or a signal that the
//! source is unchanged since the last call) plus `diagnostics()`. Concrete
//! providers (local YAML, Git, HTTP, OCI) are feature-gated submodules;
//! `create_provider` resolves a `Source`'s `type` field to a boxed
//! `Provider`.
//!
//! Uses an `async_trait`, `Send + Sync` trait shape and a factory function
//! resolving a type tag to a boxed implementation, generalized from
//! chat/embedding-style methods down to the single `enumerate` stream
//! method this contract needs.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::entity::EntityRecord;
use crate::error::CoreError;

pub mod http_client;

#[cfg(feature = "yaml")]
pub mod yaml;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "git")]
pub mod git;
#[cfg(feature = "oci")]
pub mod oci;

/// Pull-based stream of records yielded by `Provider::enumerate`. A stream
/// abort (cancellation, panic) must leave the store untouched — partial
/// failure safety is enforced by the loader, not the provider.
pub type RecordStream = Pin<Box<dyn Stream<Item = Result<EntityRecord, CoreError>> + Send>>;

/// Per-call context: deadline and cancellation are threaded through every
/// outbound fetch — timeouts are mandatory on HTTP and OCI calls.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub timeout: Duration,
}

impl Default for ProviderContext {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemCounts {
    pub observed: u64,
    pub emitted: u64,
    pub dropped: u64,
}

/// `diagnostics()` return shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub item_counts: ItemCounts,
}

/// Outcome of one `Provider::enumerate` call. `Unchanged` lets a provider
/// signal "I checked upstream and nothing changed" (an HTTP 304, an
/// unmodified Git ref, an unchanged OCI digest) without that being
/// indistinguishable from a genuinely empty source — callers must leave
/// previously loaded entities for this source alone on `Unchanged` rather
/// than clearing them.
pub enum EnumerateResult {
    Unchanged,
    Records(RecordStream),
}

/// Uniform provider contract. Implementations MUST be idempotent (repeated
/// runs over an unchanged source yield the same record set) and
/// partial-failure-safe.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Recognised source `type` string (`yaml`, `http`, `git`, `oci`).
    fn kind(&self) -> &'static str;

    async fn enumerate(
        &self,
        ctx: &ProviderContext,
        source: &crate::config_model::Source,
    ) -> Result<EnumerateResult, CoreError>;

    async fn diagnostics(&self) -> Diagnostics;
}

/// Resolves a source's `type` to a concrete provider. Unknown types surface
/// as a `ConfigError` (unrecoverable source misconfiguration).
pub fn create_provider(source_type: &str) -> Result<Box<dyn Provider>, CoreError> {
    match source_type {
        #[cfg(feature = "yaml")]
        "yaml" => Ok(Box::new(yaml::YamlProvider::new())),
        #[cfg(feature = "http")]
        "http" => Ok(Box::new(http::HttpProvider::new())),
        #[cfg(feature = "git")]
        "git" => Ok(Box::new(git::GitProvider::new())),
        #[cfg(feature = "oci")]
        "oci" => Ok(Box::new(oci::OciProvider::new())),
        other => Err(CoreError::config(format!(
            "unknown source type: {other}"
        ))),
    }
}
