//! # Catalog Core
//!
//! Provider contract, config model, and entity types shared by the catalog
//! server. This crate has no knowledge of HTTP; it defines the data model
//! (`entity`, `config_model`, `overlay`, `governance`, `job`) and the
//! provider abstraction (`providers`) that `catalog-server` drives.
//!
//! `circuit_breaker` and `cache` use an LRU + TTL, state-machine-breaker
//! shape; `providers` covers four catalog source types (`yaml`, `git`,
//! `http`, `oci`).
//!
//! ## Quick start
//!
//! ```rust
//! use catalog_core::config_model::load_configs;
//! use catalog_core::providers::{create_provider, EnumerateResult, ProviderContext};
//!
//! # async fn run() -> Result<(), catalog_core::error::CoreError> {
//! let config = load_configs(&["catalog-sources.yaml"])?;
//! let section = &config.catalogs["models"];
//! let ctx = ProviderContext::default();
//! for source in &section.sources {
//!     if !source.enabled {
//!         continue;
//!     }
//!     let provider = create_provider(&source.source_type)?;
//!     if let EnumerateResult::Records(_stream) = provider.enumerate(&ctx, source).await? {
//!         // stream of `EntityRecord`s for this source
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod common;
pub mod config_model;
pub mod entity;
pub mod error;
pub mod globmatch;
pub mod governance;
pub mod job;
pub mod overlay;
pub mod providers;

pub use error::CoreError;

/// Result type for core-crate operations.
pub type Result<T> = std::result::Result<T, CoreError>;
