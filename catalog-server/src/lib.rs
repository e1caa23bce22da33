//! # Catalog Server
//!
//! HTTP server exposing a pluggable catalog of AI assets — models, MCP
//! servers, prompt templates, agents, guardrails, policies, datasets,
//! evaluators, benchmarks, notebooks, skills, and knowledge sources — behind
//! one discovery and governance surface.
//!
//! ## Architecture
//!
//! - **`plugin`**: the `CatalogPlugin` trait and the types plugins exchange
//!   with the registry (identity, capabilities, list/get/action).
//! - **`plugins`**: the built-in plugin set, one `GenericPlugin` instance per
//!   asset kind.
//! - **`registry`**: the frozen-after-startup plugin table plus per-plugin
//!   health status.
//! - **`loader`**: drives `CatalogPlugin::init` against the config store's
//!   current document, at startup and on reconcile.
//! - **`reconcile`**: background loop that re-runs the loader whenever the
//!   config store publishes a new revision.
//! - **`config_store`**: versioned, CAS-checked persistence of the active
//!   source set, with a history ring for rollback.
//! - **`overlay_store`** / **`governance`**: operator-authored state layered
//!   on top of provider-sourced assets — tags, annotations, lifecycle,
//!   versions, bindings, approvals.
//! - **`action_dispatcher`**: `{resource}:action` dispatch, plugin-specific
//!   actions first, falling back to the built-in `tag`/`annotate`/`deprecate`.
//! - **`jobs`**: the async refresh job queue backing long-running actions.
//! - **`middleware`**: the per-request stack (CORS, tenancy, identity, audit,
//!   authorization, discovery cache).
//! - **`handlers`**: HTTP endpoint implementations.
//! - **`server`**: wires all of the above into an `axum::Router`.

pub mod action_dispatcher;
pub mod api_error;
pub mod config;
pub mod config_store;
pub mod governance;
pub mod handlers;
pub mod jobs;
pub mod loader;
pub mod middleware;
pub mod overlay_store;
pub mod plugin;
pub mod plugins;
pub mod reconcile;
pub mod registry;
pub mod request_context;
pub mod server;

pub use server::create_server;
