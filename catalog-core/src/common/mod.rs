//! Shared helpers used across the config model and providers.

pub mod duration_serde;
