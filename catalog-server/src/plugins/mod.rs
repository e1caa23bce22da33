//! Built-in plugin registration. Every asset kind is treated as
//! schema-opaque, so there is exactly one plugin implementation
//! (`generic::GenericPlugin`) instantiated once per kind rather than one
//! hand-written type per kind.

pub mod generic;

use std::sync::Arc;

use catalog_core::error::CoreError;

use crate::registry::Registry;
use generic::{GenericPlugin, BUILTIN_KINDS};

/// Registers one `GenericPlugin` per built-in asset kind. Called once
/// before `Registry::freeze` during server construction; registration
/// itself cannot fail, but returns `Result` to match the fallible shape of
/// the loader step that follows it.
pub async fn register_builtin_plugins(registry: &Registry) -> Result<(), CoreError> {
    for descriptor in BUILTIN_KINDS {
        registry.register(Arc::new(GenericPlugin::new(descriptor))).await?;
    }
    Ok(())
}
