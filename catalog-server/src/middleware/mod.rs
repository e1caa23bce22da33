//! Request middleware stack.
//!
//! Order, outermost first: CORS, tenancy, identity, authorization, audit,
//! cache. Each stage is its own module, one function per concern, composed
//! in `server::create_server` via `ServiceBuilder`/`from_fn_with_state`.

pub mod audit;
pub mod authz;
pub mod cache;
pub mod identity;
pub mod tenancy;

use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::config::CorsConfig;

/// Builds the CORS layer from config.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    if !config.enabled {
        return CorsLayer::new();
    }

    let mut layer = CorsLayer::new();

    layer = if config.allowed_origins.iter().any(|o| o == "*") {
        layer.allow_origin(AllowOrigin::any())
    } else {
        let origins: Vec<_> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    };

    layer = if config.allowed_methods.iter().any(|m| m == "*") {
        layer.allow_methods(AllowMethods::any())
    } else {
        let methods: Vec<_> = config
            .allowed_methods
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        layer.allow_methods(AllowMethods::list(methods))
    };

    layer = if config.allowed_headers.iter().any(|h| h == "*") {
        layer.allow_headers(AllowHeaders::any())
    } else {
        let headers: Vec<_> = config
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        layer.allow_headers(AllowHeaders::list(headers))
    };

    layer
}
