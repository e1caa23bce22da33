//! # Core Error Types
//!
//! Error taxonomy shared by every provider, the config model, and the
//! loader. A uniform provider-error table: each variant carries its own
//! retry policy, documented on the variant rather than computed at call
//! sites.
//!
//! `CoreError` is the library-level error type; the server crate wraps it in
//! `ApiError` to add HTTP-only variants (`Forbidden`, `Conflict`) and an
//! `IntoResponse` impl.

use thiserror::Error;

/// Errors surfaced by providers, the config model, and the loader.
///
/// Retry policy is fixed per variant:
/// - `ConfigError`, `AuthError`, `NotFound`, `ValidationError`,
///   `IntegrityError`: not retryable until the source/config changes.
/// - `RateLimited`, `TransientError`: retryable with exponential backoff.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed input, unknown field, or schema violation.
    #[error("validation error: {message}")]
    ValidationError { message: String },

    /// Unknown plugin, entity, source, or config key.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Missing or invalid provider credentials.
    #[error("auth error: {message}")]
    AuthError { message: String },

    /// Upstream or self-imposed rate limiting; retry with backoff.
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// Provider digest/integrity mismatch on a fetched record.
    #[error("integrity error: {message}")]
    IntegrityError { message: String },

    /// Retryable upstream failure (network, 5xx, timeout).
    #[error("transient error: {message}")]
    TransientError { message: String },

    /// Unrecoverable source misconfiguration.
    #[error("config error: {message}")]
    ConfigError { message: String },

    /// CAS version mismatch or duplicate registration.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// JSON serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parse failure (config files, source-set documents).
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client / network failure talking to an HTTP, Git, or OCI source.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem failure reading a local YAML source or config revision.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        CoreError::ConfigError {
            message: message.into(),
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        CoreError::ValidationError {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        CoreError::NotFound {
            message: message.into(),
        }
    }

    /// Whether retrying this error immediately (with backoff) can help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::RateLimited { .. } | CoreError::TransientError { .. }
        )
    }

    /// Stable machine-readable code used in the `{error:{code,...}}` envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ValidationError { .. } => "validation_error",
            CoreError::NotFound { .. } => "not_found",
            CoreError::AuthError { .. } => "auth_error",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::IntegrityError { .. } => "integrity_error",
            CoreError::TransientError { .. } => "transient_error",
            CoreError::ConfigError { .. } => "config_error",
            CoreError::Conflict { .. } => "conflict",
            CoreError::Serialization(_) => "serialization_error",
            CoreError::Yaml(_) => "yaml_error",
            CoreError::Http(_) => "http_error",
            CoreError::Io(_) => "io_error",
        }
    }
}
