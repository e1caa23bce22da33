//! HTTP error mapping for the catalog server.
//!
//! A status-code-per-variant match and `IntoResponse` structure, wrapped in
//! the `{"error": {code, message, details?}}` shape the catalog surface
//! uses. Variants cover `catalog_core::CoreError` passthrough plus the
//! server-local cases the middleware chain needs (tenant/identity
//! rejection, authorization denial, optimistic-concurrency conflicts,
//! not-found resources).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use catalog_core::CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Core(e) => core_error_status(e),
            ApiError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::InvalidRequest { .. } => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::Unauthenticated { .. } => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            ApiError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            ApiError::Config { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
            ApiError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

fn core_error_status(e: &CoreError) -> (StatusCode, &'static str) {
    match e {
        CoreError::ValidationError { .. } => (StatusCode::BAD_REQUEST, "validation_error"),
        CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        CoreError::AuthError { .. } => (StatusCode::UNAUTHORIZED, "auth_error"),
        CoreError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
        CoreError::IntegrityError { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "integrity_error"),
        CoreError::TransientError { .. } => (StatusCode::SERVICE_UNAVAILABLE, "transient_error"),
        CoreError::ConfigError { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
        CoreError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
        CoreError::Serialization(_) | CoreError::Yaml(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error")
        }
        CoreError::Http(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
        CoreError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "io_error"),
    }
}
