//! Shared utility functions for the web server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::error::VaultError;
use crate::provider::ProviderError;
use crate::storage::StorageError;

/// Build a standard JSON error response.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, axum::Json(body)).into_response()
}

pub fn status_for(err: &VaultError) -> StatusCode {
    match err {
        VaultError::Unauthorized => StatusCode::UNAUTHORIZED,
        VaultError::Forbidden(_) => StatusCode::FORBIDDEN,
        VaultError::NotFound(_) => StatusCode::NOT_FOUND,
        VaultError::Validation(_) => StatusCode::BAD_REQUEST,
        VaultError::Busy => StatusCode::CONFLICT,
        VaultError::Storage(StorageError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
        VaultError::Storage(StorageError::Unavailable(_)) => StatusCode::BAD_GATEWAY,
        VaultError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        VaultError::Provider(ProviderError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
        VaultError::Provider(_) => StatusCode::BAD_GATEWAY,
    }
}

/// Map a vault error onto its JSON error response. Service failures are
/// logged here, at the handler boundary.
pub fn vault_error(err: VaultError) -> Response {
    let status = status_for(&err);
    if err.is_service_failure() {
        error!(error = %err, status = status.as_u16(), "request failed");
    } else if matches!(err, VaultError::Forbidden(_)) {
        warn!(error = %err, "request refused");
    }
    api_error(status, err.to_string())
}

/// `next` if it is a local absolute path, otherwise `fallback`.
pub fn local_redirect_target<'a>(next: Option<&'a str>, fallback: &'a str) -> &'a str {
    match next {
        Some(path)
            if path.starts_with('/')
                && !path.starts_with("//")
                && !path.contains('\\')
                && !path.chars().any(char::is_control) =>
        {
            path
        }
        _ => fallback,
    }
}
