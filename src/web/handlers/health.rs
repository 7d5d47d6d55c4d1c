//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::web::state::SharedState;
use crate::web::utils::api_error;

pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ok",
        "members": state.gate.allowlist().members().len(),
        "sign_in": state.provider.authorize_url(&state.callback_url()).is_ok(),
        "in_flight": state.in_flight.len(),
    });
    (StatusCode::OK, axum::Json(body))
}

/// Fallback for unknown routes.
pub async fn not_found_handler() -> Response {
    api_error(StatusCode::NOT_FOUND, "not found")
}
