//! Sticker catalogue endpoint.

use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::stickers;

pub async fn list_stickers_handler() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(stickers::catalogue()))
}
