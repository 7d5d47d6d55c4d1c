//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::web::config::max_save_body_bytes;
use crate::web::handlers;
use crate::web::state::SharedState;

/// Build the complete Axum router with all API, auth and storage routes.
pub fn build_router(state: SharedState) -> Router {
    let body_limit = DefaultBodyLimit::max(max_save_body_bytes(state.max_image_bytes));

    Router::new()
        // Health
        .route("/api/health", get(handlers::health::health_handler))
        // Auth
        .route("/auth/login", get(handlers::auth::login_handler))
        .route("/auth/callback", get(handlers::auth::callback_handler))
        .route("/auth/signout", post(handlers::auth::signout_handler))
        .route("/api/me", get(handlers::auth::me_handler))
        // Letters API
        .route(
            "/api/letters",
            get(handlers::letters::list_letters_handler)
                .post(handlers::letters::create_letter_handler)
                .layer(body_limit.clone()),
        )
        .route(
            "/api/letters/:id",
            get(handlers::letters::get_letter_handler)
                .put(handlers::letters::update_letter_handler)
                .delete(handlers::letters::delete_letter_handler)
                .layer(body_limit),
        )
        // Decorations
        .route("/api/stickers", get(handlers::stickers::list_stickers_handler))
        // Public object storage
        .route(
            "/storage/v1/object/public/:bucket/*path",
            get(handlers::storage::download_object_handler),
        )
        .fallback(handlers::health::not_found_handler)
        .with_state(state)
}
