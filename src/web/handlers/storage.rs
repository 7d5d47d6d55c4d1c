//! Public object download.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::backend::IMAGES_BUCKET;
use crate::storage::StorageError;
use crate::web::state::SharedState;
use crate::web::utils::{api_error, vault_error};

/// Serve an uploaded image. Paths carry a random UUID, so objects are
/// served without a session, the way a public bucket is.
pub async fn download_object_handler(
    State(state): State<SharedState>,
    Path((bucket, path)): Path<(String, String)>,
) -> Response {
    if bucket != IMAGES_BUCKET {
        return api_error(StatusCode::NOT_FOUND, "bucket not found");
    }
    match state.backend.download_image(&path).await {
        Ok(Some(image)) => {
            let headers = [
                (header::CONTENT_TYPE, image.meta.content_type),
                (
                    header::CACHE_CONTROL,
                    "public, max-age=31536000, immutable".to_string(),
                ),
                (header::ETAG, format!("\"{}\"", image.meta.sha256)),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
                (header::CONTENT_SECURITY_POLICY, "sandbox".to_string()),
            ];
            (StatusCode::OK, headers, image.data).into_response()
        }
        Ok(None) | Err(StorageError::InvalidPath(_)) => {
            api_error(StatusCode::NOT_FOUND, "object not found")
        }
        Err(e) => vault_error(e.into()),
    }
}
