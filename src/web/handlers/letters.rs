//! Letter listing, retrieval, save and delete handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use axum_extra::extract::Multipart;
use serde::Deserialize;

use crate::error::VaultError;
use crate::images::QueuedImage;
use crate::letters::{LetterDraft, LetterPayload, LetterView};
use crate::web::config::MAX_FILES_PER_SAVE;
use crate::web::session::require_caller;
use crate::web::state::SharedState;
use crate::web::utils::{api_error, vault_error};

#[derive(Deserialize)]
pub struct ListLettersQuery {
    drafts: Option<bool>,
}

pub async fn list_letters_handler(
    State(state): State<SharedState>,
    jar: CookieJar,
    Query(params): Query<ListLettersQuery>,
) -> Response {
    if let Err(resp) = require_caller(&state, &jar).await {
        return resp;
    }
    match state.letters.list(params.drafts.unwrap_or(false)).await {
        Ok(rows) => {
            let json: Vec<LetterView> = rows.into_iter().map(LetterView::from).collect();
            (StatusCode::OK, axum::Json(json)).into_response()
        }
        Err(e) => vault_error(e),
    }
}

pub async fn get_letter_handler(
    State(state): State<SharedState>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_caller(&state, &jar).await {
        return resp;
    }
    match state.letters.get(&id).await {
        Ok(Some(row)) => (StatusCode::OK, axum::Json(LetterView::from(row))).into_response(),
        Ok(None) => api_error(StatusCode::NOT_FOUND, "letter not found"),
        Err(e) => vault_error(e),
    }
}

pub async fn create_letter_handler(
    State(state): State<SharedState>,
    jar: CookieJar,
    multipart: Multipart,
) -> Response {
    save(state, jar, None, multipart).await
}

pub async fn update_letter_handler(
    State(state): State<SharedState>,
    jar: CookieJar,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Response {
    save(state, jar, Some(id), multipart).await
}

async fn save(
    state: SharedState,
    jar: CookieJar,
    target: Option<String>,
    multipart: Multipart,
) -> Response {
    let caller = match require_caller(&state, &jar).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let key = format!(
        "{}:{}",
        caller.user_id,
        target.as_deref().unwrap_or("new")
    );
    let Some(_guard) = state.in_flight.try_acquire(key) else {
        return vault_error(VaultError::Busy);
    };

    let (payload, files) = match read_save_request(multipart).await {
        Ok(parts) => parts,
        Err(resp) => return resp,
    };
    let draft = LetterDraft::from_payload(&payload, files);

    let saved = state
        .letters
        .save(&caller, target.as_deref(), payload.action, &draft)
        .await;
    match saved {
        Ok(row) => {
            let status = if target.is_some() {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (status, axum::Json(LetterView::from(row))).into_response()
        }
        Err(e) => vault_error(e),
    }
}

/// Split a save body into the `letter` JSON field and the `file` fields,
/// keeping files in the order they were sent.
async fn read_save_request(
    mut multipart: Multipart,
) -> Result<(LetterPayload, Vec<QueuedImage>), Response> {
    let mut payload: Option<LetterPayload> = None;
    let mut files: Vec<QueuedImage> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err(api_error(
                    StatusCode::BAD_REQUEST,
                    format!("malformed multipart body: {e}"),
                ))
            }
        };
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "letter" => {
                let text = field.text().await.map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, format!("failed to read letter: {e}"))
                })?;
                let parsed = serde_json::from_str(&text).map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, format!("invalid letter JSON: {e}"))
                })?;
                payload = Some(parsed);
            }
            "file" => {
                if files.len() >= MAX_FILES_PER_SAVE {
                    return Err(api_error(
                        StatusCode::BAD_REQUEST,
                        format!("at most {MAX_FILES_PER_SAVE} images per save"),
                    ));
                }
                let content_type = field.content_type().map(|ct| ct.to_string());
                let file_name = field.file_name().map(|f| f.to_string());
                let bytes = field.bytes().await.map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, format!("failed to read file: {e}"))
                })?;
                // An empty file input still submits a nameless, empty part.
                if bytes.is_empty() && file_name.as_deref().unwrap_or("").is_empty() {
                    continue;
                }
                files.push(QueuedImage::new(file_name, content_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let payload =
        payload.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "missing letter field"))?;
    Ok((payload, files))
}

pub async fn delete_letter_handler(
    State(state): State<SharedState>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Response {
    let caller = match require_caller(&state, &jar).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(_guard) = state
        .in_flight
        .try_acquire(format!("{}:{}", caller.user_id, id))
    else {
        return vault_error(VaultError::Busy);
    };

    match state.letters.delete(&caller, &id).await {
        Ok(report) => {
            let failed: Vec<serde_json::Value> = report
                .cleanup
                .failed
                .iter()
                .map(|(path, error)| serde_json::json!({ "path": path, "error": error }))
                .collect();
            let body = serde_json::json!({
                "id": report.letter.id,
                "deleted": true,
                "images_deleted": report.cleanup.deleted.len(),
                "images_missing": report.cleanup.missing.len(),
                "images_skipped": report.cleanup.skipped,
                "images_failed": failed,
            });
            (StatusCode::OK, axum::Json(body)).into_response()
        }
        Err(e) => vault_error(e),
    }
}
