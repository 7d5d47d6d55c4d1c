//! Sign-in, callback, sign-out and "who am I" handlers.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::VaultError;
use crate::web::config::DEFAULT_NEXT;
use crate::web::session::{clear_session, require_caller, session_cookie, session_token};
use crate::web::state::SharedState;
use crate::web::utils::{local_redirect_target, vault_error};

const UNAUTHORIZED_REDIRECT: &str = "/?error=unauthorized";
const AUTH_FAILED_REDIRECT: &str = "/?error=auth-failed";

pub async fn login_handler(State(state): State<SharedState>) -> Response {
    match state.provider.authorize_url(&state.callback_url()) {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(e) => vault_error(e.into()),
    }
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    next: Option<String>,
}

/// Exchange the provider's code, apply the allowlist, and send the browser
/// on. Denied identities never keep a session.
pub async fn callback_handler(
    State(state): State<SharedState>,
    jar: CookieJar,
    Query(params): Query<CallbackQuery>,
) -> Response {
    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        warn!("auth callback without a code");
        return (clear_session(jar), Redirect::temporary(AUTH_FAILED_REDIRECT)).into_response();
    };

    let identity = match state
        .provider
        .exchange_code(&code, &state.callback_url())
        .await
    {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "code exchange failed");
            return (clear_session(jar), Redirect::temporary(AUTH_FAILED_REDIRECT)).into_response();
        }
    };

    match state.gate.admit(&identity).await {
        Ok(admission) => {
            let next = local_redirect_target(params.next.as_deref(), DEFAULT_NEXT);
            let jar = jar.add(session_cookie(admission.token, state.secure_cookies()));
            (jar, Redirect::temporary(next)).into_response()
        }
        Err(VaultError::Unauthorized) => {
            (clear_session(jar), Redirect::temporary(UNAUTHORIZED_REDIRECT)).into_response()
        }
        Err(e) => {
            warn!(error = %e, "admission failed");
            (clear_session(jar), Redirect::temporary(AUTH_FAILED_REDIRECT)).into_response()
        }
    }
}

pub async fn signout_handler(State(state): State<SharedState>, jar: CookieJar) -> Response {
    if let Some(token) = session_token(&jar) {
        if let Err(e) = state.gate.sign_out(&token).await {
            return vault_error(e);
        }
    }
    let body = serde_json::json!({ "signed_out": true });
    (clear_session(jar), axum::Json(body)).into_response()
}

pub async fn me_handler(State(state): State<SharedState>, jar: CookieJar) -> Response {
    let caller = match require_caller(&state, &jar).await {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let body = serde_json::json!({
        "user_id": caller.user_id,
        "email": caller.email,
        "display_name": caller.display_name,
    });
    debug!(member = %crate::logging::member(&caller.email), "session checked");
    (StatusCode::OK, axum::Json(body)).into_response()
}
