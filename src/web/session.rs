//! Session cookie handling.

use axum::http::StatusCode;
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::gate::Caller;
use crate::web::state::AppState;
use crate::web::utils::{api_error, vault_error};

pub const SESSION_COOKIE: &str = "vault_session";

pub fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

pub fn clear_session(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

pub fn session_token(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
}

/// Resolve the request's session into an admitted caller, or the 401
/// response to send instead.
pub async fn require_caller(state: &AppState, jar: &CookieJar) -> Result<Caller, Response> {
    let Some(token) = session_token(jar) else {
        return Err(api_error(StatusCode::UNAUTHORIZED, "not signed in"));
    };
    state.gate.authorize(&token).await.map_err(vault_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_is_http_only_and_scoped_to_root() {
        let cookie = session_cookie("tok".to_string(), true);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }

    #[test]
    fn token_is_read_from_the_jar() {
        let jar = CookieJar::new().add(session_cookie("abc".to_string(), false));
        assert_eq!(session_token(&jar).as_deref(), Some("abc"));
        let jar = clear_session(jar);
        assert_eq!(session_token(&jar), None);
        assert_eq!(session_token(&CookieJar::new()), None);
    }
}
