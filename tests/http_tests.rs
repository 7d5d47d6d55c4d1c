//! End-to-end tests for the HTTP surface.
//!
//! Tests cover:
//! - Callback admission, `next` handling and the two error redirects
//! - Session re-checks on the API and sign-out
//! - Multipart create / update / delete with image upload and cleanup
//! - Draft title defaulting and the sealed-title validation
//! - Public object download, stickers and health

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use letter_vault::backend::Backend;
use letter_vault::gate::Allowlist;
use letter_vault::images::PublicUrls;
use letter_vault::memory::{BackendCall, MemoryBackend};
use letter_vault::provider::{IdentityProvider, ProviderError, ProviderIdentity};
use letter_vault::web::router::build_router;
use letter_vault::web::state::{AppState, SharedState};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Provider that accepts a fixed set of codes.
struct FakeProvider {
    codes: HashMap<String, ProviderIdentity>,
}

impl FakeProvider {
    fn new() -> Self {
        let mut codes = HashMap::new();
        for (code, subject, email) in [
            ("andrei", "sub-andrei", "andreicatigan@gmail.com"),
            ("shantal", "sub-shantal", "ShantalClaireSuening@gmail.com"),
            ("stranger", "sub-stranger", "stranger@gmail.com"),
        ] {
            codes.insert(
                code.to_string(),
                ProviderIdentity {
                    subject: subject.to_string(),
                    email: Some(email.to_string()),
                    email_verified: Some(true),
                },
            );
        }
        Self { codes }
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn authorize_url(&self, redirect_uri: &str) -> Result<String, ProviderError> {
        Ok(format!("https://provider.test/authorize?redirect_uri={redirect_uri}"))
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<ProviderIdentity, ProviderError> {
        self.codes
            .get(code)
            .cloned()
            .ok_or_else(|| ProviderError::Rejected("invalid_grant".to_string()))
    }
}

struct Vault {
    base_url: String,
    backend: Arc<MemoryBackend>,
    state: SharedState,
    shutdown: oneshot::Sender<()>,
}

async fn start_vault() -> Vault {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind vault");
    let base_url = format!("http://{}", listener.local_addr().expect("local addr"));

    let backend = Arc::new(MemoryBackend::with_urls(PublicUrls::new(&base_url)));
    let state = AppState::new(
        backend.clone(),
        Allowlist::default(),
        Arc::new(FakeProvider::new()),
        &base_url,
        64 * 1024,
    )
    .into_shared();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });
    Vault {
        base_url,
        backend,
        state,
        shutdown: shutdown_tx,
    }
}

struct Reply {
    status: u16,
    location: Option<String>,
    set_cookie: Vec<String>,
    content_type: Option<String>,
    content_type_options: Option<String>,
    body: Vec<u8>,
}

impl Reply {
    fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

fn read_reply(resp: ureq::Response) -> Reply {
    let status = resp.status();
    let location = resp.header("location").map(str::to_string);
    let set_cookie = resp.all("set-cookie").into_iter().map(str::to_string).collect();
    let content_type = resp.header("content-type").map(str::to_string);
    let content_type_options = resp.header("x-content-type-options").map(str::to_string);
    let mut body = Vec::new();
    resp.into_reader().read_to_end(&mut body).unwrap_or(0);
    Reply {
        status,
        location,
        set_cookie,
        content_type,
        content_type_options,
        body,
    }
}

fn send(req: ureq::Request, body: Option<(&str, &[u8])>) -> Reply {
    let result = match body {
        Some((content_type, bytes)) => req.set("Content-Type", content_type).send_bytes(bytes),
        None => req.call(),
    };
    match result {
        Ok(r) => read_reply(r),
        Err(ureq::Error::Status(_, r)) => read_reply(r),
        Err(e) => panic!("request failed: {e}"),
    }
}

fn request(method: &str, url: &str, token: Option<&str>) -> ureq::Request {
    let agent = ureq::AgentBuilder::new().redirects(0).build();
    let req = agent.request(method, url);
    match token {
        Some(t) => req.set("Cookie", &format!("vault_session={t}")),
        None => req,
    }
}

/// Run a blocking request off the async runtime.
async fn call(
    method: &'static str,
    url: String,
    token: Option<String>,
    body: Option<(String, Vec<u8>)>,
) -> Reply {
    tokio::task::spawn_blocking(move || {
        let req = request(method, &url, token.as_deref());
        send(req, body.as_ref().map(|(ct, b)| (ct.as_str(), b.as_slice())))
    })
    .await
    .unwrap()
}

fn session_from(reply: &Reply) -> Option<String> {
    reply.set_cookie.iter().find_map(|c| {
        let value = c.strip_prefix("vault_session=")?;
        let token = value.split(';').next()?;
        (!token.is_empty()).then(|| token.to_string())
    })
}

async fn sign_in(vault: &Vault, code: &str) -> String {
    let reply = call(
        "GET",
        format!("{}/auth/callback?code={code}", vault.base_url),
        None,
        None,
    )
    .await;
    assert_eq!(reply.status, 307);
    session_from(&reply).expect("session cookie")
}

const BOUNDARY: &str = "----vault-test-boundary-7MA4YWxkTrZu0gW";

/// Encode a save body: the `letter` JSON field then one `file` field per image.
fn save_body(letter: serde_json::Value, files: &[(&str, &str, &[u8])]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"letter\"\r\n\r\n{letter}\r\n"
        )
        .as_bytes(),
    );
    for (name, content_type, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

const PNG: &[u8] = b"\x89PNG\r\n\x1a\nnot-really-a-png";
const JPEG: &[u8] = b"\xff\xd8\xff\xe0not-really-a-jpeg";

// ---------------------------------------------------------------------------
// Sign-in
// ---------------------------------------------------------------------------

#[tokio::test]
async fn member_is_admitted_and_redirected() {
    let vault = start_vault().await;

    let reply = call(
        "GET",
        format!("{}/auth/callback?code=andrei", vault.base_url),
        None,
        None,
    )
    .await;
    assert_eq!(reply.status, 307);
    assert_eq!(reply.location.as_deref(), Some("/dashboard"));
    let token = session_from(&reply).expect("session cookie");
    assert!(reply.set_cookie[0].contains("HttpOnly"));

    let me = call("GET", format!("{}/api/me", vault.base_url), Some(token), None).await;
    assert_eq!(me.status, 200);
    assert_eq!(me.json()["display_name"], "Andrei");
    assert_eq!(me.json()["email"], "andreicatigan@gmail.com");

    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn callback_honors_only_local_next() {
    let vault = start_vault().await;

    let reply = call(
        "GET",
        format!("{}/auth/callback?code=shantal&next=/drafts", vault.base_url),
        None,
        None,
    )
    .await;
    assert_eq!(reply.location.as_deref(), Some("/drafts"));

    let reply = call(
        "GET",
        format!(
            "{}/auth/callback?code=shantal&next=https%3A%2F%2Fevil.example",
            vault.base_url
        ),
        None,
        None,
    )
    .await;
    assert_eq!(reply.location.as_deref(), Some("/dashboard"));

    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn stranger_is_turned_away_without_a_session() {
    let vault = start_vault().await;

    let reply = call(
        "GET",
        format!("{}/auth/callback?code=stranger", vault.base_url),
        None,
        None,
    )
    .await;
    assert_eq!(reply.status, 307);
    assert_eq!(reply.location.as_deref(), Some("/?error=unauthorized"));
    assert!(session_from(&reply).is_none());
    assert_eq!(vault.backend.session_count(), 0);
    assert!(vault.backend.calls().contains(&BackendCall::SignOut));

    let list = call("GET", format!("{}/api/letters", vault.base_url), None, None).await;
    assert_eq!(list.status, 401);

    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn missing_or_bad_code_fails_auth() {
    let vault = start_vault().await;

    for query in ["", "?code=", "?code=forged"] {
        let reply = call(
            "GET",
            format!("{}/auth/callback{query}", vault.base_url),
            None,
            None,
        )
        .await;
        assert_eq!(reply.status, 307, "query {query:?}");
        assert_eq!(reply.location.as_deref(), Some("/?error=auth-failed"));
    }
    assert_eq!(vault.backend.session_count(), 0);

    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn login_redirects_to_provider() {
    let vault = start_vault().await;

    let reply = call("GET", format!("{}/auth/login", vault.base_url), None, None).await;
    assert_eq!(reply.status, 307);
    let location = reply.location.unwrap();
    assert!(location.starts_with("https://provider.test/authorize"));
    assert!(location.contains("/auth/callback"));

    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn sign_out_revokes_the_session() {
    let vault = start_vault().await;
    let token = sign_in(&vault, "andrei").await;

    let reply = call(
        "POST",
        format!("{}/auth/signout", vault.base_url),
        Some(token.clone()),
        None,
    )
    .await;
    assert_eq!(reply.status, 200);
    assert!(reply
        .set_cookie
        .iter()
        .any(|c| c.starts_with("vault_session=") && c.contains("Max-Age=0")));

    let me = call("GET", format!("{}/api/me", vault.base_url), Some(token), None).await;
    assert_eq!(me.status, 401);

    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn unknown_session_is_unauthorized() {
    let vault = start_vault().await;
    let reply = call(
        "GET",
        format!("{}/api/letters?drafts=true", vault.base_url),
        Some("made-up-token".to_string()),
        None,
    )
    .await;
    assert_eq!(reply.status, 401);
    assert!(reply.json()["error"].is_string());
    vault.shutdown.send(()).ok();
}

// ---------------------------------------------------------------------------
// Letters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sealed_letter_with_two_photos() {
    let vault = start_vault().await;
    let token = sign_in(&vault, "andrei").await;

    let (ct, body) = save_body(
        serde_json::json!({
            "title": "Hi",
            "content": "Happy birthday!",
            "action": "seal",
            "sticker_id": "bday",
        }),
        &[("one.png", "image/png", PNG), ("two.jpg", "image/jpeg", JPEG)],
    );
    let created = call(
        "POST",
        format!("{}/api/letters", vault.base_url),
        Some(token.clone()),
        Some((ct, body)),
    )
    .await;
    assert_eq!(created.status, 201);
    let letter = created.json();
    assert_eq!(letter["title"], "Hi");
    assert_eq!(letter["is_draft"], false);
    assert_eq!(letter["sender_name"], "Andrei");
    assert_eq!(letter["sticker_url"], "/background-stickers/bday-icon.png");
    assert!(letter["display_date"].as_str().unwrap().contains(", 20"));
    let images = letter["images"].as_array().unwrap().clone();
    assert_eq!(images.len(), 2);

    let vault_list = call(
        "GET",
        format!("{}/api/letters", vault.base_url),
        Some(token.clone()),
        None,
    )
    .await;
    assert_eq!(vault_list.json().as_array().unwrap().len(), 1);
    let drafts = call(
        "GET",
        format!("{}/api/letters?drafts=true", vault.base_url),
        Some(token.clone()),
        None,
    )
    .await;
    assert!(drafts.json().as_array().unwrap().is_empty());

    // Uploaded images are served from their public URL, in upload order.
    let first = call("GET", images[0].as_str().unwrap().to_string(), None, None).await;
    assert_eq!(first.status, 200);
    assert_eq!(first.content_type.as_deref(), Some("image/png"));
    assert_eq!(first.content_type_options.as_deref(), Some("nosniff"));
    assert_eq!(first.body, PNG);
    let second = call("GET", images[1].as_str().unwrap().to_string(), None, None).await;
    assert_eq!(second.body, JPEG);

    // The other member sees it too.
    let shantal = sign_in(&vault, "shantal").await;
    let id = letter["id"].as_str().unwrap();
    let fetched = call(
        "GET",
        format!("{}/api/letters/{id}", vault.base_url),
        Some(shantal),
        None,
    )
    .await;
    assert_eq!(fetched.status, 200);
    assert_eq!(fetched.json()["content"], "Happy birthday!");

    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn draft_title_defaults_and_seal_title_is_required() {
    let vault = start_vault().await;
    let token = sign_in(&vault, "shantal").await;

    let (ct, body) = save_body(
        serde_json::json!({ "title": "", "content": "thinking of you", "action": "draft" }),
        &[],
    );
    let draft = call(
        "POST",
        format!("{}/api/letters", vault.base_url),
        Some(token.clone()),
        Some((ct, body)),
    )
    .await;
    assert_eq!(draft.status, 201);
    assert_eq!(draft.json()["title"], "Untitled Draft");
    assert_eq!(draft.json()["is_draft"], true);

    vault.backend.clear_calls();
    let (ct, body) = save_body(
        serde_json::json!({ "title": "   ", "action": "seal" }),
        &[("a.png", "image/png", PNG)],
    );
    let sealed = call(
        "POST",
        format!("{}/api/letters", vault.base_url),
        Some(token),
        Some((ct, body)),
    )
    .await;
    assert_eq!(sealed.status, 400);
    assert!(vault
        .backend
        .calls()
        .iter()
        .all(|c| matches!(c, BackendCall::CurrentUser)));

    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn non_image_and_oversized_files_are_rejected() {
    let vault = start_vault().await;
    let token = sign_in(&vault, "andrei").await;

    let big = vec![0u8; 64 * 1024 + 1];
    for (name, ct, data) in [
        ("notes.txt", "text/plain", b"hello".as_slice()),
        ("huge.png", "image/png", big.as_slice()),
    ] {
        let (content_type, body) = save_body(
            serde_json::json!({ "title": "t", "action": "draft" }),
            &[(name, ct, data)],
        );
        let reply = call(
            "POST",
            format!("{}/api/letters", vault.base_url),
            Some(token.clone()),
            Some((content_type, body)),
        )
        .await;
        assert_eq!(reply.status, 400, "{name}");
    }
    assert_eq!(vault.backend.letter_count(), 0);
    assert!(vault.backend.image_paths().is_empty());

    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn update_then_delete_cleans_up_images() {
    let vault = start_vault().await;
    let token = sign_in(&vault, "andrei").await;

    let (ct, body) = save_body(
        serde_json::json!({ "title": "Trip", "action": "draft" }),
        &[("a.png", "image/png", PNG)],
    );
    let created = call(
        "POST",
        format!("{}/api/letters", vault.base_url),
        Some(token.clone()),
        Some((ct, body)),
    )
    .await
    .json();
    let id = created["id"].as_str().unwrap().to_string();
    let kept = created["images"][0].as_str().unwrap().to_string();

    let (ct, body) = save_body(
        serde_json::json!({
            "title": "Our trip",
            "content": "remember this?",
            "action": "seal",
            "images": [kept],
        }),
        &[("b.jpg", "image/jpeg", JPEG)],
    );
    let updated = call(
        "PUT",
        format!("{}/api/letters/{id}", vault.base_url),
        Some(token.clone()),
        Some((ct, body)),
    )
    .await;
    assert_eq!(updated.status, 200);
    let letter = updated.json();
    assert_eq!(letter["id"], id.as_str());
    assert_eq!(letter["is_draft"], false);
    assert_eq!(letter["created_at"], created["created_at"]);
    assert_eq!(letter["images"][0], kept.as_str());
    assert_eq!(letter["images"].as_array().unwrap().len(), 2);

    // Another member may read but not delete.
    let shantal = sign_in(&vault, "shantal").await;
    let refused = call(
        "DELETE",
        format!("{}/api/letters/{id}", vault.base_url),
        Some(shantal),
        None,
    )
    .await;
    assert_eq!(refused.status, 403);

    let deleted = call(
        "DELETE",
        format!("{}/api/letters/{id}", vault.base_url),
        Some(token.clone()),
        None,
    )
    .await;
    assert_eq!(deleted.status, 200);
    assert_eq!(deleted.json()["images_deleted"], 2);
    assert!(vault.backend.image_paths().is_empty());

    let gone = call(
        "GET",
        format!("{}/api/letters/{id}", vault.base_url),
        Some(token.clone()),
        None,
    )
    .await;
    assert_eq!(gone.status, 404);
    let image = call("GET", kept, None, None).await;
    assert_eq!(image.status, 404);

    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn updating_a_missing_letter_is_not_found() {
    let vault = start_vault().await;
    let token = sign_in(&vault, "andrei").await;
    let (ct, body) = save_body(serde_json::json!({ "title": "x", "action": "draft" }), &[]);
    let reply = call(
        "PUT",
        format!("{}/api/letters/does-not-exist", vault.base_url),
        Some(token),
        Some((ct, body)),
    )
    .await;
    assert_eq!(reply.status, 404);
    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn malformed_save_bodies_are_rejected() {
    let vault = start_vault().await;
    let token = sign_in(&vault, "andrei").await;

    // No letter field at all.
    let (ct, body) = save_body(serde_json::json!({}), &[]);
    let body = String::from_utf8(body)
        .unwrap()
        .replace("name=\"letter\"", "name=\"other\"")
        .into_bytes();
    let reply = call(
        "POST",
        format!("{}/api/letters", vault.base_url),
        Some(token.clone()),
        Some((ct, body)),
    )
    .await;
    assert_eq!(reply.status, 400);

    // Unknown action.
    let (ct, body) = save_body(serde_json::json!({ "title": "x", "action": "publish" }), &[]);
    let reply = call(
        "POST",
        format!("{}/api/letters", vault.base_url),
        Some(token),
        Some((ct, body)),
    )
    .await;
    assert_eq!(reply.status, 400);

    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn failed_record_write_is_a_service_error() {
    let vault = start_vault().await;
    let token = sign_in(&vault, "andrei").await;
    vault.backend.fail_letter_writes(true);

    let (ct, body) = save_body(
        serde_json::json!({ "title": "Hi", "action": "seal" }),
        &[("a.png", "image/png", PNG)],
    );
    let reply = call(
        "POST",
        format!("{}/api/letters", vault.base_url),
        Some(token.clone()),
        Some((ct, body)),
    )
    .await;
    assert!(reply.status >= 500, "status {}", reply.status);
    assert!(reply.json()["error"].is_string());

    let list = call(
        "GET",
        format!("{}/api/letters", vault.base_url),
        Some(token),
        None,
    )
    .await;
    assert!(list.json().as_array().unwrap().is_empty());
    assert_eq!(vault.backend.image_paths().len(), 1);

    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn concurrent_save_or_delete_is_refused() {
    let vault = start_vault().await;
    let token = sign_in(&vault, "andrei").await;

    let (ct, body) = save_body(serde_json::json!({ "title": "x", "action": "draft" }), &[]);
    let guard = vault.state.in_flight.try_acquire("sub-andrei:new".to_string());
    assert!(guard.is_some());
    let busy = call(
        "POST",
        format!("{}/api/letters", vault.base_url),
        Some(token.clone()),
        Some((ct.clone(), body.clone())),
    )
    .await;
    assert_eq!(busy.status, 409);
    assert_eq!(vault.backend.letter_count(), 0);
    drop(guard);

    let created = call(
        "POST",
        format!("{}/api/letters", vault.base_url),
        Some(token.clone()),
        Some((ct, body)),
    )
    .await;
    assert_eq!(created.status, 201);
    let id = created.json()["id"].as_str().unwrap().to_string();

    let guard = vault.state.in_flight.try_acquire(format!("sub-andrei:{id}"));
    assert!(guard.is_some());
    let busy = call(
        "DELETE",
        format!("{}/api/letters/{id}", vault.base_url),
        Some(token.clone()),
        None,
    )
    .await;
    assert_eq!(busy.status, 409);
    assert_eq!(vault.backend.letter_count(), 1);
    drop(guard);

    let deleted = call(
        "DELETE",
        format!("{}/api/letters/{id}", vault.base_url),
        Some(token),
        None,
    )
    .await;
    assert_eq!(deleted.status, 200);
    assert!(vault.state.in_flight.is_empty());

    vault.shutdown.send(()).ok();
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stickers_and_health() {
    let vault = start_vault().await;

    let stickers = call("GET", format!("{}/api/stickers", vault.base_url), None, None).await;
    assert_eq!(stickers.status, 200);
    let ids: Vec<String> = stickers
        .json()
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["bday", "shantal", "loopy"]);

    let health = call("GET", format!("{}/api/health", vault.base_url), None, None).await;
    assert_eq!(health.status, 200);
    assert_eq!(health.json()["status"], "ok");
    assert_eq!(health.json()["members"], 2);

    let missing = call("GET", format!("{}/nowhere", vault.base_url), None, None).await;
    assert_eq!(missing.status, 404);

    vault.shutdown.send(()).ok();
}

#[tokio::test]
async fn objects_outside_the_bucket_are_not_served() {
    let vault = start_vault().await;
    vault.backend.seed_image("sub-andrei/x.png", "image/png", PNG);

    let ok = call(
        "GET",
        vault
            .backend
            .resolve_image_url("sub-andrei/x.png"),
        None,
        None,
    )
    .await;
    assert_eq!(ok.status, 200);

    let other_bucket = call(
        "GET",
        format!(
            "{}/storage/v1/object/public/avatars/sub-andrei/x.png",
            vault.base_url
        ),
        None,
        None,
    )
    .await;
    assert_eq!(other_bucket.status, 404);

    vault.shutdown.send(()).ok();
}
