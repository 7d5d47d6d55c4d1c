//! Capability interface onto the hosted services the vault depends on.
//!
//! Everything the rest of the crate needs from "the backend" goes through
//! [`Backend`]: session issuance and lookup (auth), the `letters` collection
//! (table queries), and the `letter-images` bucket (object storage). Two
//! implementations exist: [`crate::storage::SqliteBackend`] for deployments
//! and [`crate::memory::MemoryBackend`] for tests.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine as _;
use rand::RngCore;

use crate::images::PublicUrls;
use crate::storage::{BlobRow, LetterFields, LetterRow, StorageError};

/// Logical name of the letter collection.
pub const LETTERS_COLLECTION: &str = "letters";
/// Bucket holding every uploaded letter image.
pub const IMAGES_BUCKET: &str = "letter-images";
/// Sessions older than this are treated as signed out.
pub const SESSION_TTL_SECS: u64 = 30 * 24 * 3600;

const SESSION_TOKEN_BYTES: usize = 32;

/// The user behind a live session, as the auth service reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// Provider subject identifier; becomes `owner_id` on written letters.
    pub user_id: String,
    pub email: Option<String>,
}

/// A stored image together with its bytes.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub meta: BlobRow,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    // -- auth --

    /// Issue a new session for an identity that completed the provider exchange.
    async fn create_session(
        &self,
        user_id: &str,
        email: Option<&str>,
    ) -> Result<String, StorageError>;

    /// Resolve a session token. Unknown or expired tokens yield `None`.
    async fn current_user(&self, token: &str) -> Result<Option<AuthUser>, StorageError>;

    /// Revoke a session. Returns whether a session was removed.
    async fn sign_out(&self, token: &str) -> Result<bool, StorageError>;

    // -- letters --

    /// All letters with the given draft flag, newest first.
    async fn query_letters(&self, is_draft: bool) -> Result<Vec<LetterRow>, StorageError>;

    async fn get_letter(&self, id: &str) -> Result<Option<LetterRow>, StorageError>;

    /// Insert a letter. The backend assigns `id`, `created_at` and `updated_at`.
    async fn insert_letter(
        &self,
        owner_id: &str,
        fields: &LetterFields,
    ) -> Result<LetterRow, StorageError>;

    /// Overwrite every mutable field. `None` when no such letter exists.
    async fn update_letter(
        &self,
        id: &str,
        fields: &LetterFields,
    ) -> Result<Option<LetterRow>, StorageError>;

    async fn delete_letter(&self, id: &str) -> Result<bool, StorageError>;

    // -- image storage --

    /// Store bytes at `path` inside [`IMAGES_BUCKET`]. Existing paths are
    /// never overwritten.
    async fn upload_image(
        &self,
        path: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<BlobRow, StorageError>;

    async fn download_image(&self, path: &str) -> Result<Option<StoredImage>, StorageError>;

    async fn delete_image(&self, path: &str) -> Result<bool, StorageError>;

    fn public_urls(&self) -> &PublicUrls;

    /// Durable public URL for an object in [`IMAGES_BUCKET`].
    fn resolve_image_url(&self, path: &str) -> String {
        self.public_urls().object_url(IMAGES_BUCKET, path)
    }

    /// Inverse of [`Backend::resolve_image_url`]; `None` for foreign URLs.
    fn image_path_for_url(&self, url: &str) -> Option<String> {
        self.public_urls().object_path(IMAGES_BUCKET, url)
    }
}

/// Random, URL-safe session token.
pub fn new_session_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn new_letter_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current time as milliseconds since UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Current time as seconds since UNIX epoch.
pub fn now_secs() -> u64 {
    now_millis() / 1000
}
