//! In-process [`Backend`] with call recording and fault injection.
//!
//! Used by unit and integration tests to observe exactly which backend calls
//! an operation makes, in what order, and how it behaves when the service
//! fails part way through.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::backend::{
    new_letter_id, new_session_token, now_millis, now_secs, AuthUser, Backend, StoredImage,
    IMAGES_BUCKET,
};
use crate::images::PublicUrls;
use crate::storage::{validate_object_path, BlobRow, LetterFields, LetterRow, StorageError};

pub const TEST_PUBLIC_URL: &str = "http://vault.test";

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateSession,
    CurrentUser,
    SignOut,
    QueryLetters { is_draft: bool },
    GetLetter(String),
    InsertLetter,
    UpdateLetter(String),
    DeleteLetter(String),
    UploadImage(String),
    DownloadImage(String),
    DeleteImage(String),
}

#[derive(Default)]
struct Inner {
    letters: Vec<LetterRow>,
    sessions: HashMap<String, AuthUser>,
    blobs: BTreeMap<String, StoredImage>,
    calls: Vec<BackendCall>,
    last_created_at: u64,
    uploads: usize,
    fail_uploads_after: Option<usize>,
    fail_deletes: HashSet<String>,
    fail_letter_writes: bool,
}

pub struct MemoryBackend {
    inner: Mutex<Inner>,
    urls: PublicUrls,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_urls(PublicUrls::new(TEST_PUBLIC_URL))
    }

    pub fn with_urls(urls: PublicUrls) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            urls,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn letter_count(&self) -> usize {
        self.lock().letters.len()
    }

    /// Paths of every stored image, sorted.
    pub fn image_paths(&self) -> Vec<String> {
        self.lock().blobs.keys().cloned().collect()
    }

    pub fn has_image(&self, path: &str) -> bool {
        self.lock().blobs.contains_key(path)
    }

    /// Let `n` more uploads succeed, then fail every one after.
    pub fn fail_uploads_after(&self, n: usize) {
        let mut inner = self.lock();
        inner.fail_uploads_after = Some(inner.uploads + n);
    }

    /// Make deleting `path` fail.
    pub fn fail_delete_of(&self, path: &str) {
        self.lock().fail_deletes.insert(path.to_string());
    }

    /// Make letter inserts, updates and deletes fail.
    pub fn fail_letter_writes(&self, fail: bool) {
        self.lock().fail_letter_writes = fail;
    }

    /// Store an image without recording a call.
    pub fn seed_image(&self, path: &str, content_type: &str, data: &[u8]) {
        let meta = blob_row(path, content_type, data);
        self.lock().blobs.insert(
            path.to_string(),
            StoredImage {
                meta,
                data: data.to_vec(),
            },
        );
    }

    fn write_guard(inner: &Inner) -> Result<(), StorageError> {
        if inner.fail_letter_writes {
            return Err(StorageError::Unavailable("letter writes disabled".to_string()));
        }
        Ok(())
    }
}

fn blob_row(path: &str, content_type: &str, data: &[u8]) -> BlobRow {
    BlobRow {
        bucket: IMAGES_BUCKET.to_string(),
        path: path.to_string(),
        content_type: content_type.to_string(),
        size_bytes: data.len() as u64,
        sha256: hex::encode(Sha256::digest(data)),
        created_at: now_secs(),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn create_session(
        &self,
        user_id: &str,
        email: Option<&str>,
    ) -> Result<String, StorageError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::CreateSession);
        let token = new_session_token();
        inner.sessions.insert(
            token.clone(),
            AuthUser {
                user_id: user_id.to_string(),
                email: email.map(str::to_string),
            },
        );
        Ok(token)
    }

    async fn current_user(&self, token: &str) -> Result<Option<AuthUser>, StorageError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::CurrentUser);
        Ok(inner.sessions.get(token).cloned())
    }

    async fn sign_out(&self, token: &str) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::SignOut);
        Ok(inner.sessions.remove(token).is_some())
    }

    async fn query_letters(&self, is_draft: bool) -> Result<Vec<LetterRow>, StorageError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::QueryLetters { is_draft });
        let mut rows: Vec<LetterRow> = inner
            .letters
            .iter()
            .filter(|l| l.is_draft == is_draft)
            .cloned()
            .collect();
        // Stable sort keeps later inserts ahead on equal timestamps after the reverse.
        rows.sort_by_key(|l| l.created_at);
        rows.reverse();
        Ok(rows)
    }

    async fn get_letter(&self, id: &str) -> Result<Option<LetterRow>, StorageError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::GetLetter(id.to_string()));
        Ok(inner.letters.iter().find(|l| l.id == id).cloned())
    }

    async fn insert_letter(
        &self,
        owner_id: &str,
        fields: &LetterFields,
    ) -> Result<LetterRow, StorageError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::InsertLetter);
        Self::write_guard(&inner)?;
        let created_at = now_millis().max(inner.last_created_at + 1);
        inner.last_created_at = created_at;
        let row = LetterRow {
            id: new_letter_id(),
            title: fields.title.clone(),
            content: fields.content.clone(),
            owner_id: owner_id.to_string(),
            sender_name: fields.sender_name.clone(),
            is_draft: fields.is_draft,
            images: fields.images.clone(),
            sticker_id: fields.sticker_id.clone(),
            created_at,
            updated_at: created_at,
        };
        inner.letters.push(row.clone());
        Ok(row)
    }

    async fn update_letter(
        &self,
        id: &str,
        fields: &LetterFields,
    ) -> Result<Option<LetterRow>, StorageError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::UpdateLetter(id.to_string()));
        Self::write_guard(&inner)?;
        let Some(row) = inner.letters.iter_mut().find(|l| l.id == id) else {
            return Ok(None);
        };
        row.title = fields.title.clone();
        row.content = fields.content.clone();
        row.sender_name = fields.sender_name.clone();
        row.is_draft = fields.is_draft;
        row.images = fields.images.clone();
        row.sticker_id = fields.sticker_id.clone();
        row.updated_at = now_millis().max(row.updated_at);
        Ok(Some(row.clone()))
    }

    async fn delete_letter(&self, id: &str) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::DeleteLetter(id.to_string()));
        Self::write_guard(&inner)?;
        let before = inner.letters.len();
        inner.letters.retain(|l| l.id != id);
        Ok(inner.letters.len() != before)
    }

    async fn upload_image(
        &self,
        path: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<BlobRow, StorageError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::UploadImage(path.to_string()));
        validate_object_path(path)?;
        if inner.fail_uploads_after.is_some_and(|limit| inner.uploads >= limit) {
            return Err(StorageError::Unavailable("upload rejected".to_string()));
        }
        if inner.blobs.contains_key(path) {
            return Err(StorageError::AlreadyExists(format!("{IMAGES_BUCKET}/{path}")));
        }
        inner.uploads += 1;
        let meta = blob_row(path, content_type, data);
        inner.blobs.insert(
            path.to_string(),
            StoredImage {
                meta: meta.clone(),
                data: data.to_vec(),
            },
        );
        Ok(meta)
    }

    async fn download_image(&self, path: &str) -> Result<Option<StoredImage>, StorageError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::DownloadImage(path.to_string()));
        Ok(inner.blobs.get(path).cloned())
    }

    async fn delete_image(&self, path: &str) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        inner.calls.push(BackendCall::DeleteImage(path.to_string()));
        if inner.fail_deletes.contains(path) {
            return Err(StorageError::Unavailable(format!("cannot delete {path}")));
        }
        Ok(inner.blobs.remove(path).is_some())
    }

    fn public_urls(&self) -> &PublicUrls {
        &self.urls
    }
}
