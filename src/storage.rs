//! SQLite storage layer for the vault.
//!
//! Holds the `letters` collection, issued sessions, and image blob metadata.
//! Blob bytes live as files under `blobs/<bucket>/<path>` next to the
//! database. [`SqliteBackend`] exposes the whole thing through the
//! [`Backend`] capability interface.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::backend::{
    new_letter_id, new_session_token, now_millis, now_secs, AuthUser, Backend, StoredImage,
    IMAGES_BUCKET, SESSION_TTL_SECS,
};
use crate::images::PublicUrls;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid object path: {0}")]
    InvalidPath(String),
    /// The service could not be reached or refused the request.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// One letter in the `letters` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterRow {
    pub id: String,
    pub title: String,
    pub content: String,
    pub owner_id: String,
    pub sender_name: String,
    pub is_draft: bool,
    /// Public image URLs in display order.
    pub images: Vec<String>,
    pub sticker_id: Option<String>,
    /// Milliseconds since UNIX epoch.
    pub created_at: u64,
    pub updated_at: u64,
}

/// The mutable part of a letter, written by both insert and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterFields {
    pub title: String,
    pub content: String,
    pub sender_name: String,
    pub is_draft: bool,
    pub images: Vec<String>,
    pub sticker_id: Option<String>,
}

/// An issued session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRow {
    pub token: String,
    pub user_id: String,
    pub email: Option<String>,
    /// Seconds since UNIX epoch.
    pub created_at: u64,
}

/// Metadata for one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRow {
    pub bucket: String,
    pub path: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Hex SHA-256 of the stored bytes.
    pub sha256: String,
    pub created_at: u64,
}

// ---------------------------------------------------------------------------
// Storage handle
// ---------------------------------------------------------------------------

const LETTER_COLUMNS: &str = "id, title, content, owner_id, sender_name, is_draft,
                              images, sticker_id, created_at, updated_at";

/// Main storage handle wrapping a SQLite connection.
pub struct Storage {
    conn: Connection,
    /// Directory on disk where blob files are stored, one subdirectory per bucket.
    pub blob_dir: PathBuf,
}

impl Storage {
    /// Open or create a database at the given path. Creates schema if needed.
    /// Blobs are stored as files in a `blobs/` subdirectory alongside the
    /// database file.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let blob_dir = path.parent().unwrap_or(Path::new(".")).join("blobs");
        std::fs::create_dir_all(&blob_dir)?;
        let storage = Self { conn, blob_dir };
        storage.create_schema()?;
        Ok(storage)
    }

    /// Create an in-memory database with an explicit blob directory.
    pub fn open_in_memory(blob_dir: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        std::fs::create_dir_all(blob_dir)?;
        let storage = Self {
            conn,
            blob_dir: blob_dir.to_path_buf(),
        };
        storage.create_schema()?;
        Ok(storage)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS letters (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                content     TEXT NOT NULL,
                owner_id    TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                is_draft    INTEGER NOT NULL DEFAULT 0,
                images      TEXT NOT NULL DEFAULT '[]',
                sticker_id  TEXT,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_letters_draft
                ON letters(is_draft, created_at);

            CREATE TABLE IF NOT EXISTS sessions (
                token       TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                email       TEXT,
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS blobs (
                bucket          TEXT NOT NULL,
                path            TEXT NOT NULL,
                content_type    TEXT NOT NULL,
                size_bytes      INTEGER NOT NULL,
                sha256          TEXT NOT NULL,
                created_at      INTEGER NOT NULL,
                PRIMARY KEY (bucket, path)
            );
            ",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Letters CRUD
    // -----------------------------------------------------------------------

    /// Creation timestamp for the next insert: the wall clock, but never
    /// earlier than the newest existing letter.
    pub fn next_created_at(&self, now: u64) -> Result<u64, StorageError> {
        let newest: Option<i64> =
            self.conn
                .query_row("SELECT MAX(created_at) FROM letters", [], |row| row.get(0))?;
        Ok(now.max(newest.unwrap_or(0) as u64))
    }

    pub fn insert_letter(&self, row: &LetterRow) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO letters
             (id, title, content, owner_id, sender_name, is_draft,
              images, sticker_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.id,
                row.title,
                row.content,
                row.owner_id,
                row.sender_name,
                row.is_draft as i32,
                serde_json::to_string(&row.images)?,
                row.sticker_id,
                row.created_at as i64,
                row.updated_at as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_letter(&self, id: &str) -> Result<Option<LetterRow>, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {LETTER_COLUMNS} FROM letters WHERE id = ?1"))?;
        let raw = stmt.query_row(params![id], raw_letter).optional()?;
        raw.map(RawLetter::into_row).transpose()
    }

    /// List letters with the given draft flag, newest first. Letters sharing
    /// a timestamp come back in reverse insertion order.
    pub fn list_letters(&self, is_draft: bool) -> Result<Vec<LetterRow>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {LETTER_COLUMNS} FROM letters
             WHERE is_draft = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![is_draft as i32], raw_letter)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?.into_row()?);
        }
        Ok(result)
    }

    /// Overwrite the mutable fields of a letter. Returns whether a row matched.
    pub fn update_letter(
        &self,
        id: &str,
        fields: &LetterFields,
        updated_at: u64,
    ) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE letters
             SET title = ?1, content = ?2, sender_name = ?3, is_draft = ?4,
                 images = ?5, sticker_id = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                fields.title,
                fields.content,
                fields.sender_name,
                fields.is_draft as i32,
                serde_json::to_string(&fields.images)?,
                fields.sticker_id,
                updated_at as i64,
                id,
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_letter(&self, id: &str) -> Result<bool, StorageError> {
        let affected = self
            .conn
            .execute("DELETE FROM letters WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    pub fn insert_session(&self, row: &SessionRow) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO sessions (token, user_id, email, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![row.token, row.user_id, row.email, row.created_at as i64],
        )?;
        Ok(())
    }

    pub fn get_session(&self, token: &str) -> Result<Option<SessionRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT token, user_id, email, created_at FROM sessions WHERE token = ?1",
        )?;
        let row = stmt
            .query_row(params![token], |row| {
                Ok(SessionRow {
                    token: row.get(0)?,
                    user_id: row.get(1)?,
                    email: row.get(2)?,
                    created_at: row.get::<_, i64>(3)? as u64,
                })
            })
            .optional()?;
        Ok(row)
    }

    pub fn delete_session(&self, token: &str) -> Result<bool, StorageError> {
        let affected = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(affected > 0)
    }

    /// Drop every session created before `cutoff` (seconds). Returns the count.
    pub fn purge_sessions_before(&self, cutoff: u64) -> Result<u32, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM sessions WHERE created_at < ?1",
            params![cutoff as i64],
        )?;
        Ok(affected as u32)
    }

    // -----------------------------------------------------------------------
    // Blobs
    // -----------------------------------------------------------------------

    /// Derive the filesystem path for an object, refusing anything that could
    /// escape the bucket directory.
    fn blob_file(&self, bucket: &str, path: &str) -> Result<PathBuf, StorageError> {
        validate_object_path(bucket)?;
        validate_object_path(path)?;
        Ok(self.blob_dir.join(bucket).join(path))
    }

    /// Write an object. Fails with [`StorageError::AlreadyExists`] when the
    /// path is taken.
    pub fn put_blob(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        data: &[u8],
        created_at: u64,
    ) -> Result<BlobRow, StorageError> {
        let file = self.blob_file(bucket, path)?;
        if self.get_blob_meta(bucket, path)?.is_some() || file.exists() {
            return Err(StorageError::AlreadyExists(format!("{bucket}/{path}")));
        }
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&file, data)?;

        let row = BlobRow {
            bucket: bucket.to_string(),
            path: path.to_string(),
            content_type: content_type.to_string(),
            size_bytes: data.len() as u64,
            sha256: hex::encode(Sha256::digest(data)),
            created_at,
        };
        let inserted = self.conn.execute(
            "INSERT INTO blobs (bucket, path, content_type, size_bytes, sha256, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.bucket,
                row.path,
                row.content_type,
                row.size_bytes as i64,
                row.sha256,
                row.created_at as i64,
            ],
        );
        if let Err(e) = inserted {
            let _ = std::fs::remove_file(&file);
            return Err(e.into());
        }
        Ok(row)
    }

    pub fn get_blob_meta(&self, bucket: &str, path: &str) -> Result<Option<BlobRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT bucket, path, content_type, size_bytes, sha256, created_at
             FROM blobs WHERE bucket = ?1 AND path = ?2",
        )?;
        let row = stmt
            .query_row(params![bucket, path], |row| {
                Ok(BlobRow {
                    bucket: row.get(0)?,
                    path: row.get(1)?,
                    content_type: row.get(2)?,
                    size_bytes: row.get::<_, i64>(3)? as u64,
                    sha256: row.get(4)?,
                    created_at: row.get::<_, i64>(5)? as u64,
                })
            })
            .optional()?;
        Ok(row)
    }

    /// Read an object. Returns `None` if the metadata row or the file on
    /// disk is missing.
    pub fn get_blob(
        &self,
        bucket: &str,
        path: &str,
    ) -> Result<Option<(BlobRow, Vec<u8>)>, StorageError> {
        let file = self.blob_file(bucket, path)?;
        let Some(meta) = self.get_blob_meta(bucket, path)? else {
            return Ok(None);
        };
        match std::fs::read(&file) {
            Ok(data) => Ok(Some((meta, data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Remove an object's metadata and file. Returns whether anything existed.
    pub fn delete_blob(&self, bucket: &str, path: &str) -> Result<bool, StorageError> {
        let file = self.blob_file(bucket, path)?;
        let affected = self.conn.execute(
            "DELETE FROM blobs WHERE bucket = ?1 AND path = ?2",
            params![bucket, path],
        )?;
        let removed_file = match std::fs::remove_file(&file) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(StorageError::Io(e)),
        };
        Ok(affected > 0 || removed_file)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// A letter as read from SQLite, before the JSON image list is decoded.
struct RawLetter {
    row: LetterRow,
    images_json: String,
}

impl RawLetter {
    fn into_row(self) -> Result<LetterRow, StorageError> {
        let mut row = self.row;
        row.images = serde_json::from_str(&self.images_json)?;
        Ok(row)
    }
}

fn raw_letter(row: &Row<'_>) -> rusqlite::Result<RawLetter> {
    Ok(RawLetter {
        row: LetterRow {
            id: row.get(0)?,
            title: row.get(1)?,
            content: row.get(2)?,
            owner_id: row.get(3)?,
            sender_name: row.get(4)?,
            is_draft: row.get::<_, i32>(5)? != 0,
            images: Vec::new(),
            sticker_id: row.get(7)?,
            created_at: row.get::<_, i64>(8)? as u64,
            updated_at: row.get::<_, i64>(9)? as u64,
        },
        images_json: row.get(6)?,
    })
}

/// Object paths are relative, slash-separated, and contain only normal
/// components.
pub fn validate_object_path(path: &str) -> Result<(), StorageError> {
    let invalid = || StorageError::InvalidPath(path.to_string());
    if path.is_empty() || path.contains('\\') || path.contains('\0') {
        return Err(invalid());
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid());
    }
    Ok(())
}

/// Resolve the database path: `{data_dir}/vault.db`.
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("vault.db")
}

// ---------------------------------------------------------------------------
// Backend implementation
// ---------------------------------------------------------------------------

/// [`Backend`] over a local SQLite database and blob directory.
pub struct SqliteBackend {
    storage: Mutex<Storage>,
    urls: PublicUrls,
}

impl SqliteBackend {
    pub fn new(storage: Storage, urls: PublicUrls) -> Self {
        Self {
            storage: Mutex::new(storage),
            urls,
        }
    }

    /// Open `{data_dir}/vault.db`, creating it if needed.
    pub fn open(data_dir: &Path, urls: PublicUrls) -> Result<Self, StorageError> {
        Ok(Self::new(Storage::open(&db_path(data_dir))?, urls))
    }

    /// Drop expired sessions. Returns how many were removed.
    pub async fn purge_expired_sessions(&self) -> Result<u32, StorageError> {
        let cutoff = now_secs().saturating_sub(SESSION_TTL_SECS);
        self.storage.lock().await.purge_sessions_before(cutoff)
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn create_session(
        &self,
        user_id: &str,
        email: Option<&str>,
    ) -> Result<String, StorageError> {
        let row = SessionRow {
            token: new_session_token(),
            user_id: user_id.to_string(),
            email: email.map(str::to_string),
            created_at: now_secs(),
        };
        self.storage.lock().await.insert_session(&row)?;
        Ok(row.token)
    }

    async fn current_user(&self, token: &str) -> Result<Option<AuthUser>, StorageError> {
        let session = self.storage.lock().await.get_session(token)?;
        let cutoff = now_secs().saturating_sub(SESSION_TTL_SECS);
        Ok(session
            .filter(|s| s.created_at >= cutoff)
            .map(|s| AuthUser {
                user_id: s.user_id,
                email: s.email,
            }))
    }

    async fn sign_out(&self, token: &str) -> Result<bool, StorageError> {
        self.storage.lock().await.delete_session(token)
    }

    async fn query_letters(&self, is_draft: bool) -> Result<Vec<LetterRow>, StorageError> {
        self.storage.lock().await.list_letters(is_draft)
    }

    async fn get_letter(&self, id: &str) -> Result<Option<LetterRow>, StorageError> {
        self.storage.lock().await.get_letter(id)
    }

    async fn insert_letter(
        &self,
        owner_id: &str,
        fields: &LetterFields,
    ) -> Result<LetterRow, StorageError> {
        let storage = self.storage.lock().await;
        let created_at = storage.next_created_at(now_millis())?;
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
        storage.insert_letter(&row)?;
        Ok(row)
    }

    async fn update_letter(
        &self,
        id: &str,
        fields: &LetterFields,
    ) -> Result<Option<LetterRow>, StorageError> {
        let storage = self.storage.lock().await;
        if !storage.update_letter(id, fields, now_millis())? {
            return Ok(None);
        }
        storage.get_letter(id)
    }

    async fn delete_letter(&self, id: &str) -> Result<bool, StorageError> {
        self.storage.lock().await.delete_letter(id)
    }

    async fn upload_image(
        &self,
        path: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<BlobRow, StorageError> {
        self.storage
            .lock()
            .await
            .put_blob(IMAGES_BUCKET, path, content_type, data, now_secs())
    }

    async fn download_image(&self, path: &str) -> Result<Option<StoredImage>, StorageError> {
        let found = self.storage.lock().await.get_blob(IMAGES_BUCKET, path)?;
        Ok(found.map(|(meta, data)| StoredImage { meta, data }))
    }

    async fn delete_image(&self, path: &str) -> Result<bool, StorageError> {
        self.storage.lock().await.delete_blob(IMAGES_BUCKET, path)
    }

    fn public_urls(&self) -> &PublicUrls {
        &self.urls
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
