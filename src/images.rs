//! Image attachments: queueing, upload-on-save, public URLs, and cleanup.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::{Result, VaultError};
use crate::gate::Caller;

/// Default per-image upload limit.
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024; // 10 MiB

const PUBLIC_OBJECT_PREFIX: &str = "/storage/v1/object/public/";

/// Public URL layout for stored objects:
/// `<base>/storage/v1/object/public/<bucket>/<path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicUrls {
    base: String,
}

impl PublicUrls {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn object_url(&self, bucket: &str, path: &str) -> String {
        format!("{}{PUBLIC_OBJECT_PREFIX}{bucket}/{path}", self.base)
    }

    /// Recover the object path from one of our public URLs. Query strings and
    /// fragments are ignored; URLs under any other prefix yield `None`.
    pub fn object_path(&self, bucket: &str, url: &str) -> Option<String> {
        let prefix = format!("{}{PUBLIC_OBJECT_PREFIX}{bucket}/", self.base);
        let rest = url.strip_prefix(&prefix)?;
        let path = rest.split(['?', '#']).next().unwrap_or_default();
        if path.is_empty() {
            None
        } else {
            Some(path.to_string())
        }
    }
}

/// Whether an image entry has already been uploaded: only absolute
/// `http(s)` URLs count; local preview handles do not.
pub fn is_uploaded_url(entry: &str) -> bool {
    url::Url::parse(entry)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
        .unwrap_or(false)
}

/// Raw bytes of a file the user picked but that has not been uploaded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedImage {
    pub file_name: Option<String>,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl QueuedImage {
    /// Build from a picked file, guessing the content type from the file
    /// name when the caller did not supply one.
    pub fn new(file_name: Option<String>, content_type: Option<String>, data: Vec<u8>) -> Self {
        let content_type = content_type
            .filter(|ct| !ct.is_empty() && ct != "application/octet-stream")
            .or_else(|| {
                file_name
                    .as_deref()
                    .and_then(|n| mime_guess::from_path(n).first())
                    .map(|m| m.essence_str().to_string())
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Self {
            file_name,
            content_type,
            data,
        }
    }
}

/// One entry of a letter's image list while it is being edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// Picked locally, shown through an ephemeral preview handle.
    Local { handle: String, file: QueuedImage },
    /// Already uploaded by a previous save.
    Remote { url: String },
}

impl Attachment {
    /// What the form displays for this entry.
    pub fn preview(&self) -> &str {
        match self {
            Attachment::Local { handle, .. } => handle,
            Attachment::Remote { url } => url,
        }
    }
}

/// Outcome of deleting a letter's images.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    /// Objects that were already gone.
    pub missing: Vec<String>,
    /// URLs that do not point into our bucket.
    pub skipped: Vec<String>,
    /// `(path, error)` for deletions that failed.
    pub failed: Vec<(String, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ImageManager {
    backend: Arc<dyn Backend>,
    max_bytes: u64,
}

impl ImageManager {
    pub fn new(backend: Arc<dyn Backend>, max_bytes: u64) -> Self {
        Self { backend, max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Check a queued file before anything is uploaded.
    pub fn validate(&self, file: &QueuedImage) -> Result<()> {
        let essence = file.content_type.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case("image/svg+xml") {
            return Err(VaultError::validation(format!(
                "{} is an SVG image, which is not accepted",
                file.file_name.as_deref().unwrap_or("file")
            )));
        }
        if !file.content_type.starts_with("image/") {
            return Err(VaultError::validation(format!(
                "{} is not an image ({})",
                file.file_name.as_deref().unwrap_or("file"),
                file.content_type
            )));
        }
        if file.data.is_empty() {
            return Err(VaultError::validation("image file is empty"));
        }
        if file.data.len() as u64 > self.max_bytes {
            return Err(VaultError::validation(format!(
                "image exceeds maximum size of {} bytes",
                self.max_bytes
            )));
        }
        Ok(())
    }

    /// Check that a kept entry points at an object in our bucket.
    pub fn validate_kept(&self, url: &str) -> Result<()> {
        if !is_uploaded_url(url) || self.backend.image_path_for_url(url).is_none() {
            return Err(VaultError::validation(format!(
                "image {url} is not an uploaded vault image"
            )));
        }
        Ok(())
    }

    /// Upload queued files one after another, in order, returning their
    /// public URLs. The first failure aborts the rest.
    pub async fn upload_all(&self, caller: &Caller, files: &[&QueuedImage]) -> Result<Vec<String>> {
        let mut urls = Vec::with_capacity(files.len());
        for file in files {
            let path = new_object_path(&caller.namespace(), file);
            self.backend
                .upload_image(&path, &file.content_type, &file.data)
                .await?;
            debug!(path = %path, size = file.data.len(), "uploaded image");
            urls.push(self.backend.resolve_image_url(&path));
        }
        Ok(urls)
    }

    /// Delete the objects behind `urls`. Failures are collected, not raised.
    pub async fn cleanup(&self, urls: &[String]) -> CleanupReport {
        let mut report = CleanupReport::default();
        for url in urls {
            let Some(path) = self.backend.image_path_for_url(url) else {
                warn!(url = %url, "image url is outside the vault bucket; not deleting");
                report.skipped.push(url.clone());
                continue;
            };
            match self.backend.delete_image(&path).await {
                Ok(true) => report.deleted.push(path),
                Ok(false) => report.missing.push(path),
                Err(e) => {
                    warn!(path = %path, error = %e, "failed to delete image");
                    report.failed.push((path, e.to_string()));
                }
            }
        }
        if !urls.is_empty() {
            info!(
                deleted = report.deleted.len(),
                missing = report.missing.len(),
                failed = report.failed.len(),
                "image cleanup finished"
            );
        }
        report
    }
}

/// Fresh, collision-resistant object path under the caller's namespace:
/// `<namespace>/<uuid>.<ext>`.
pub fn new_object_path(namespace: &str, file: &QueuedImage) -> String {
    let ext = image_extension(&file.content_type, file.file_name.as_deref());
    format!("{namespace}/{}.{ext}", uuid::Uuid::new_v4())
}

/// File extension for a stored image, from its content type, falling back
/// to the picked file's own extension.
fn image_extension(content_type: &str, file_name: Option<&str>) -> String {
    let base = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    let known = match base {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/avif" => Some("avif"),
        "image/heic" => Some("heic"),
        "image/bmp" => Some("bmp"),
        _ => None,
    };
    if let Some(ext) = known {
        return ext.to_string();
    }
    file_name
        .and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string())
}
