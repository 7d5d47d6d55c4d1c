//! Letter store: list, fetch, save and delete letters on behalf of an
//! admitted caller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::{Result, VaultError};
use crate::gate::{Allowlist, Caller};
use crate::images::{Attachment, CleanupReport, ImageManager, QueuedImage};
use crate::logging;
use crate::stickers;
use crate::storage::{LetterFields, LetterRow};

/// Title given to drafts saved without one.
pub const UNTITLED_DRAFT: &str = "Untitled Draft";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveAction {
    /// Keep the letter in the drafts view.
    Draft,
    /// Publish the letter to the vault.
    Seal,
}

impl SaveAction {
    pub fn is_draft(self) -> bool {
        matches!(self, SaveAction::Draft)
    }
}

/// The JSON half of a save request. Newly picked files travel separately.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LetterPayload {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub action: SaveAction,
    #[serde(default)]
    pub sticker_id: Option<String>,
    /// Already uploaded image URLs to keep, in display order.
    #[serde(default)]
    pub images: Vec<String>,
}

/// Everything the edit form holds when the user hits save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LetterDraft {
    pub title: String,
    pub content: String,
    pub sticker_id: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl LetterDraft {
    /// Kept URLs first, then the new files in the order they were sent.
    pub fn from_payload(payload: &LetterPayload, files: Vec<QueuedImage>) -> Self {
        let mut attachments: Vec<Attachment> = payload
            .images
            .iter()
            .map(|url| Attachment::Remote { url: url.clone() })
            .collect();
        attachments.extend(files.into_iter().enumerate().map(|(i, file)| Attachment::Local {
            handle: format!("upload:{i}"),
            file,
        }));
        Self {
            title: payload.title.clone(),
            content: payload.content.clone(),
            sticker_id: payload.sticker_id.clone(),
            attachments,
        }
    }
}

/// The title a save will store, or a validation error for a sealed letter
/// without one.
pub fn resolve_title(action: SaveAction, title: &str) -> Result<String> {
    let title = title.trim();
    if !title.is_empty() {
        return Ok(title.to_string());
    }
    match action {
        SaveAction::Draft => Ok(UNTITLED_DRAFT.to_string()),
        SaveAction::Seal => Err(VaultError::validation("a sealed letter needs a title")),
    }
}

/// `created_at` as shown on a letter card, e.g. `Feb 14, 2026`.
pub fn display_date(created_at_ms: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(created_at_ms as i64)
        .map(|d| d.format("%b %d, %Y").to_string())
        .unwrap_or_default()
}

/// A letter as handed to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LetterView {
    #[serde(flatten)]
    pub letter: LetterRow,
    pub sticker_url: Option<&'static str>,
    pub display_date: String,
}

impl From<LetterRow> for LetterView {
    fn from(letter: LetterRow) -> Self {
        Self {
            sticker_url: stickers::resolve(letter.sticker_id.as_deref()),
            display_date: display_date(letter.created_at),
            letter,
        }
    }
}

/// Outcome of a delete: the removed letter and what happened to its images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub letter: LetterRow,
    pub cleanup: CleanupReport,
}

pub struct LetterStore {
    backend: Arc<dyn Backend>,
    allowlist: Arc<Allowlist>,
    images: ImageManager,
}

impl LetterStore {
    pub fn new(backend: Arc<dyn Backend>, allowlist: Arc<Allowlist>, max_image_bytes: u64) -> Self {
        let images = ImageManager::new(backend.clone(), max_image_bytes);
        Self {
            backend,
            allowlist,
            images,
        }
    }

    pub fn images(&self) -> &ImageManager {
        &self.images
    }

    /// Letters with the given draft flag, newest first.
    pub async fn list(&self, drafts: bool) -> Result<Vec<LetterRow>> {
        Ok(self.backend.query_letters(drafts).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<LetterRow>> {
        Ok(self.backend.get_letter(id).await?)
    }

    pub async fn create(
        &self,
        caller: &Caller,
        action: SaveAction,
        draft: &LetterDraft,
    ) -> Result<LetterRow> {
        self.save(caller, None, action, draft).await
    }

    pub async fn update(
        &self,
        caller: &Caller,
        id: &str,
        action: SaveAction,
        draft: &LetterDraft,
    ) -> Result<LetterRow> {
        self.save(caller, Some(id), action, draft).await
    }

    /// Insert (`target` is `None`) or overwrite a letter.
    ///
    /// Everything that can be checked locally is checked before the first
    /// backend call. Queued files are then uploaded one by one; if any upload
    /// fails the letter is not written, and earlier uploads stay in storage.
    ///
    /// Kept images must come from the letter being updated. After an update,
    /// images the letter no longer references are deleted from storage.
    pub async fn save(
        &self,
        caller: &Caller,
        target: Option<&str>,
        action: SaveAction,
        draft: &LetterDraft,
    ) -> Result<LetterRow> {
        let title = resolve_title(action, &draft.title)?;
        for attachment in &draft.attachments {
            match attachment {
                Attachment::Local { file, .. } => self.images.validate(file)?,
                Attachment::Remote { url } if target.is_none() => {
                    return Err(VaultError::validation(format!(
                        "image {url} cannot be kept on a new letter"
                    )))
                }
                Attachment::Remote { url } => self.images.validate_kept(url)?,
            }
        }
        let sender_name = self
            .allowlist
            .sender_name(&caller.email)
            .ok_or(VaultError::Unauthorized)?
            .to_string();
        let sticker_id = match draft.sticker_id.as_deref().filter(|s| !s.is_empty()) {
            Some(id) if stickers::find(id).is_some() => Some(id.to_string()),
            Some(id) => {
                debug!(sticker = id, "dropping unknown sticker");
                None
            }
            None => None,
        };

        let existing = match target {
            Some(id) => {
                let existing = self
                    .backend
                    .get_letter(id)
                    .await?
                    .ok_or_else(|| VaultError::NotFound(format!("letter {id}")))?;
                ensure_owner(caller, &existing)?;
                Some(existing)
            }
            None => None,
        };
        if let Some(existing) = &existing {
            for attachment in &draft.attachments {
                if let Attachment::Remote { url } = attachment {
                    ensure_attached(existing, url)?;
                }
            }
        }

        let mut images: Vec<String> = Vec::with_capacity(draft.attachments.len());
        let mut queued: Vec<&QueuedImage> = Vec::new();
        for attachment in &draft.attachments {
            match attachment {
                Attachment::Remote { url } => images.push(url.clone()),
                Attachment::Local { file, .. } => queued.push(file),
            }
        }
        images.extend(self.images.upload_all(caller, &queued).await?);

        let fields = LetterFields {
            title,
            content: draft.content.clone(),
            sender_name,
            is_draft: action.is_draft(),
            images,
            sticker_id,
        };

        let row = match target {
            None => self.backend.insert_letter(&caller.user_id, &fields).await?,
            Some(id) => self
                .backend
                .update_letter(id, &fields)
                .await?
                .ok_or_else(|| VaultError::NotFound(format!("letter {id}")))?,
        };
        info!(
            letter = %logging::letter_id(&row.id),
            member = %logging::member(&caller.email),
            draft = row.is_draft,
            images = row.images.len(),
            uploaded = queued.len(),
            "{}",
            if target.is_some() { "letter updated" } else { "letter created" }
        );

        if let Some(previous) = existing {
            let dropped: Vec<String> = previous
                .images
                .into_iter()
                .filter(|url| !row.images.contains(url))
                .collect();
            if !dropped.is_empty() {
                let cleanup = self.images.cleanup(&dropped).await;
                if !cleanup.is_clean() {
                    warn!(
                        letter = %logging::letter_id(&row.id),
                        failed = cleanup.failed.len(),
                        "letter updated but some removed images remain in storage"
                    );
                }
            }
        }
        Ok(row)
    }

    /// Remove a letter, then delete its images. Image failures are logged
    /// and reported but do not undo the delete.
    pub async fn delete(&self, caller: &Caller, id: &str) -> Result<DeleteReport> {
        let letter = self
            .backend
            .get_letter(id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("letter {id}")))?;
        ensure_owner(caller, &letter)?;

        if !self.backend.delete_letter(id).await? {
            return Err(VaultError::NotFound(format!("letter {id}")));
        }
        let cleanup = self.images.cleanup(&letter.images).await;
        if !cleanup.is_clean() {
            warn!(
                letter = %logging::letter_id(id),
                failed = cleanup.failed.len(),
                "letter deleted but some images remain in storage"
            );
        }
        info!(letter = %logging::letter_id(id), "letter deleted");
        Ok(DeleteReport { letter, cleanup })
    }
}

fn ensure_attached(letter: &LetterRow, url: &str) -> Result<()> {
    if !letter.images.iter().any(|u| u == url) {
        return Err(VaultError::validation(format!(
            "image {url} is not attached to letter {}",
            letter.id
        )));
    }
    Ok(())
}

fn ensure_owner(caller: &Caller, letter: &LetterRow) -> Result<()> {
    if letter.owner_id != caller.user_id {
        return Err(VaultError::Forbidden(format!(
            "letter {} belongs to someone else",
            letter.id
        )));
    }
    Ok(())
}
