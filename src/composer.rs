//! Edit form model for writing a letter.
//!
//! A composer is opened once, either blank or hydrated from an existing
//! letter, and then saved any number of times. The first save of a blank
//! composer creates the letter; every later save updates it.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::gate::Caller;
use crate::images::{Attachment, QueuedImage};
use crate::letters::{LetterDraft, LetterStore, SaveAction};
use crate::storage::LetterRow;

/// How the form was opened. Fixed for the composer's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormMode {
    New,
    LoadedDraft(String),
}

pub struct Composer {
    store: Arc<LetterStore>,
    caller: Caller,
    mode: FormMode,
    target: Option<String>,
    pub title: String,
    pub content: String,
    pub sticker_id: Option<String>,
    attachments: Vec<Attachment>,
    next_handle: u64,
}

impl Composer {
    /// Open the form. With an id, the letter is loaded; a letter that no
    /// longer exists opens a blank form instead.
    pub async fn open(store: Arc<LetterStore>, caller: Caller, id: Option<&str>) -> Result<Self> {
        let loaded = match id {
            Some(id) => store.get(id).await?,
            None => None,
        };
        if let (Some(id), None) = (id, &loaded) {
            debug!(letter = id, "letter not found; opening a blank form");
        }
        let mut composer = Self {
            store,
            caller,
            mode: FormMode::New,
            target: None,
            title: String::new(),
            content: String::new(),
            sticker_id: None,
            attachments: Vec::new(),
            next_handle: 0,
        };
        if let Some(row) = loaded {
            composer.mode = FormMode::LoadedDraft(row.id.clone());
            composer.target = Some(row.id.clone());
            composer.title = row.title;
            composer.content = row.content;
            composer.sticker_id = row.sticker_id;
            composer.attachments = row
                .images
                .into_iter()
                .map(|url| Attachment::Remote { url })
                .collect();
        }
        Ok(composer)
    }

    pub fn mode(&self) -> &FormMode {
        &self.mode
    }

    /// The letter the next save writes to, if any.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Queue picked files behind the current attachments. Returns the
    /// preview handle assigned to each.
    pub fn select(&mut self, files: Vec<QueuedImage>) -> Vec<String> {
        let mut handles = Vec::with_capacity(files.len());
        for file in files {
            let handle = format!("local:{}", self.next_handle);
            self.next_handle += 1;
            handles.push(handle.clone());
            self.attachments.push(Attachment::Local { handle, file });
        }
        handles
    }

    /// Drop the entry at `index` in display order.
    pub fn remove(&mut self, index: usize) -> Option<Attachment> {
        if index < self.attachments.len() {
            Some(self.attachments.remove(index))
        } else {
            None
        }
    }

    /// What the form shows for each attachment, in display order.
    pub fn previews(&self) -> Vec<&str> {
        self.attachments.iter().map(Attachment::preview).collect()
    }

    pub async fn save_draft(&mut self) -> Result<LetterRow> {
        self.save(SaveAction::Draft).await
    }

    pub async fn seal(&mut self) -> Result<LetterRow> {
        self.save(SaveAction::Seal).await
    }

    async fn save(&mut self, action: SaveAction) -> Result<LetterRow> {
        let draft = LetterDraft {
            title: self.title.clone(),
            content: self.content.clone(),
            sticker_id: self.sticker_id.clone(),
            attachments: self.attachments.clone(),
        };
        let row = self
            .store
            .save(&self.caller, self.target.as_deref(), action, &draft)
            .await?;

        self.target = Some(row.id.clone());
        self.title = row.title.clone();
        self.sticker_id = row.sticker_id.clone();
        self.attachments = row
            .images
            .iter()
            .map(|url| Attachment::Remote { url: url.clone() })
            .collect();
        Ok(row)
    }
}
