//! Shared application state and the duplicate-submission guard.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::backend::Backend;
use crate::gate::{Allowlist, SessionGate};
use crate::letters::LetterStore;
use crate::provider::IdentityProvider;

pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub gate: SessionGate,
    pub letters: Arc<LetterStore>,
    pub provider: Arc<dyn IdentityProvider>,
    /// Externally visible base URL without a trailing slash.
    pub public_url: String,
    pub max_image_bytes: u64,
    pub in_flight: InFlight,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        backend: Arc<dyn Backend>,
        allowlist: Allowlist,
        provider: Arc<dyn IdentityProvider>,
        public_url: &str,
        max_image_bytes: u64,
    ) -> Self {
        let allowlist = Arc::new(allowlist);
        Self {
            gate: SessionGate::new(allowlist.clone(), backend.clone()),
            letters: Arc::new(LetterStore::new(
                backend.clone(),
                allowlist,
                max_image_bytes,
            )),
            backend,
            provider,
            public_url: public_url.trim_end_matches('/').to_string(),
            max_image_bytes,
            in_flight: InFlight::default(),
        }
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(self)
    }

    /// Where the provider sends the browser back to.
    pub fn callback_url(&self) -> String {
        format!("{}/auth/callback", self.public_url)
    }

    /// Whether cookies should carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.public_url.starts_with("https://")
    }
}

/// Keys of saves and deletes currently being processed.
#[derive(Default)]
pub struct InFlight {
    keys: Mutex<HashSet<String>>,
}

impl InFlight {
    /// Claim `key`, or `None` when a request holding it is still running.
    pub fn try_acquire(&self, key: String) -> Option<InFlightGuard<'_>> {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if !keys.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard { owner: self, key })
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its key when dropped, whether the request succeeded or not.
pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner
            .keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}
