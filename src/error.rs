//! Error taxonomy for vault operations.
//!
//! Lower layers have their own error enums ([`StorageError`] for the backend,
//! [`ProviderError`] for the identity provider); both fold into
//! [`VaultError::Storage`] / [`VaultError::Provider`], which together make up
//! the "service failure" class.

use thiserror::Error;

use crate::provider::ProviderError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum VaultError {
    /// The caller has no admitted session, or its identity is not a member.
    #[error("unauthorized")]
    Unauthorized,

    /// The caller is a member but does not own the record it tried to change.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected before any backend call was made.
    #[error("{0}")]
    Validation(String),

    /// The same save/delete is already in flight for this caller.
    #[error("operation already in progress")]
    Busy,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("identity provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl VaultError {
    pub fn validation(msg: impl Into<String>) -> Self {
        VaultError::Validation(msg.into())
    }

    /// Network or backend failure, as opposed to a rejected request.
    pub fn is_service_failure(&self) -> bool {
        matches!(self, VaultError::Storage(_) | VaultError::Provider(_))
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;
