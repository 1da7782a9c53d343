//! Artifact engine error types.

use crate::model::PolicyType;
use std::path::PathBuf;
use thiserror::Error;
use vaultseal_archive::ArchiveError;
use vaultseal_crypto::CryptoError;

/// Result type for artifact operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors surfaced by encrypt, decrypt and inspect.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("no active access method of type {0}")]
    AccessMethodNotFound(String),

    #[error("unsupported access method type: {0}")]
    UnsupportedMethodType(String),

    #[error("policy violation ({kind}) {policy}: {reason}")]
    PolicyViolation {
        policy: String,
        kind: PolicyType,
        reason: String,
    },

    #[error("artifact format error: {0}")]
    ArtifactFormat(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("output already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VaultError {
    pub(crate) fn io(context: impl std::fmt::Display) -> impl FnOnce(std::io::Error) -> Self {
        move |e| VaultError::Io(format!("{context}: {e}"))
    }
}

impl From<ArchiveError> for VaultError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::Cancelled => VaultError::Cancelled,
            ArchiveError::DeadlineExceeded => VaultError::DeadlineExceeded,
            other => VaultError::Io(other.to_string()),
        }
    }
}
