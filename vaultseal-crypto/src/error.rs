//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by the cipher, the KDF and key sealing.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Tag mismatch, truncated input or wrong key. Always treated as tamper evidence.
    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl CryptoError {
    /// The canonical AEAD failure.
    pub(crate) fn authentication_failed() -> Self {
        CryptoError::Decryption("authentication failed".to_string())
    }

    /// Returns true if this error came from a failed integrity check.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, CryptoError::Decryption(_))
    }
}
