//! AES-256-GCM content cipher.
//!
//! Every call to [`encrypt`] draws a fresh 96-bit nonce from the OS RNG and
//! emits `nonce ‖ ciphertext ‖ tag`. No associated data is bound.

use crate::error::{CryptoError, CryptoResult};
use crate::key::KeyMaterial;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};

/// Nonce length in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;

/// Algorithm tag recorded in artifact headers.
pub const ALGORITHM: &str = "AES-256-GCM";

fn cipher_for(key: &impl KeyMaterial) -> CryptoResult<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.key_bytes())
        .map_err(|e| CryptoError::Encryption(format!("cipher init failed: {e}")))
}

/// Encrypts `plaintext` under `key`, returning `nonce ‖ ciphertext ‖ tag`.
pub fn encrypt(key: &impl KeyMaterial, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = cipher_for(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts `nonce ‖ ciphertext ‖ tag` produced by [`encrypt`].
///
/// Input shorter than a nonce plus tag, a wrong key, or any modified byte
/// all fail with `Decryption("authentication failed")`.
pub fn decrypt(key: &impl KeyMaterial, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::authentication_failed());
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

    cipher_for(key)?
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::authentication_failed())
}

/// Size of the sealed output for a plaintext of `plaintext_len` bytes.
pub fn sealed_len(plaintext_len: usize) -> usize {
    NONCE_SIZE + plaintext_len + TAG_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::DataKey;

    #[test]
    fn round_trip() {
        let key = DataKey::generate();
        let sealed = encrypt(&key, b"archive bytes").unwrap();
        assert_eq!(sealed.len(), sealed_len(13));
        assert_eq!(decrypt(&key, &sealed).unwrap(), b"archive bytes");
    }

    #[test]
    fn empty_plaintext_round_trip() {
        let key = DataKey::generate();
        let sealed = encrypt(&key, b"").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + TAG_SIZE);
        assert!(decrypt(&key, &sealed).unwrap().is_empty());
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let key = DataKey::generate();
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn truncated_below_nonce_fails() {
        let key = DataKey::generate();
        let err = decrypt(&key, &[0u8; NONCE_SIZE - 1]).unwrap_err();
        assert_eq!(err.to_string(), "decryption failed: authentication failed");
    }
}
