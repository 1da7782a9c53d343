//! Key material and password-based key derivation.

use crate::error::{CryptoError, CryptoResult};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every symmetric key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of randomly generated salts in bytes.
pub const SALT_SIZE: usize = 16;

/// Lowest PBKDF2 iteration count accepted outside of test fixtures.
pub const MIN_PRODUCTION_ITERATIONS: u32 = 100_000;

/// Anything that can key the content cipher.
pub trait KeyMaterial {
    fn key_bytes(&self) -> &[u8; KEY_SIZE];
}

/// A wrapping key derived from a secret, or handed in by a caller.
///
/// Only ever used to encrypt data keys, never content.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl KeyMaterial for DerivedKey {
    fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// The per-artifact data key that encrypts content.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    /// Generates a fresh random data key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Rebuilds a data key from unwrapped bytes, checking the length.
    pub fn from_slice(slice: &[u8]) -> CryptoResult<Self> {
        let bytes: [u8; KEY_SIZE] = slice.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: slice.len(),
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// SHA-256 of the key. Used to verify an unwrap, never to recover the key.
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.bytes).into()
    }
}

impl KeyMaterial for DataKey {
    fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey([REDACTED])")
    }
}

/// Salt fed to the KDF. Random for passphrase records, configured for the runtime key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Salt(Vec<u8>);

impl Salt {
    pub fn random() -> Self {
        let mut bytes = vec![0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// PBKDF2-HMAC-SHA256 parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfParams {
    pub iterations: u32,
}

impl KdfParams {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    /// Cheap parameters for test fixtures only.
    pub fn testing() -> Self {
        Self { iterations: 1_000 }
    }

    pub fn is_production_grade(&self) -> bool {
        self.iterations >= MIN_PRODUCTION_ITERATIONS
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: MIN_PRODUCTION_ITERATIONS,
        }
    }
}

/// Derives a 256-bit wrapping key from a low-entropy secret.
///
/// Deterministic in `(secret, salt, iterations)`; the derived key is never
/// stored, so unwrapping after a restart depends on this.
pub fn derive_key(
    secret: impl AsRef<[u8]>,
    salt: &Salt,
    params: &KdfParams,
) -> CryptoResult<DerivedKey> {
    if params.iterations == 0 {
        return Err(CryptoError::KeyDerivation(
            "iteration count must be positive".to_string(),
        ));
    }
    if salt.as_bytes().is_empty() {
        return Err(CryptoError::KeyDerivation("salt must not be empty".to_string()));
    }

    let mut bytes = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        secret.as_ref(),
        salt.as_bytes(),
        params.iterations,
        &mut bytes,
    );
    Ok(DerivedKey::from_bytes(bytes))
}

/// Generates a random wrapping key.
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rng().fill_bytes(&mut bytes);
    DerivedKey::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let salt = Salt::from_bytes(b"fixed-salt".to_vec());
        let a = derive_key("secret", &salt, &KdfParams::testing()).unwrap();
        let b = derive_key("secret", &salt, &KdfParams::testing()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn salt_and_iterations_change_output() {
        let salt = Salt::from_bytes(b"fixed-salt".to_vec());
        let base = derive_key("secret", &salt, &KdfParams::new(1_000)).unwrap();

        let other_salt = Salt::from_bytes(b"other-salt".to_vec());
        let by_salt = derive_key("secret", &other_salt, &KdfParams::new(1_000)).unwrap();
        let by_iter = derive_key("secret", &salt, &KdfParams::new(1_001)).unwrap();

        assert_ne!(base.as_bytes(), by_salt.as_bytes());
        assert_ne!(base.as_bytes(), by_iter.as_bytes());
    }

    #[test]
    fn pbkdf2_sha256_known_vector() {
        // RFC 7914 section 11, PBKDF2-HMAC-SHA256 ("passwd", "salt", c=1), first 32 bytes.
        let salt = Salt::from_bytes(b"salt".to_vec());
        let key = derive_key("passwd", &salt, &KdfParams::new(1)).unwrap();
        let expected: [u8; 32] = [
            0x55, 0xac, 0x04, 0x6e, 0x56, 0xe3, 0x08, 0x9f, 0xec, 0x16, 0x91, 0xc2, 0x25, 0x44,
            0xb6, 0x05, 0xf9, 0x41, 0x85, 0x21, 0x6d, 0xde, 0x04, 0x65, 0xe6, 0x8b, 0x9d, 0x57,
            0xc2, 0x0d, 0xac, 0xbc,
        ];
        assert_eq!(key.as_bytes(), &expected);
    }

    #[test]
    fn zero_iterations_rejected() {
        let salt = Salt::random();
        assert!(matches!(
            derive_key("secret", &salt, &KdfParams::new(0)),
            Err(CryptoError::KeyDerivation(_))
        ));
    }

    #[test]
    fn empty_salt_rejected() {
        let salt = Salt::from_bytes(Vec::new());
        assert!(derive_key("secret", &salt, &KdfParams::testing()).is_err());
    }

    #[test]
    fn data_keys_are_unique() {
        assert_ne!(DataKey::generate().as_bytes(), DataKey::generate().as_bytes());
    }

    #[test]
    fn data_key_from_short_slice_fails() {
        let err = DataKey::from_slice(&[0u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            }
        ));
    }

    #[test]
    fn debug_output_is_redacted() {
        let key = DataKey::generate();
        assert_eq!(format!("{key:?}"), "DataKey([REDACTED])");
    }

    #[test]
    fn default_params_are_production_grade() {
        assert!(KdfParams::default().is_production_grade());
        assert!(!KdfParams::testing().is_production_grade());
    }
}
