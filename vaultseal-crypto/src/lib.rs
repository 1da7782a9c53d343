//! Cryptographic primitives for vaultseal.
//!
//! Provides the building blocks of envelope encryption:
//! - AES-256-GCM for content and key wrapping
//! - PBKDF2-HMAC-SHA256 for deriving wrapping keys from secrets
//! - X25519 + XSalsa20-Poly1305 sealing for certificate recipients
//! - Key types that zeroize on drop
//!
//! # Architecture
//!
//! The encryption uses a two-tier key system:
//!
//! 1. **Data Key**: A random 256-bit key generated for each artifact.
//!    It encrypts the artifact content exactly once.
//!
//! 2. **Wrapping Keys**: One per access method. Each wraps its own copy of
//!    the data key, so any single method can unlock the artifact on its own.
//!
//! Wrapping keys are derived on demand and never stored.

mod cipher;
pub mod envelope;
mod error;
mod key;

pub use cipher::{decrypt, encrypt, sealed_len, ALGORITHM, NONCE_SIZE, TAG_SIZE};
pub use envelope::{
    generate_certificate_keypair, open_key, seal_key, CertificateKeyPair, SealedEnvelope,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    derive_key, generate_random_key, DataKey, DerivedKey, KdfParams, KeyMaterial, Salt, KEY_SIZE,
    MIN_PRODUCTION_ITERATIONS, SALT_SIZE,
};
