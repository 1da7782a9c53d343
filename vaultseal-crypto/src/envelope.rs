//! Asymmetric key sealing for the certificate access method.
//!
//! Uses X25519 key exchange + XSalsa20-Poly1305. Each seal generates an
//! ephemeral keypair, so only the holder of the recipient's secret key can
//! open the envelope and the sender stays anonymous.

use crate::error::{CryptoError, CryptoResult};
use crypto_box::aead::{Aead, AeadCore, OsRng};
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use sha2::{Digest, Sha256};

/// X25519 public key length.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// XSalsa20 nonce length.
pub const ENVELOPE_NONCE_SIZE: usize = 24;

/// X25519 keypair held by a certificate recipient. The secret half zeroizes on drop.
pub struct CertificateKeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl CertificateKeyPair {
    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Rebuilds the pair from a stored secret key.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = SecretKey::from(bytes);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Short identifier for the public half.
    pub fn key_id(&self) -> String {
        key_id(&self.public)
    }
}

/// Key sealed to a recipient's X25519 public key.
///
/// The ephemeral public key is included so the recipient can reconstruct the shared secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedEnvelope {
    /// Sender half of the key agreement, fresh per seal.
    pub ephemeral_public_key: [u8; PUBLIC_KEY_SIZE],
    /// XSalsa20 nonce.
    pub nonce: [u8; ENVELOPE_NONCE_SIZE],
    /// Sealed key (XSalsa20-Poly1305 ciphertext + Poly1305 tag).
    pub ciphertext: Vec<u8>,
}

impl SealedEnvelope {
    /// Flattens to `ephemeral_pk ‖ nonce ‖ ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(PUBLIC_KEY_SIZE + ENVELOPE_NONCE_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.ephemeral_public_key);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() <= PUBLIC_KEY_SIZE + ENVELOPE_NONCE_SIZE {
            return Err(CryptoError::Decryption("sealed envelope truncated".to_string()));
        }
        let (pk, rest) = bytes.split_at(PUBLIC_KEY_SIZE);
        let (nonce, ciphertext) = rest.split_at(ENVELOPE_NONCE_SIZE);

        let mut ephemeral_public_key = [0u8; PUBLIC_KEY_SIZE];
        ephemeral_public_key.copy_from_slice(pk);
        let mut nonce_bytes = [0u8; ENVELOPE_NONCE_SIZE];
        nonce_bytes.copy_from_slice(nonce);

        Ok(Self {
            ephemeral_public_key,
            nonce: nonce_bytes,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Generates a new X25519 keypair for certificate access.
pub fn generate_certificate_keypair() -> CertificateKeyPair {
    let secret = SecretKey::generate(&mut OsRng);
    let public = secret.public_key();
    CertificateKeyPair { secret, public }
}

/// Parses a raw 32-byte public key.
pub fn public_key_from_slice(bytes: &[u8]) -> CryptoResult<PublicKey> {
    let raw: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: PUBLIC_KEY_SIZE,
        actual: bytes.len(),
    })?;
    Ok(PublicKey::from(raw))
}

/// Parses a raw 32-byte secret key.
pub fn secret_key_from_slice(bytes: &[u8]) -> CryptoResult<SecretKey> {
    let raw: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: 32,
        actual: bytes.len(),
    })?;
    Ok(SecretKey::from(raw))
}

/// First 16 hex chars of SHA-256 over the public key.
pub fn key_id(public: &PublicKey) -> String {
    let digest = Sha256::digest(public.as_bytes());
    hex::encode(&digest[..8])
}

/// Seals `key` for a recipient using anonymous envelope encryption.
pub fn seal_key(key: &[u8], recipient_pk: &PublicKey) -> CryptoResult<SealedEnvelope> {
    let ephemeral = SecretKey::generate(&mut OsRng);
    let ephemeral_pk = ephemeral.public_key();

    let salsa_box = SalsaBox::new(recipient_pk, &ephemeral);
    let nonce = SalsaBox::generate_nonce(&mut OsRng);

    let ciphertext = salsa_box
        .encrypt(&nonce, key)
        .map_err(|e| CryptoError::Encryption(format!("envelope seal failed: {e}")))?;

    let mut nonce_bytes = [0u8; ENVELOPE_NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);

    Ok(SealedEnvelope {
        ephemeral_public_key: *ephemeral_pk.as_bytes(),
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Opens a sealed envelope using the recipient's secret key.
pub fn open_key(envelope: &SealedEnvelope, recipient_sk: &SecretKey) -> CryptoResult<Vec<u8>> {
    let ephemeral_pk = PublicKey::from(envelope.ephemeral_public_key);
    let salsa_box = SalsaBox::new(&ephemeral_pk, recipient_sk);

    salsa_box
        .decrypt(
            crypto_box::Nonce::from_slice(&envelope.nonce),
            envelope.ciphertext.as_ref(),
        )
        .map_err(|_| CryptoError::authentication_failed())
}
