//! Persisted artifact model: metadata, access-method records, policies and
//! decryption attempts.

use crate::error::VaultError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Free-form method configuration or policy rules. Ordered so the container
/// bytes are stable for identical input.
pub type ConfigMap = BTreeMap<String, serde_json::Value>;

/// Reads a string entry, ignoring non-string values.
pub(crate) fn config_str<'a>(config: &'a ConfigMap, key: &str) -> Option<&'a str> {
    config.get(key).and_then(serde_json::Value::as_str)
}

// ── Access method types ──────────────────────────────────────────

/// The closed set of ways an artifact's data key can be recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMethodType {
    Passphrase,
    Certificate,
    Runtime,
    Policy,
}

impl AccessMethodType {
    pub const ALL: [AccessMethodType; 4] = [
        AccessMethodType::Passphrase,
        AccessMethodType::Certificate,
        AccessMethodType::Runtime,
        AccessMethodType::Policy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMethodType::Passphrase => "passphrase",
            AccessMethodType::Certificate => "certificate",
            AccessMethodType::Runtime => "runtime",
            AccessMethodType::Policy => "policy",
        }
    }
}

impl fmt::Display for AccessMethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessMethodType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| VaultError::UnsupportedMethodType(s.to_string()))
    }
}

// ── Policy types ─────────────────────────────────────────────────

/// Conditions that gate decryption after the data key has been recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    Ttl,
    Environment,
    Instance,
    Region,
    MultiFactor,
}

impl PolicyType {
    /// Rule key holding the allowed values, for tag-matching policies.
    pub fn tag_key(&self) -> Option<&'static str> {
        match self {
            PolicyType::Environment => Some("environment"),
            PolicyType::Instance => Some("instance"),
            PolicyType::Region => Some("region"),
            PolicyType::Ttl | PolicyType::MultiFactor => None,
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyType::Ttl => write!(f, "TTL"),
            PolicyType::Environment => write!(f, "Environment"),
            PolicyType::Instance => write!(f, "Instance"),
            PolicyType::Region => write!(f, "Region"),
            PolicyType::MultiFactor => write!(f, "MultiFactor"),
        }
    }
}

// ── Records ──────────────────────────────────────────────────────

/// One independent way to recover an artifact's data key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessMethod {
    pub id: Uuid,
    pub artifact_id: Uuid,
    #[serde(rename = "type")]
    pub method_type: AccessMethodType,
    pub name: String,
    #[serde(default)]
    pub config: ConfigMap,
    /// Data key wrapped under this method's key material. Empty for
    /// methods that delegate to another record.
    #[serde(with = "base64_bytes")]
    pub encrypted_key: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A condition evaluated at decryption time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionPolicy {
    pub id: Uuid,
    pub artifact_id: Uuid,
    #[serde(rename = "type")]
    pub policy_type: PolicyType,
    pub name: String,
    #[serde(default)]
    pub rules: ConfigMap,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// What was packed, recorded so decryption can verify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub original_name: String,
    pub original_path: PathBuf,
    pub compressed: bool,
    /// Hex SHA-256 of the plaintext archive stream.
    pub checksum: String,
}

/// Scalar artifact metadata, stored in the container's metadata section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub file_path: PathBuf,
    pub algorithm: String,
    pub version: u16,
    /// Base64 SHA-256 of the data key; never the key itself.
    pub data_key_hash: String,
    /// Byte length of the plaintext archive stream.
    pub content_size: u64,
    pub content: ContentMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A sealed unit: metadata plus every access method and policy attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedArtifact {
    #[serde(flatten)]
    pub metadata: ArtifactMetadata,
    pub access_methods: Vec<AccessMethod>,
    pub policies: Vec<EncryptionPolicy>,
}

impl EncryptedArtifact {
    pub fn id(&self) -> Uuid {
        self.metadata.id
    }
}

/// One decrypt attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecryptionAttempt {
    pub id: Uuid,
    /// `None` when the container could not be read.
    pub artifact_id: Option<Uuid>,
    pub actor_id: Uuid,
    /// The method type as the caller requested it.
    pub method_type: String,
    pub success: bool,
    pub reason: Option<String>,
    pub origin_ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
