//! Caller-facing request and result types.

use crate::model::{AccessMethodType, ConfigMap, PolicyType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Config keys that carry caller secrets and are never persisted.
pub(crate) const SECRET_KEYS: [&str; 4] = ["passphrase", "password", "private_key", "token"];

/// An access method as requested by a caller: the type is kept as a raw
/// string so unknown types surface as `UnsupportedMethodType`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AccessMethodConfig {
    #[serde(rename = "type")]
    pub method_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: ConfigMap,
}

impl AccessMethodConfig {
    pub fn new(method_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            method_type: method_type.into(),
            name: name.into(),
            config: ConfigMap::new(),
        }
    }

    pub fn runtime(name: impl Into<String>) -> Self {
        Self::new(AccessMethodType::Runtime.as_str(), name)
    }

    pub fn passphrase(name: impl Into<String>, passphrase: impl Into<String>) -> Self {
        let passphrase: String = passphrase.into();
        Self::new(AccessMethodType::Passphrase.as_str(), name).with("passphrase", passphrase)
    }

    /// `key` is the recipient public key (encrypt) or private key (decrypt),
    /// base64 encoded.
    pub fn certificate(name: impl Into<String>, config_key: &str, key: impl Into<String>) -> Self {
        let key: String = key.into();
        Self::new(AccessMethodType::Certificate.as_str(), name).with(config_key, key)
    }

    pub fn policy(name: impl Into<String>) -> Self {
        Self::new(AccessMethodType::Policy.as_str(), name)
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }
}

impl fmt::Debug for AccessMethodConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config: Vec<(&str, &dyn fmt::Debug)> = self
            .config
            .iter()
            .map(|(k, v)| {
                let shown: &dyn fmt::Debug = if SECRET_KEYS.contains(&k.as_str()) {
                    &"[REDACTED]"
                } else {
                    v
                };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("AccessMethodConfig")
            .field("method_type", &self.method_type)
            .field("name", &self.name)
            .field("config", &config)
            .finish()
    }
}

/// A policy as requested by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(rename = "type")]
    pub policy_type: PolicyType,
    pub name: String,
    #[serde(default)]
    pub rules: ConfigMap,
}

impl PolicyConfig {
    pub fn new(policy_type: PolicyType, name: impl Into<String>) -> Self {
        Self {
            policy_type,
            name: name.into(),
            rules: ConfigMap::new(),
        }
    }

    pub fn ttl(name: impl Into<String>, duration: &str) -> Self {
        Self::new(PolicyType::Ttl, name).with("duration", duration)
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.rules.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionRequest {
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub access_methods: Vec<AccessMethodConfig>,
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub compression: bool,
}

/// Facts about the caller that policies are evaluated against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessContext {
    pub environment: Option<String>,
    pub instance: Option<String>,
    pub region: Option<String>,
    pub mfa_token: Option<String>,
    pub origin_ip: Option<String>,
    pub user_agent: Option<String>,
    /// Evaluation time; the current time when unset.
    pub now: Option<DateTime<Utc>>,
}

impl AccessContext {
    pub fn evaluated_at(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    /// Returns the caller's tag for a tag-matching policy.
    pub fn tag(&self, policy_type: PolicyType) -> Option<&str> {
        match policy_type {
            PolicyType::Environment => self.environment.as_deref(),
            PolicyType::Instance => self.instance.as_deref(),
            PolicyType::Region => self.region.as_deref(),
            PolicyType::Ttl | PolicyType::MultiFactor => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptionRequest {
    pub artifact_path: PathBuf,
    pub output_path: PathBuf,
    pub access_method: AccessMethodConfig,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub context: AccessContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionResult {
    pub artifact_id: Uuid,
    pub file_path: PathBuf,
    pub original_size: u64,
    pub encrypted_size: u64,
    pub algorithm: String,
    pub access_methods: Vec<String>,
    pub policies: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecryptionResult {
    pub artifact_id: Uuid,
    pub file_path: PathBuf,
    pub original_size: u64,
    pub decrypted_size: u64,
    pub method_type: AccessMethodType,
    pub success: bool,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A method or policy as listed by `inspect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEntry<T> {
    pub name: String,
    pub kind: T,
    pub is_active: bool,
}

/// Container contents readable without any key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub artifact_id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: String,
    pub algorithm: String,
    pub version: u16,
    pub content_size: u64,
    pub encrypted_size: u64,
    pub compressed: bool,
    pub access_methods: Vec<NamedEntry<AccessMethodType>>,
    pub policies: Vec<NamedEntry<PolicyType>>,
    pub created_at: DateTime<Utc>,
}
