//! Access methods: independent ways to wrap and recover an artifact's data key.
//!
//! Each [`AccessMethodType`] has one [`AccessMethodHandler`] registered in an
//! [`AccessMethodRegistry`]. At encryption every requested method wraps its
//! own copy of the data key; at decryption only records of the requested type
//! (and name, when one is given) are tried, in order, until one unlocks. The
//! policy method holds no key of its own and unlocks through a co-located
//! runtime or passphrase record.

use crate::error::{VaultError, VaultResult};
use crate::model::{config_str, AccessMethod, AccessMethodType, ConfigMap};
use crate::request::{AccessMethodConfig, SECRET_KEYS};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;
use vaultseal_crypto::envelope::{key_id, public_key_from_slice, secret_key_from_slice};
use vaultseal_crypto::{
    decrypt, derive_key, encrypt, open_key, seal_key, CryptoError, DataKey, DerivedKey, KdfParams,
    Salt, SealedEnvelope, MIN_PRODUCTION_ITERATIONS,
};

/// Output of wrapping a data key for one method.
#[derive(Debug, Clone, Default)]
pub struct WrappedKey {
    pub encrypted_key: Vec<u8>,
    /// Config persisted with the record. Must not contain secrets.
    pub config: ConfigMap,
    pub key_id: Option<String>,
}

/// Wraps and unwraps data keys for one access method type.
pub trait AccessMethodHandler: Send + Sync {
    fn method_type(&self) -> AccessMethodType;

    /// Wraps `data_key` using key material from the request `config`.
    fn wrap(&self, data_key: &DataKey, config: &ConfigMap) -> VaultResult<WrappedKey>;

    /// Recovers the data key from `record` using the caller's `credentials`.
    fn unwrap(&self, record: &AccessMethod, credentials: &ConfigMap) -> VaultResult<DataKey>;

    /// False when `credentials` can tell that `record` was keyed for
    /// someone else, so it need not be tried.
    fn accepts(&self, _record: &AccessMethod, _credentials: &ConfigMap) -> bool {
        true
    }

    /// True for methods that hold no key and unlock through another record.
    fn delegates(&self) -> bool {
        false
    }
}

/// Copies the non-secret entries of a request config.
fn public_config(config: &ConfigMap) -> ConfigMap {
    config
        .iter()
        .filter(|(k, _)| !SECRET_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn decode_base64(config: &ConfigMap, key: &str, what: &str) -> VaultResult<Vec<u8>> {
    let encoded = config_str(config, key)
        .ok_or_else(|| VaultError::InvalidRequest(format!("{what} requires `{key}`")))?;
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| VaultError::InvalidRequest(format!("{what}: `{key}` is not base64: {e}")))
}

fn unwrap_with(key: &impl vaultseal_crypto::KeyMaterial, wrapped: &[u8]) -> VaultResult<DataKey> {
    let bytes = decrypt(key, wrapped)?;
    Ok(DataKey::from_slice(&bytes)?)
}

// ── Runtime ──────────────────────────────────────────────────────

/// Wraps under the engine's master key, so holders of the engine
/// configuration can always decrypt.
pub struct RuntimeMethod {
    master: Arc<DerivedKey>,
}

impl RuntimeMethod {
    pub fn new(master: Arc<DerivedKey>) -> Self {
        Self { master }
    }
}

impl AccessMethodHandler for RuntimeMethod {
    fn method_type(&self) -> AccessMethodType {
        AccessMethodType::Runtime
    }

    fn wrap(&self, data_key: &DataKey, config: &ConfigMap) -> VaultResult<WrappedKey> {
        Ok(WrappedKey {
            encrypted_key: encrypt(&*self.master, data_key.as_bytes())?,
            config: public_config(config),
            key_id: None,
        })
    }

    fn unwrap(&self, record: &AccessMethod, _credentials: &ConfigMap) -> VaultResult<DataKey> {
        unwrap_with(&*self.master, &record.encrypted_key)
    }
}

// ── Passphrase ───────────────────────────────────────────────────

const PASSPHRASE_KEYS: [&str; 2] = ["passphrase", "password"];

/// Wraps under a key derived from a caller passphrase and a per-record salt.
pub struct PassphraseMethod {
    default_params: KdfParams,
    allow_weak_kdf: bool,
}

impl PassphraseMethod {
    /// Requested iteration counts below the production floor are refused
    /// unless `allow_weak_kdf` is set.
    pub fn new(default_params: KdfParams, allow_weak_kdf: bool) -> Self {
        Self {
            default_params,
            allow_weak_kdf,
        }
    }

    fn passphrase(config: &ConfigMap) -> Option<&str> {
        PASSPHRASE_KEYS
            .iter()
            .find_map(|k| config_str(config, k))
            .filter(|p| !p.is_empty())
    }
}

impl AccessMethodHandler for PassphraseMethod {
    fn method_type(&self) -> AccessMethodType {
        AccessMethodType::Passphrase
    }

    fn wrap(&self, data_key: &DataKey, config: &ConfigMap) -> VaultResult<WrappedKey> {
        let passphrase = Self::passphrase(config).ok_or_else(|| {
            VaultError::InvalidRequest("passphrase access method requires a passphrase".into())
        })?;
        let iterations = match config.get("iterations") {
            None => self.default_params.iterations,
            Some(value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    VaultError::InvalidRequest(format!("invalid passphrase iterations: {value}"))
                })?,
        };
        let params = KdfParams::new(iterations);
        if !self.allow_weak_kdf && !params.is_production_grade() {
            return Err(VaultError::InvalidRequest(format!(
                "passphrase iterations {iterations} below the minimum of {MIN_PRODUCTION_ITERATIONS}"
            )));
        }

        let salt = Salt::random();
        let key = derive_key(passphrase, &salt, &params)?;

        let mut stored = public_config(config);
        stored.insert("salt".into(), STANDARD.encode(salt.as_bytes()).into());
        stored.insert("iterations".into(), iterations.into());
        stored.insert("kdf".into(), "pbkdf2-sha256".into());

        Ok(WrappedKey {
            encrypted_key: encrypt(&key, data_key.as_bytes())?,
            config: stored,
            key_id: None,
        })
    }

    fn unwrap(&self, record: &AccessMethod, credentials: &ConfigMap) -> VaultResult<DataKey> {
        let passphrase = Self::passphrase(credentials).ok_or_else(|| {
            VaultError::InvalidRequest("passphrase required to unlock this artifact".into())
        })?;
        let salt = config_str(&record.config, "salt")
            .and_then(|s| STANDARD.decode(s).ok())
            .ok_or_else(|| {
                VaultError::ArtifactFormat(format!("passphrase method {} has no salt", record.id))
            })?;
        let iterations = record
            .config
            .get("iterations")
            .and_then(serde_json::Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                VaultError::ArtifactFormat(format!(
                    "passphrase method {} has no iteration count",
                    record.id
                ))
            })?;

        let key = derive_key(passphrase, &Salt::from_bytes(salt), &KdfParams::new(iterations))?;
        unwrap_with(&key, &record.encrypted_key)
    }
}

// ── Certificate ──────────────────────────────────────────────────

/// Seals the data key to a recipient's X25519 public key.
pub struct CertificateMethod;

impl AccessMethodHandler for CertificateMethod {
    fn method_type(&self) -> AccessMethodType {
        AccessMethodType::Certificate
    }

    fn wrap(&self, data_key: &DataKey, config: &ConfigMap) -> VaultResult<WrappedKey> {
        let public = decode_base64(config, "public_key", "certificate access method")?;
        let public = public_key_from_slice(&public)?;
        let envelope = seal_key(data_key.as_bytes(), &public)?;

        Ok(WrappedKey {
            encrypted_key: envelope.to_bytes(),
            config: public_config(config),
            key_id: Some(key_id(&public)),
        })
    }

    fn accepts(&self, record: &AccessMethod, credentials: &ConfigMap) -> bool {
        let (Some(expected), Ok(secret)) = (
            record.key_id.as_deref(),
            decode_base64(credentials, "private_key", "certificate unlock"),
        ) else {
            return true;
        };
        secret_key_from_slice(&secret).map_or(true, |s| key_id(&s.public_key()) == expected)
    }

    fn unwrap(&self, record: &AccessMethod, credentials: &ConfigMap) -> VaultResult<DataKey> {
        let secret = decode_base64(credentials, "private_key", "certificate unlock")?;
        let secret = secret_key_from_slice(&secret)?;

        if let Some(expected) = &record.key_id {
            let actual = key_id(&secret.public_key());
            if &actual != expected {
                return Err(CryptoError::InvalidKey(format!(
                    "private key {actual} does not match certificate {expected}"
                ))
                .into());
            }
        }

        let envelope = SealedEnvelope::from_bytes(&record.encrypted_key)?;
        let bytes = open_key(&envelope, &secret)?;
        Ok(DataKey::from_slice(&bytes)?)
    }
}

// ── Policy ───────────────────────────────────────────────────────

/// Marks an artifact as unlockable by policy alone. Stores no key.
pub struct PolicyMethod;

impl AccessMethodHandler for PolicyMethod {
    fn method_type(&self) -> AccessMethodType {
        AccessMethodType::Policy
    }

    fn wrap(&self, _data_key: &DataKey, config: &ConfigMap) -> VaultResult<WrappedKey> {
        Ok(WrappedKey {
            config: public_config(config),
            ..WrappedKey::default()
        })
    }

    fn unwrap(&self, record: &AccessMethod, _credentials: &ConfigMap) -> VaultResult<DataKey> {
        Err(VaultError::InvalidRequest(format!(
            "policy method {} holds no key of its own",
            record.id
        )))
    }

    fn delegates(&self) -> bool {
        true
    }
}

// ── Registry ─────────────────────────────────────────────────────

/// Types a delegating method may unlock through, in preference order.
const DELEGATE_ORDER: [AccessMethodType; 2] =
    [AccessMethodType::Runtime, AccessMethodType::Passphrase];

/// Maps each access method type to its handler.
#[derive(Default)]
pub struct AccessMethodRegistry {
    handlers: HashMap<AccessMethodType, Box<dyn AccessMethodHandler>>,
}

impl AccessMethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every built-in method.
    pub fn with_defaults(
        master: Arc<DerivedKey>,
        passphrase_params: KdfParams,
        allow_weak_kdf: bool,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(RuntimeMethod::new(master)));
        registry.register(Box::new(PassphraseMethod::new(passphrase_params, allow_weak_kdf)));
        registry.register(Box::new(CertificateMethod));
        registry.register(Box::new(PolicyMethod));
        registry
    }

    /// Registers `handler`, replacing any handler of the same type.
    pub fn register(&mut self, handler: Box<dyn AccessMethodHandler>) {
        self.handlers.insert(handler.method_type(), handler);
    }

    pub fn is_registered(&self, method_type: AccessMethodType) -> bool {
        self.handlers.contains_key(&method_type)
    }

    fn handler(&self, method_type: AccessMethodType) -> VaultResult<&dyn AccessMethodHandler> {
        self.handlers
            .get(&method_type)
            .map(|h| h.as_ref())
            .ok_or_else(|| VaultError::UnsupportedMethodType(method_type.to_string()))
    }

    /// Resolves a requested type string to a registered type.
    pub fn resolve_type(&self, requested: &str) -> VaultResult<AccessMethodType> {
        let method_type: AccessMethodType = requested.parse()?;
        self.handler(method_type)?;
        Ok(method_type)
    }

    /// Checks an encryption request's method list before any key is generated.
    pub fn validate_request(&self, configs: &[AccessMethodConfig]) -> VaultResult<()> {
        if configs.is_empty() {
            return Err(VaultError::InvalidRequest(
                "at least one access method is required".into(),
            ));
        }

        let mut types = Vec::with_capacity(configs.len());
        let mut needs_delegate = false;
        for config in configs {
            let method_type = self.resolve_type(&config.method_type)?;
            needs_delegate |= self.handler(method_type)?.delegates();
            types.push(method_type);
        }

        if needs_delegate && !DELEGATE_ORDER.iter().any(|t| types.contains(t)) {
            return Err(VaultError::InvalidRequest(
                "a policy access method needs a runtime or passphrase method alongside it".into(),
            ));
        }
        Ok(())
    }

    /// Builds the persisted record for one requested method.
    pub fn create_access_method(
        &self,
        artifact_id: Uuid,
        config: &AccessMethodConfig,
        data_key: &DataKey,
        created_at: DateTime<Utc>,
    ) -> VaultResult<AccessMethod> {
        let method_type = self.resolve_type(&config.method_type)?;
        let wrapped = self.handler(method_type)?.wrap(data_key, &config.config)?;
        let name = if config.name.trim().is_empty() {
            method_type.to_string()
        } else {
            config.name.clone()
        };

        debug!(%artifact_id, method = %method_type, %name, "wrapped data key");
        Ok(AccessMethod {
            id: Uuid::new_v4(),
            artifact_id,
            method_type,
            name,
            config: wrapped.config,
            encrypted_key: wrapped.encrypted_key,
            key_id: wrapped.key_id,
            is_active: true,
            created_at,
        })
    }

    /// Active records of `method_type`, restricted to `name` unless it is blank.
    pub fn find_active<'a>(
        &self,
        methods: &'a [AccessMethod],
        method_type: AccessMethodType,
        name: &str,
    ) -> Vec<&'a AccessMethod> {
        let name = name.trim();
        methods
            .iter()
            .filter(|m| m.is_active && m.method_type == method_type)
            .filter(|m| name.is_empty() || m.name.trim() == name)
            .collect()
    }

    /// Records that may hold the key for a request, in the order to try them.
    ///
    /// For a delegating method the requested record must exist, and the
    /// candidates are the co-located records it unlocks through.
    pub fn candidates<'a>(
        &self,
        methods: &'a [AccessMethod],
        requested: &AccessMethodConfig,
    ) -> VaultResult<Vec<&'a AccessMethod>> {
        let method_type = self.resolve_type(&requested.method_type)?;
        let records = self.find_active(methods, method_type, &requested.name);
        if records.is_empty() {
            return Err(VaultError::AccessMethodNotFound(method_type.to_string()));
        }

        let handler = self.handler(method_type)?;
        if !handler.delegates() {
            let preferred: Vec<_> = records
                .iter()
                .copied()
                .filter(|m| handler.accepts(m, &requested.config))
                .collect();
            return Ok(if preferred.is_empty() { records } else { preferred });
        }

        let has_passphrase = PassphraseMethod::passphrase(&requested.config).is_some();
        let delegates: Vec<_> = DELEGATE_ORDER
            .iter()
            .filter(|t| **t != AccessMethodType::Passphrase || has_passphrase)
            .flat_map(|t| self.find_active(methods, *t, ""))
            .collect();
        if !delegates.is_empty() {
            return Ok(delegates);
        }
        if !self
            .find_active(methods, AccessMethodType::Passphrase, "")
            .is_empty()
        {
            return Err(VaultError::InvalidRequest(format!(
                "passphrase required to unlock through the {method_type} method"
            )));
        }
        Err(VaultError::AccessMethodNotFound(method_type.to_string()))
    }

    /// Tries each candidate in turn and returns the first whose key passes
    /// `verify`. Fails with the last error when none does.
    pub fn unlock<'a>(
        &self,
        candidates: &[&'a AccessMethod],
        credentials: &ConfigMap,
        verify: impl Fn(&DataKey) -> VaultResult<()>,
    ) -> VaultResult<(&'a AccessMethod, DataKey)> {
        let mut last_error = None;
        for &record in candidates {
            let attempt = self.unwrap(record, credentials).and_then(|key| {
                verify(&key)?;
                Ok(key)
            });
            match attempt {
                Ok(key) => return Ok((record, key)),
                Err(err) => {
                    debug!(
                        record = %record.id,
                        name = %record.name,
                        error = %err,
                        "access method did not unlock"
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| VaultError::InvalidRequest("no access method records to try".into())))
    }

    /// Recovers the data key from `record` with the caller's credentials.
    pub fn unwrap(&self, record: &AccessMethod, credentials: &ConfigMap) -> VaultResult<DataKey> {
        self.handler(record.method_type)?.unwrap(record, credentials)
    }
}
