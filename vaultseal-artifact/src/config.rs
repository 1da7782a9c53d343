//! Engine configuration.

use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use vaultseal_crypto::{KdfParams, MIN_PRODUCTION_ITERATIONS};

pub const ENV_MASTER_KEY: &str = "VAULTSEAL_MASTER_KEY";
pub const ENV_KDF_SALT: &str = "VAULTSEAL_KDF_SALT";
pub const ENV_KDF_ITERATIONS: &str = "VAULTSEAL_KDF_ITERATIONS";
pub const ENV_PASSPHRASE_ITERATIONS: &str = "VAULTSEAL_PASSPHRASE_ITERATIONS";
pub const ENV_OPERATION_TIMEOUT_SECS: &str = "VAULTSEAL_OPERATION_TIMEOUT_SECS";

/// Configuration for the artifact engine.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Secret the runtime wrapping key is derived from.
    pub master_key: String,

    /// Salt for the runtime key derivation.
    pub kdf_salt: String,

    /// PBKDF2 iterations for the runtime key.
    pub kdf_iterations: u32,

    /// Default PBKDF2 iterations for new passphrase methods.
    pub passphrase_iterations: u32,

    /// Permit iteration counts below the production minimum.
    pub allow_weak_kdf: bool,

    /// Default deadline for each encrypt or decrypt call.
    pub operation_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            master_key: String::new(),
            kdf_salt: "vaultseal-runtime-v1".to_string(),
            kdf_iterations: MIN_PRODUCTION_ITERATIONS,
            passphrase_iterations: MIN_PRODUCTION_ITERATIONS,
            allow_weak_kdf: false,
            operation_timeout_secs: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("master_key", &"[REDACTED]")
            .field("kdf_salt", &self.kdf_salt)
            .field("kdf_iterations", &self.kdf_iterations)
            .field("passphrase_iterations", &self.passphrase_iterations)
            .field("allow_weak_kdf", &self.allow_weak_kdf)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .finish()
    }
}

impl EngineConfig {
    /// Defaults overridden by `VAULTSEAL_*` environment variables.
    pub fn from_env() -> VaultResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> VaultResult<Self> {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_MASTER_KEY) {
            config.master_key = value;
        }
        if let Some(value) = lookup(ENV_KDF_SALT) {
            config.kdf_salt = value;
        }
        if let Some(value) = lookup(ENV_KDF_ITERATIONS) {
            config.kdf_iterations = parse_number(ENV_KDF_ITERATIONS, &value)?;
        }
        if let Some(value) = lookup(ENV_PASSPHRASE_ITERATIONS) {
            config.passphrase_iterations = parse_number(ENV_PASSPHRASE_ITERATIONS, &value)?;
        }
        if let Some(value) = lookup(ENV_OPERATION_TIMEOUT_SECS) {
            config.operation_timeout_secs = Some(parse_number(ENV_OPERATION_TIMEOUT_SECS, &value)?);
        }
        Ok(config)
    }

    /// Cheap key derivation for test fixtures.
    pub fn testing() -> Self {
        Self {
            master_key: "vaultseal-test-master-key".to_string(),
            kdf_iterations: KdfParams::testing().iterations,
            passphrase_iterations: KdfParams::testing().iterations,
            allow_weak_kdf: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.master_key.is_empty() {
            return Err(VaultError::Config(format!("{ENV_MASTER_KEY} is not set")));
        }
        if self.kdf_salt.is_empty() {
            return Err(VaultError::Config("kdf_salt must not be empty".into()));
        }
        for (name, iterations) in [
            ("kdf_iterations", self.kdf_iterations),
            ("passphrase_iterations", self.passphrase_iterations),
        ] {
            if iterations == 0 {
                return Err(VaultError::Config(format!("{name} must be positive")));
            }
            if !self.allow_weak_kdf && !KdfParams::new(iterations).is_production_grade() {
                return Err(VaultError::Config(format!(
                    "{name} {iterations} is below the minimum of {MIN_PRODUCTION_ITERATIONS}"
                )));
            }
        }
        if self.operation_timeout_secs == Some(0) {
            return Err(VaultError::Config("operation_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn runtime_kdf(&self) -> KdfParams {
        KdfParams::new(self.kdf_iterations)
    }

    pub fn passphrase_kdf(&self) -> KdfParams {
        KdfParams::new(self.passphrase_iterations)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> VaultResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| VaultError::Config(format!("{name} is not a valid number: {value:?}")))
}
