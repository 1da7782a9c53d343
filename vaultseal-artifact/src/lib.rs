//! Envelope-encrypted artifacts.
//!
//! A file or directory is packed into a tar stream, sealed once under a
//! random data key, and stored in a self-describing container together with
//! one wrapped copy of that key per access method:
//!
//! - **runtime**: wrapped under a key derived from the engine configuration
//! - **passphrase**: wrapped under a key derived from a caller passphrase
//! - **certificate**: sealed to a recipient X25519 public key
//! - **policy**: unlocks through a co-located runtime or passphrase record
//!
//! Any single access method recovers the data key. Policies (TTL,
//! environment, instance, region, multi-factor) are evaluated after the key
//! is recovered and before any content is decrypted.
//!
//! ```no_run
//! use std::sync::Arc;
//! use uuid::Uuid;
//! use vaultseal_artifact::{
//!     AccessMethodConfig, DecryptionRequest, EncryptionRequest, EngineConfig,
//!     TracingAuditSink, VaultEngine,
//! };
//!
//! # fn main() -> vaultseal_artifact::VaultResult<()> {
//! let engine = VaultEngine::new(EngineConfig::from_env()?, Arc::new(TracingAuditSink))?;
//! let actor = Uuid::new_v4();
//!
//! engine.encrypt(
//!     &EncryptionRequest {
//!         source_path: "reports".into(),
//!         output_path: "reports.vsa".into(),
//!         access_methods: vec![AccessMethodConfig::runtime("service")],
//!         policies: Vec::new(),
//!         description: String::new(),
//!         compression: true,
//!     },
//!     actor,
//! )?;
//!
//! engine.decrypt(
//!     &DecryptionRequest {
//!         artifact_path: "reports.vsa".into(),
//!         output_path: "restored".into(),
//!         access_method: AccessMethodConfig::runtime("service"),
//!         force: false,
//!         context: Default::default(),
//!     },
//!     actor,
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod audit;
pub mod config;
pub mod container;
mod engine;
mod error;
pub mod model;
pub mod policy;
mod request;

pub use access::{AccessMethodHandler, AccessMethodRegistry, WrappedKey};
pub use audit::{
    AuditAction, AuditEvent, AuditSink, MemoryAuditSink, NoopAuditSink, TracingAuditSink,
};
pub use config::EngineConfig;
pub use engine::{DecryptStage, VaultEngine};
pub use error::{VaultError, VaultResult};
pub use model::{
    AccessMethod, AccessMethodType, ArtifactMetadata, ConfigMap, ContentMetadata,
    DecryptionAttempt, EncryptedArtifact, EncryptionPolicy, PolicyType,
};
pub use request::{
    AccessContext, AccessMethodConfig, ArtifactSummary, DecryptionRequest, DecryptionResult,
    EncryptionRequest, EncryptionResult, NamedEntry, PolicyConfig,
};
pub use vaultseal_archive::Cancellation;
pub use vaultseal_crypto::CryptoError;

/// Installs a `tracing` subscriber filtered by `RUST_LOG`, defaulting to `info`.
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .try_init();
}
