//! Encrypt and decrypt orchestration.
//!
//! Encryption packs the source, seals it under a fresh data key, wraps that
//! key once per requested access method and writes the container atomically.
//! Decryption loads the container, recovers the data key through exactly one
//! access method, checks every policy and only then decrypts and unpacks.
//! Every outcome is reported to the audit sink.

use crate::access::AccessMethodRegistry;
use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::config::EngineConfig;
use crate::container::{self, LoadedArtifact, FORMAT_VERSION};
use crate::error::{VaultError, VaultResult};
use crate::model::{ArtifactMetadata, ContentMetadata, DecryptionAttempt};
use crate::policy;
use crate::request::{
    ArtifactSummary, DecryptionRequest, DecryptionResult, EncryptionRequest, EncryptionResult,
    NamedEntry,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vaultseal_archive::{Cancellation, UnpackSummary};
use vaultseal_crypto::{decrypt, derive_key, encrypt, CryptoError, DataKey, Salt, ALGORITHM};

/// Pipeline stage a decrypt failure happened in, as reported to the audit sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptStage {
    PrepareOutput,
    LoadArtifact,
    FindAccessMethod,
    UnwrapKey,
    ValidatePolicies,
    DecryptContent,
    ExtractContent,
}

impl fmt::Display for DecryptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecryptStage::PrepareOutput => write!(f, "prepare_output"),
            DecryptStage::LoadArtifact => write!(f, "load_artifact"),
            DecryptStage::FindAccessMethod => write!(f, "find_access_method"),
            DecryptStage::UnwrapKey => write!(f, "unwrap_key"),
            DecryptStage::ValidatePolicies => write!(f, "validate_policies"),
            DecryptStage::DecryptContent => write!(f, "decrypt_content"),
            DecryptStage::ExtractContent => write!(f, "extract_content"),
        }
    }
}

struct DecryptFailure {
    stage: DecryptStage,
    artifact_id: Option<Uuid>,
    error: VaultError,
}

trait AtStage<T> {
    fn at(self, stage: DecryptStage, artifact_id: Option<Uuid>) -> Result<T, DecryptFailure>;
}

impl<T, E: Into<VaultError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: DecryptStage, artifact_id: Option<Uuid>) -> Result<T, DecryptFailure> {
        self.map_err(|e| DecryptFailure {
            stage,
            artifact_id,
            error: e.into(),
        })
    }
}

/// Creates and opens encrypted artifacts.
pub struct VaultEngine {
    config: EngineConfig,
    registry: AccessMethodRegistry,
    audit: Arc<dyn AuditSink>,
}

impl VaultEngine {
    /// Validates `config` and derives the runtime wrapping key once.
    pub fn new(config: EngineConfig, audit: Arc<dyn AuditSink>) -> VaultResult<Self> {
        config.validate()?;
        let master = derive_key(
            &config.master_key,
            &Salt::from_bytes(config.kdf_salt.as_bytes()),
            &config.runtime_kdf(),
        )?;
        let registry = AccessMethodRegistry::with_defaults(
            Arc::new(master),
            config.passphrase_kdf(),
            config.allow_weak_kdf,
        );

        info!(
            kdf_iterations = config.kdf_iterations,
            passphrase_iterations = config.passphrase_iterations,
            "artifact engine initialized"
        );
        Ok(Self {
            config,
            registry,
            audit,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &AccessMethodRegistry {
        &self.registry
    }

    // ── Encrypt ──────────────────────────────────────────────────

    pub fn encrypt(
        &self,
        request: &EncryptionRequest,
        actor_id: Uuid,
    ) -> VaultResult<EncryptionResult> {
        self.encrypt_with(request, actor_id, &Cancellation::new())
    }

    pub fn encrypt_with(
        &self,
        request: &EncryptionRequest,
        actor_id: Uuid,
        cancel: &Cancellation,
    ) -> VaultResult<EncryptionResult> {
        let cancel = cancel.clone().or_timeout(self.config.operation_timeout());

        match self.seal(request, actor_id, &cancel) {
            Ok(result) => {
                info!(
                    artifact_id = %result.artifact_id,
                    path = %result.file_path.display(),
                    size = result.encrypted_size,
                    "artifact encrypted"
                );
                self.audit.record(&AuditEvent::artifact(
                    actor_id,
                    AuditAction::ArtifactEncrypted,
                    Some(result.artifact_id),
                    true,
                    format!(
                        "Source: {}, Methods: {}, Policies: {}",
                        request.source_path.display(),
                        result.access_methods.join(","),
                        result.policies.join(",")
                    ),
                ));
                Ok(result)
            }
            Err(err) => {
                warn!(source = %request.source_path.display(), error = %err, "encryption failed");
                self.audit.record(&AuditEvent::artifact(
                    actor_id,
                    AuditAction::ArtifactEncryptFailed,
                    None,
                    false,
                    format!("Source: {}, Reason: {err}", request.source_path.display()),
                ));
                Err(err)
            }
        }
    }

    fn seal(
        &self,
        request: &EncryptionRequest,
        actor_id: Uuid,
        cancel: &Cancellation,
    ) -> VaultResult<EncryptionResult> {
        self.registry.validate_request(&request.access_methods)?;

        let source = fs::canonicalize(&request.source_path)
            .map_err(VaultError::io(request.source_path.display()))?;
        let original_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());

        let artifact_id = Uuid::new_v4();
        let created_at = Utc::now();
        let policies = request
            .policies
            .iter()
            .map(|p| policy::create_policy(artifact_id, p, created_at))
            .collect::<VaultResult<Vec<_>>>()?;

        let archive = vaultseal_archive::pack(&source, request.compression, cancel)?;
        cancel.check()?;

        let data_key = DataKey::generate();
        let encrypted_content = encrypt(&data_key, &archive)?;
        let access_methods = request
            .access_methods
            .iter()
            .map(|c| {
                self.registry
                    .create_access_method(artifact_id, c, &data_key, created_at)
            })
            .collect::<VaultResult<Vec<_>>>()?;

        let metadata = ArtifactMetadata {
            id: artifact_id,
            owner_id: actor_id,
            name: original_name.clone(),
            description: request.description.clone(),
            file_path: request.output_path.clone(),
            algorithm: ALGORITHM.to_string(),
            version: FORMAT_VERSION,
            data_key_hash: data_key_hash(&data_key),
            content_size: archive.len() as u64,
            content: ContentMetadata {
                original_name,
                original_path: source,
                compressed: request.compression,
                checksum: hex::encode(Sha256::digest(&archive)),
            },
            created_at,
            updated_at: created_at,
        };

        let bytes =
            container::assemble(&encrypted_content, &metadata, &access_methods, &policies)?;
        cancel.check()?;
        write_atomically(&request.output_path, &bytes)?;

        Ok(EncryptionResult {
            artifact_id,
            file_path: request.output_path.clone(),
            original_size: metadata.content_size,
            encrypted_size: bytes.len() as u64,
            algorithm: metadata.algorithm,
            access_methods: access_methods.iter().map(|m| m.name.clone()).collect(),
            policies: policies.iter().map(|p| p.name.clone()).collect(),
            created_at,
        })
    }

    // ── Decrypt ──────────────────────────────────────────────────

    pub fn decrypt(
        &self,
        request: &DecryptionRequest,
        actor_id: Uuid,
    ) -> VaultResult<DecryptionResult> {
        self.decrypt_with(request, actor_id, &Cancellation::new())
    }

    pub fn decrypt_with(
        &self,
        request: &DecryptionRequest,
        actor_id: Uuid,
        cancel: &Cancellation,
    ) -> VaultResult<DecryptionResult> {
        let cancel = cancel.clone().or_timeout(self.config.operation_timeout());
        let requested = request.access_method.method_type.trim().to_string();
        let outcome = self.open(request, &cancel);

        let (artifact_id, reason) = match &outcome {
            Ok(result) => (Some(result.artifact_id), None),
            Err(failure) => (failure.artifact_id, Some(failure.error.to_string())),
        };
        self.audit.record_attempt(&DecryptionAttempt {
            id: Uuid::new_v4(),
            artifact_id,
            actor_id,
            method_type: requested.clone(),
            success: outcome.is_ok(),
            reason,
            origin_ip: request.context.origin_ip.clone(),
            user_agent: request.context.user_agent.clone(),
            created_at: Utc::now(),
        });

        match outcome {
            Ok(result) => {
                info!(
                    artifact_id = %result.artifact_id,
                    method = %result.method_type,
                    output = %result.file_path.display(),
                    "artifact decrypted"
                );
                self.audit.record(&AuditEvent::artifact(
                    actor_id,
                    AuditAction::ArtifactDecrypted,
                    Some(result.artifact_id),
                    true,
                    format!(
                        "Method: {requested}, Output: {}",
                        result.file_path.display()
                    ),
                ));
                Ok(result)
            }
            Err(failure) => {
                warn!(
                    artifact = %request.artifact_path.display(),
                    method = %requested,
                    stage = %failure.stage,
                    error = %failure.error,
                    "decryption failed"
                );
                if let VaultError::PolicyViolation {
                    policy,
                    kind,
                    reason,
                } = &failure.error
                {
                    self.audit.record(&AuditEvent::artifact(
                        actor_id,
                        AuditAction::PolicyViolation,
                        failure.artifact_id,
                        false,
                        format!("Policy: {policy}, Type: {kind}, Reason: {reason}"),
                    ));
                }
                self.audit.record(&AuditEvent::artifact(
                    actor_id,
                    AuditAction::ArtifactDecryptFailed,
                    failure.artifact_id,
                    false,
                    format!(
                        "Method: {requested}, Stage: {}, Reason: {}",
                        failure.stage, failure.error
                    ),
                ));
                Err(failure.error)
            }
        }
    }

    fn open(
        &self,
        request: &DecryptionRequest,
        cancel: &Cancellation,
    ) -> Result<DecryptionResult, DecryptFailure> {
        use DecryptStage::*;

        check_output(&request.output_path, request.force).at(PrepareOutput, None)?;

        let loaded = read_artifact(&request.artifact_path).at(LoadArtifact, None)?;
        let artifact = &loaded.artifact;
        let id = Some(artifact.id());
        if artifact.metadata.algorithm != ALGORITHM {
            return Err(VaultError::ArtifactFormat(format!(
                "unsupported algorithm {}",
                artifact.metadata.algorithm
            )))
            .at(LoadArtifact, id);
        }
        cancel.check().at(LoadArtifact, id)?;

        let method_type = self
            .registry
            .resolve_type(&request.access_method.method_type)
            .at(FindAccessMethod, id)?;
        let candidates = self
            .registry
            .candidates(&artifact.access_methods, &request.access_method)
            .at(FindAccessMethod, id)?;

        let (record, data_key) = self
            .registry
            .unlock(&candidates, &request.access_method.config, |key| {
                verify_data_key(key, &artifact.metadata.data_key_hash)
            })
            .at(UnwrapKey, id)?;
        debug!(
            artifact_id = %artifact.id(),
            method = %method_type,
            record = %record.id,
            "access method unlocked"
        );

        policy::validate(
            &artifact.policies,
            artifact.metadata.created_at,
            &request.context,
        )
        .at(ValidatePolicies, id)?;
        cancel.check().at(ValidatePolicies, id)?;

        let archive = decrypt(&data_key, &loaded.encrypted_content).at(DecryptContent, id)?;
        if hex::encode(Sha256::digest(&archive)) != artifact.metadata.content.checksum {
            return Err(CryptoError::Decryption("content checksum mismatch".into()))
                .at(DecryptContent, id);
        }
        cancel.check().at(DecryptContent, id)?;

        let compressed = artifact.metadata.content.compressed;
        let summary =
            extract(&archive, &request.output_path, compressed, cancel).at(ExtractContent, id)?;
        debug!(
            artifact_id = %artifact.id(),
            files = summary.files,
            directories = summary.directories,
            "content extracted"
        );

        Ok(DecryptionResult {
            artifact_id: artifact.id(),
            file_path: request.output_path.clone(),
            original_size: artifact.metadata.content_size,
            decrypted_size: archive.len() as u64,
            method_type,
            success: true,
            reason: None,
            created_at: Utc::now(),
        })
    }

    // ── Inspect ──────────────────────────────────────────────────

    /// Reads an artifact's public metadata without any key.
    pub fn inspect(&self, path: &Path) -> VaultResult<ArtifactSummary> {
        let bytes = fs::read(path).map_err(VaultError::io(path.display()))?;
        let loaded = container::load(&bytes)?;
        let artifact = &loaded.artifact;

        Ok(ArtifactSummary {
            artifact_id: artifact.id(),
            owner_id: artifact.metadata.owner_id,
            name: artifact.metadata.name.clone(),
            description: artifact.metadata.description.clone(),
            algorithm: artifact.metadata.algorithm.clone(),
            version: loaded.header.version,
            content_size: artifact.metadata.content_size,
            encrypted_size: bytes.len() as u64,
            compressed: loaded.header.compressed,
            access_methods: artifact
                .access_methods
                .iter()
                .map(|m| NamedEntry {
                    name: m.name.clone(),
                    kind: m.method_type,
                    is_active: m.is_active,
                })
                .collect(),
            policies: artifact
                .policies
                .iter()
                .map(|p| NamedEntry {
                    name: p.name.clone(),
                    kind: p.policy_type,
                    is_active: p.is_active,
                })
                .collect(),
            created_at: artifact.metadata.created_at,
        })
    }
}

fn data_key_hash(key: &DataKey) -> String {
    STANDARD.encode(key.digest())
}

fn verify_data_key(key: &DataKey, expected: &str) -> VaultResult<()> {
    if data_key_hash(key) != expected {
        return Err(CryptoError::Decryption("data key verification failed".into()).into());
    }
    Ok(())
}

fn read_artifact(path: &Path) -> VaultResult<LoadedArtifact> {
    let bytes = fs::read(path).map_err(VaultError::io(path.display()))?;
    container::load(&bytes)
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Writes `bytes` to a temporary file beside `path`, then renames it into place.
fn write_atomically(path: &Path, bytes: &[u8]) -> VaultResult<()> {
    let dir = parent_dir(path);
    let mut file = tempfile::Builder::new()
        .prefix(".vaultseal-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(VaultError::io(dir.display()))?;
    file.write_all(bytes)
        .and_then(|()| file.as_file().sync_all())
        .map_err(VaultError::io(file.path().display()))?;
    file.persist(path)
        .map_err(|e| VaultError::Io(format!("{}: {}", path.display(), e.error)))?;
    Ok(())
}

/// Refuses to write into an existing file or non-empty directory unless forced.
fn check_output(output: &Path, force: bool) -> VaultResult<()> {
    if force {
        return Ok(());
    }
    match fs::symlink_metadata(output) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VaultError::io(output.display())(e)),
        Ok(meta) if meta.is_dir() => {
            let mut entries = fs::read_dir(output).map_err(VaultError::io(output.display()))?;
            if entries.next().is_none() {
                Ok(())
            } else {
                Err(VaultError::OutputExists(output.to_path_buf()))
            }
        }
        Ok(_) => Err(VaultError::OutputExists(output.to_path_buf())),
    }
}

/// Unpacks into a staging directory beside `output`, then moves the result
/// into place. The staging directory is removed on every exit path.
fn extract(
    archive: &[u8],
    output: &Path,
    compressed: bool,
    cancel: &Cancellation,
) -> VaultResult<UnpackSummary> {
    let parent = parent_dir(output);
    fs::create_dir_all(parent).map_err(VaultError::io(parent.display()))?;
    let staging = tempfile::Builder::new()
        .prefix(".vaultseal-")
        .tempdir_in(parent)
        .map_err(VaultError::io(parent.display()))?;

    let summary = vaultseal_archive::unpack(archive, staging.path(), compressed, cancel)?;
    cancel.check()?;
    open_permissions(staging.path())?;
    place(staging.path(), output)?;
    Ok(summary)
}

fn place(staged: &Path, output: &Path) -> VaultResult<()> {
    match fs::symlink_metadata(output) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::rename(staged, output),
        Err(e) => Err(e),
        Ok(meta) if meta.is_dir() => return merge_into(staged, output),
        Ok(_) => fs::remove_file(output).and_then(|()| fs::rename(staged, output)),
    }
    .map_err(VaultError::io(output.display()))
}

/// Moves every entry of `from` into `to`, replacing what is already there.
fn merge_into(from: &Path, to: &Path) -> VaultResult<()> {
    for entry in fs::read_dir(from).map_err(VaultError::io(from.display()))? {
        let entry = entry.map_err(VaultError::io(from.display()))?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        let is_dir = entry
            .file_type()
            .map_err(VaultError::io(source.display()))?
            .is_dir();

        match fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_dir() && is_dir => {
                merge_into(&source, &target)?;
                continue;
            }
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target),
            Ok(_) => fs::remove_file(&target),
            Err(_) => Ok(()),
        }
        .map_err(VaultError::io(target.display()))?;

        fs::rename(&source, &target).map_err(VaultError::io(target.display()))?;
    }
    Ok(())
}

// Staging directories are created 0700.
#[cfg(unix)]
fn open_permissions(dir: &Path) -> VaultResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o755))
        .map_err(VaultError::io(dir.display()))
}

#[cfg(not(unix))]
fn open_permissions(_dir: &Path) -> VaultResult<()> {
    Ok(())
}
