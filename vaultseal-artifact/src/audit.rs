//! Audit trail for encrypt and decrypt outcomes.
//!
//! The engine reports one [`AuditEvent`] per operation outcome, plus one
//! [`DecryptionAttempt`] per decrypt call. Sinks never fail the operation
//! that reports to them.

use crate::model::DecryptionAttempt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Resource type recorded on artifact events.
pub const RESOURCE_ARTIFACT: &str = "encrypted_artifact";

/// Default cap on entries kept by [`MemoryAuditSink`].
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ArtifactEncrypted,
    ArtifactEncryptFailed,
    ArtifactDecrypted,
    ArtifactDecryptFailed,
    PolicyViolation,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditAction::ArtifactEncrypted => write!(f, "artifact_encrypted"),
            AuditAction::ArtifactEncryptFailed => write!(f, "artifact_encrypt_failed"),
            AuditAction::ArtifactDecrypted => write!(f, "artifact_decrypted"),
            AuditAction::ArtifactDecryptFailed => write!(f, "artifact_decrypt_failed"),
            AuditAction::PolicyViolation => write!(f, "policy_violation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor_id: Uuid,
    pub action: AuditAction,
    pub resource_type: String,
    /// `None` when the artifact could not be identified.
    pub resource_id: Option<Uuid>,
    pub success: bool,
    pub metadata: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn artifact(
        actor_id: Uuid,
        action: AuditAction,
        artifact_id: Option<Uuid>,
        success: bool,
        metadata: impl Into<String>,
    ) -> Self {
        Self {
            actor_id,
            action,
            resource_type: RESOURCE_ARTIFACT.to_string(),
            resource_id: artifact_id,
            success,
            metadata: metadata.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Receives audit records. Implementations must be cheap and infallible
/// from the caller's point of view.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);

    fn record_attempt(&self, _attempt: &DecryptionAttempt) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

/// Emits records as structured `tracing` events on the `vaultseal::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        let resource_id = event.resource_id.map(|id| id.to_string()).unwrap_or_default();
        if event.success {
            tracing::info!(
                target: "vaultseal::audit",
                actor = %event.actor_id,
                action = %event.action,
                resource_type = %event.resource_type,
                resource_id = %resource_id,
                metadata = %event.metadata,
                "audit"
            );
        } else {
            tracing::warn!(
                target: "vaultseal::audit",
                actor = %event.actor_id,
                action = %event.action,
                resource_type = %event.resource_type,
                resource_id = %resource_id,
                metadata = %event.metadata,
                "audit"
            );
        }
    }

    fn record_attempt(&self, attempt: &DecryptionAttempt) {
        tracing::info!(
            target: "vaultseal::audit",
            actor = %attempt.actor_id,
            method = %attempt.method_type,
            success = attempt.success,
            reason = attempt.reason.as_deref().unwrap_or(""),
            origin_ip = attempt.origin_ip.as_deref().unwrap_or(""),
            "decryption attempt"
        );
    }
}

/// Keeps the most recent records in memory.
#[derive(Debug)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    attempts: Mutex<Vec<DecryptionAttempt>>,
    max_entries: usize,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            max_entries,
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        lock(&self.events).clone()
    }

    pub fn attempts(&self) -> Vec<DecryptionAttempt> {
        lock(&self.attempts).clone()
    }

    pub fn events_for(&self, action: AuditAction) -> Vec<AuditEvent> {
        lock(&self.events)
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
        lock(&self.attempts).clear();
    }

    fn push<T>(&self, log: &Mutex<Vec<T>>, entry: T) {
        let mut log = lock(log);
        log.push(entry);

        if log.len() > self.max_entries {
            let drain_count = log.len() - self.max_entries;
            log.drain(..drain_count);
        }
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.push(&self.events, event.clone());
    }

    fn record_attempt(&self, attempt: &DecryptionAttempt) {
        self.push(&self.attempts, attempt.clone());
    }
}

// A poisoned log still holds valid entries.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
