use std::path::PathBuf;
use vaultseal_archive::ArchiveError;
use vaultseal_artifact::{CryptoError, PolicyType, VaultError};

#[test]
fn io_display() {
    let err = VaultError::Io("disk full".into());
    assert_eq!(err.to_string(), "I/O error: disk full");
}

#[test]
fn crypto_display() {
    let err = VaultError::from(CryptoError::Decryption("authentication failed".into()));
    assert_eq!(err.to_string(), "crypto error: decryption failed: authentication failed");
}

#[test]
fn not_found_display() {
    let err = VaultError::AccessMethodNotFound("passphrase".into());
    assert_eq!(err.to_string(), "no active access method of type passphrase");
}

#[test]
fn unsupported_display() {
    let err = VaultError::UnsupportedMethodType("retina".into());
    assert_eq!(err.to_string(), "unsupported access method type: retina");
}

#[test]
fn policy_violation_display() {
    let err = VaultError::PolicyViolation {
        policy: "day".into(),
        kind: PolicyType::Ttl,
        reason: "artifact expired".into(),
    };
    assert_eq!(err.to_string(), "policy violation (TTL) day: artifact expired");
}

#[test]
fn output_exists_display() {
    let err = VaultError::OutputExists(PathBuf::from("/tmp/out"));
    assert_eq!(err.to_string(), "output already exists: /tmp/out");
}

#[test]
fn archive_cancellation_maps_through() {
    assert!(matches!(
        VaultError::from(ArchiveError::Cancelled),
        VaultError::Cancelled
    ));
    assert!(matches!(
        VaultError::from(ArchiveError::DeadlineExceeded),
        VaultError::DeadlineExceeded
    ));
}

#[test]
fn archive_path_errors_become_io() {
    let err = VaultError::from(ArchiveError::UnsafePath("../evil".into()));
    assert_eq!(
        err.to_string(),
        "I/O error: unsafe entry path in archive: ../evil"
    );
}
