mod support;

use base64::{engine::general_purpose::STANDARD, Engine};
use pretty_assertions::assert_eq;
use std::fs;
use support::{actor, engine, engine_with, seal, Workspace};
use vaultseal_artifact::container;
use vaultseal_artifact::{
    AccessMethodConfig, AccessMethodType, CryptoError, EngineConfig, VaultError,
};
use vaultseal_crypto::generate_certificate_keypair;

fn b64(bytes: [u8; 32]) -> String {
    STANDARD.encode(bytes)
}

// ── Certificate ──────────────────────────────────────────────────

#[test]
fn certificate_round_trip() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    let recipient = generate_certificate_keypair();
    seal(
        &engine,
        &ws,
        vec![AccessMethodConfig::certificate(
            "ops",
            "public_key",
            b64(recipient.public_bytes()),
        )],
        vec![],
    );

    let request = ws.decryption_request(AccessMethodConfig::certificate(
        "",
        "private_key",
        b64(recipient.secret_bytes()),
    ));
    let opened = engine.decrypt(&request, actor()).unwrap();
    assert_eq!(opened.method_type, AccessMethodType::Certificate);
    assert_eq!(ws.read_output("b/c.txt"), "world");
}

#[test]
fn certificate_record_carries_key_id() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    let recipient = generate_certificate_keypair();
    seal(
        &engine,
        &ws,
        vec![AccessMethodConfig::certificate(
            "ops",
            "public_key",
            b64(recipient.public_bytes()),
        )],
        vec![],
    );

    let loaded = container::load(&fs::read(ws.artifact()).unwrap()).unwrap();
    let record = &loaded.artifact.access_methods[0];
    assert_eq!(record.key_id.as_deref(), Some(recipient.key_id().as_str()));
    assert!(!record.config.contains_key("private_key"));
}

#[test]
fn certificate_with_wrong_private_key_is_invalid_key() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    let recipient = generate_certificate_keypair();
    let stranger = generate_certificate_keypair();
    seal(
        &engine,
        &ws,
        vec![AccessMethodConfig::certificate(
            "ops",
            "public_key",
            b64(recipient.public_bytes()),
        )],
        vec![],
    );

    let request = ws.decryption_request(AccessMethodConfig::certificate(
        "",
        "private_key",
        b64(stranger.secret_bytes()),
    ));
    let err = engine.decrypt(&request, actor()).unwrap_err();
    assert!(matches!(err, VaultError::Crypto(CryptoError::InvalidKey(_))));
}

#[test]
fn certificate_unlock_without_private_key_is_invalid_request() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    let recipient = generate_certificate_keypair();
    seal(
        &engine,
        &ws,
        vec![AccessMethodConfig::certificate(
            "ops",
            "public_key",
            b64(recipient.public_bytes()),
        )],
        vec![],
    );

    let request = ws.decryption_request(AccessMethodConfig::new("certificate", ""));
    let err = engine.decrypt(&request, actor()).unwrap_err();
    assert!(matches!(err, VaultError::InvalidRequest(_)));
}

#[test]
fn each_certificate_recipient_unlocks_independently() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    let alice = generate_certificate_keypair();
    let bob = generate_certificate_keypair();
    seal(
        &engine,
        &ws,
        vec![
            AccessMethodConfig::certificate("alice", "public_key", b64(alice.public_bytes())),
            AccessMethodConfig::certificate("bob", "public_key", b64(bob.public_bytes())),
        ],
        vec![],
    );

    for recipient in [&bob, &alice] {
        let mut request = ws.decryption_request(AccessMethodConfig::certificate(
            "",
            "private_key",
            b64(recipient.secret_bytes()),
        ));
        request.force = true;
        engine.decrypt(&request, actor()).unwrap();
        assert_eq!(ws.read_output("a.txt"), "hello");
    }
}

#[test]
fn named_certificate_request_only_tries_that_record() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    let alice = generate_certificate_keypair();
    let bob = generate_certificate_keypair();
    seal(
        &engine,
        &ws,
        vec![
            AccessMethodConfig::certificate("alice", "public_key", b64(alice.public_bytes())),
            AccessMethodConfig::certificate("bob", "public_key", b64(bob.public_bytes())),
        ],
        vec![],
    );

    let wrong = ws.decryption_request(AccessMethodConfig::certificate(
        "alice",
        "private_key",
        b64(bob.secret_bytes()),
    ));
    let err = engine.decrypt(&wrong, actor()).unwrap_err();
    assert!(matches!(err, VaultError::Crypto(CryptoError::InvalidKey(_))));

    let unknown = ws.decryption_request(AccessMethodConfig::certificate(
        "carol",
        "private_key",
        b64(bob.secret_bytes()),
    ));
    let err = engine.decrypt(&unknown, actor()).unwrap_err();
    assert!(matches!(err, VaultError::AccessMethodNotFound(ref t) if t == "certificate"));

    let right = ws.decryption_request(AccessMethodConfig::certificate(
        "bob",
        "private_key",
        b64(bob.secret_bytes()),
    ));
    engine.decrypt(&right, actor()).unwrap();
}

// ── Passphrase ───────────────────────────────────────────────────

#[test]
fn second_passphrase_record_unlocks() {
    let (engine, sink) = engine();
    let ws = Workspace::with_sample_tree();
    seal(
        &engine,
        &ws,
        vec![
            AccessMethodConfig::passphrase("alice", "alice-pw"),
            AccessMethodConfig::passphrase("bob", "bob-pw"),
        ],
        vec![],
    );

    let request = ws.decryption_request(AccessMethodConfig::passphrase("", "bob-pw"));
    engine.decrypt(&request, actor()).unwrap();
    assert_eq!(ws.read_output("b/c.txt"), "world");

    let mut named = ws.decryption_request(AccessMethodConfig::passphrase("bob", "bob-pw"));
    named.force = true;
    engine.decrypt(&named, actor()).unwrap();
    assert!(sink.attempts().iter().all(|a| a.success));
}

#[test]
fn passphrase_matching_no_record_reports_authentication_failure() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    seal(
        &engine,
        &ws,
        vec![
            AccessMethodConfig::passphrase("alice", "alice-pw"),
            AccessMethodConfig::passphrase("bob", "bob-pw"),
        ],
        vec![],
    );

    let request = ws.decryption_request(AccessMethodConfig::passphrase("", "mallory-pw"));
    let err = engine.decrypt(&request, actor()).unwrap_err();
    assert!(matches!(err, VaultError::Crypto(ref e) if e.is_authentication_failure()));
    assert!(!ws.output().exists());
}

#[test]
fn weak_passphrase_iterations_need_opt_in() {
    let (strict, _) = engine_with(EngineConfig {
        kdf_iterations: 100_000,
        passphrase_iterations: 100_000,
        allow_weak_kdf: false,
        ..EngineConfig::testing()
    });
    let ws = Workspace::with_sample_tree();
    let weak = vec![AccessMethodConfig::passphrase("pw", "s3cret").with("iterations", 1)];

    let err = strict
        .encrypt(&ws.encryption_request(weak.clone()), actor())
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidRequest(ref m) if m.contains("iterations")));
    assert!(!ws.artifact().exists());

    let (relaxed, _) = engine();
    seal(&relaxed, &ws, weak, vec![]);
    relaxed
        .decrypt(
            &ws.decryption_request(AccessMethodConfig::passphrase("", "s3cret")),
            actor(),
        )
        .unwrap();
}

#[test]
fn passphrase_record_stores_salt_and_iterations_only() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    seal(
        &engine,
        &ws,
        vec![AccessMethodConfig::passphrase("pw", "s3cret").with("iterations", 2_000)],
        vec![],
    );

    let loaded = container::load(&fs::read(ws.artifact()).unwrap()).unwrap();
    let config = &loaded.artifact.access_methods[0].config;
    assert!(!config.contains_key("passphrase"));
    assert_eq!(config["iterations"], 2_000);
    let salt = STANDARD.decode(config["salt"].as_str().unwrap()).unwrap();
    assert_eq!(salt.len(), vaultseal_crypto::SALT_SIZE);
}

#[test]
fn password_alias_is_accepted() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    seal(
        &engine,
        &ws,
        vec![AccessMethodConfig::new("passphrase", "pw").with("password", "s3cret")],
        vec![],
    );

    let request =
        ws.decryption_request(AccessMethodConfig::new("passphrase", "").with("password", "s3cret"));
    engine.decrypt(&request, actor()).unwrap();
}

#[test]
fn passphrase_without_secret_is_rejected_at_encrypt() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    let err = engine
        .encrypt(
            &ws.encryption_request(vec![AccessMethodConfig::new("passphrase", "pw")]),
            actor(),
        )
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidRequest(_)));
}

#[test]
fn two_passphrase_records_use_distinct_salts() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    seal(
        &engine,
        &ws,
        vec![
            AccessMethodConfig::passphrase("alice", "same"),
            AccessMethodConfig::passphrase("bob", "same"),
        ],
        vec![],
    );

    let loaded = container::load(&fs::read(ws.artifact()).unwrap()).unwrap();
    let methods = &loaded.artifact.access_methods;
    assert_ne!(methods[0].config["salt"], methods[1].config["salt"]);
    assert_ne!(methods[0].encrypted_key, methods[1].encrypted_key);
}

// ── Policy Method ────────────────────────────────────────────────

#[test]
fn policy_method_unlocks_through_runtime() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    seal(
        &engine,
        &ws,
        vec![
            AccessMethodConfig::policy("gate"),
            AccessMethodConfig::runtime("svc"),
        ],
        vec![],
    );

    let opened = engine
        .decrypt(&ws.decryption_request(AccessMethodConfig::policy("")), actor())
        .unwrap();
    assert_eq!(opened.method_type, AccessMethodType::Policy);
    assert_eq!(ws.read_output("a.txt"), "hello");
}

#[test]
fn policy_method_unlocks_through_passphrase() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    seal(
        &engine,
        &ws,
        vec![
            AccessMethodConfig::policy("gate"),
            AccessMethodConfig::passphrase("pw", "s3cret"),
        ],
        vec![],
    );

    let without = ws.decryption_request(AccessMethodConfig::policy(""));
    let err = engine.decrypt(&without, actor()).unwrap_err();
    assert!(matches!(err, VaultError::InvalidRequest(ref m) if m.contains("passphrase required")));

    let with = ws.decryption_request(AccessMethodConfig::policy("").with("passphrase", "s3cret"));
    engine.decrypt(&with, actor()).unwrap();
}

#[test]
fn policy_method_alone_is_rejected() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    let err = engine
        .encrypt(
            &ws.encryption_request(vec![AccessMethodConfig::policy("gate")]),
            actor(),
        )
        .unwrap_err();
    assert!(matches!(err, VaultError::InvalidRequest(_)));
    assert!(!ws.artifact().exists());
}

// ── Inactive Records ─────────────────────────────────────────────

#[test]
fn inactive_method_is_not_found() {
    let (engine, _) = engine();
    let ws = Workspace::with_sample_tree();
    seal(
        &engine,
        &ws,
        vec![
            AccessMethodConfig::runtime("svc"),
            AccessMethodConfig::passphrase("pw", "s3cret"),
        ],
        vec![],
    );

    let mut loaded = container::load(&fs::read(ws.artifact()).unwrap()).unwrap();
    loaded.artifact.access_methods[0].is_active = false;
    let rebuilt = container::assemble(
        &loaded.encrypted_content,
        &loaded.artifact.metadata,
        &loaded.artifact.access_methods,
        &loaded.artifact.policies,
    )
    .unwrap();
    fs::write(ws.artifact(), rebuilt).unwrap();

    let err = engine
        .decrypt(&ws.decryption_request(AccessMethodConfig::runtime("")), actor())
        .unwrap_err();
    assert!(matches!(err, VaultError::AccessMethodNotFound(ref t) if t == "runtime"));

    engine
        .decrypt(
            &ws.decryption_request(AccessMethodConfig::passphrase("", "s3cret")),
            actor(),
        )
        .unwrap();
}
