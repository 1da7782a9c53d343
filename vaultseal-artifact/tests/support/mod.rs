//! Shared fixtures for artifact integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;
use vaultseal_artifact::{
    AccessMethodConfig, DecryptionRequest, EncryptionRequest, EncryptionResult, EngineConfig,
    MemoryAuditSink, PolicyConfig, VaultEngine,
};

/// Scratch workspace holding a source tree, an artifact path and an output path.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    /// `a.txt` = "hello", `b/c.txt` = "world".
    pub fn with_sample_tree() -> Self {
        let ws = Self::new();
        let src = ws.source();
        fs::create_dir_all(src.join("b")).unwrap();
        fs::write(src.join("a.txt"), "hello").unwrap();
        fs::write(src.join("b/c.txt"), "world").unwrap();
        ws
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn source(&self) -> PathBuf {
        self.dir.path().join("src")
    }

    pub fn artifact(&self) -> PathBuf {
        self.dir.path().join("bundle.vsa")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn read_output(&self, relative: &str) -> String {
        fs::read_to_string(self.output().join(relative)).unwrap()
    }

    /// Names of every entry left in the workspace root.
    pub fn root_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub fn encryption_request(&self, methods: Vec<AccessMethodConfig>) -> EncryptionRequest {
        EncryptionRequest {
            source_path: self.source(),
            output_path: self.artifact(),
            access_methods: methods,
            policies: Vec::new(),
            description: "test artifact".into(),
            compression: false,
        }
    }

    pub fn decryption_request(&self, method: AccessMethodConfig) -> DecryptionRequest {
        DecryptionRequest {
            artifact_path: self.artifact(),
            output_path: self.output(),
            access_method: method,
            force: false,
            context: Default::default(),
        }
    }
}

pub fn engine() -> (VaultEngine, Arc<MemoryAuditSink>) {
    engine_with(EngineConfig::testing())
}

pub fn engine_with(config: EngineConfig) -> (VaultEngine, Arc<MemoryAuditSink>) {
    vaultseal_artifact::init_logging();
    let sink = Arc::new(MemoryAuditSink::new());
    let engine = VaultEngine::new(config, sink.clone()).expect("engine");
    (engine, sink)
}

pub fn actor() -> Uuid {
    Uuid::new_v4()
}

/// Encrypts the workspace's sample tree with `methods` and `policies`.
pub fn seal(
    engine: &VaultEngine,
    ws: &Workspace,
    methods: Vec<AccessMethodConfig>,
    policies: Vec<PolicyConfig>,
) -> EncryptionResult {
    let mut request = ws.encryption_request(methods);
    request.policies = policies;
    engine.encrypt(&request, actor()).expect("encrypt")
}
