//! Shared test utilities for provisor tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Test environment with a target root, a directory of mock installers, and
/// an invocation log that lives outside the root.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Filesystem root being provisioned
    pub root: PathBuf,
    /// Mock installer scripts
    pub bin: PathBuf,
    /// Every mock installer appends its name here when invoked
    pub log: PathBuf,
}

impl TestEnv {
    /// Create a new test environment with temporary directories.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = temp_dir.path();

        let root = base.join("rootfs");
        let bin = base.join("bin");
        let log = base.join("invocations.log");

        fs::create_dir_all(&root).expect("Failed to create root dir");
        fs::create_dir_all(&bin).expect("Failed to create bin dir");

        Self {
            _temp_dir: temp_dir,
            root,
            bin,
            log,
        }
    }

    /// Create a mock installer that logs its name, runs `body`, and exits
    /// with the status of `body`.
    pub fn installer(&self, name: &str, body: &str) -> PathBuf {
        let path = self.bin.join(name);
        let script = format!(
            "#!/bin/sh\necho {name} >> '{log}'\n{body}\n",
            name = name,
            log = self.log.display(),
            body = body
        );
        fs::write(&path, script).expect("Failed to write installer");
        let mut perms = fs::metadata(&path).expect("Failed to stat installer").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("Failed to chmod installer");
        path
    }

    /// Write a manifest file next to the root and return its path.
    pub fn manifest(&self, json: &str) -> PathBuf {
        let path = self._temp_dir.path().join("manifest.json");
        fs::write(&path, json).expect("Failed to write manifest");
        path
    }

    /// Installer names in invocation order.
    pub fn invocations(&self) -> Vec<String> {
        match fs::read_to_string(&self.log) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn profile(&self) -> PathBuf {
        self.root.join(".provisor/environment")
    }
}

/// Standard three-step image manifest: base -> runtime -> app.
///
/// Installers are created in `env.bin`; `runtime_body` lets a test make the
/// runtime step fail.
pub fn image_manifest(env: &TestEnv, runtime_body: &str, idempotent: bool) -> PathBuf {
    let base = env.installer("install-os-packages", "mkdir -p usr/bin && touch usr/bin/os");
    let runtime = env.installer("install-interpreter", runtime_body);
    let app = env.installer("install-app", "mkdir -p opt/app/bin && touch opt/app/bin/app");

    env.manifest(&format!(
        r#"{{
            "steps": [
                {{"id": "base", "command": ["{base}"], "dependsOn": [], "idempotent": {idem}}},
                {{"id": "runtime", "command": ["{runtime}"], "dependsOn": ["base"], "idempotent": {idem}}},
                {{"id": "app", "command": ["{app}"], "dependsOn": ["runtime"], "idempotent": {idem}}}
            ],
            "env": [{{"name": "PATH", "value": "/opt/app/bin:$PATH"}}]
        }}"#,
        base = base.display(),
        runtime = runtime.display(),
        app = app.display(),
        idem = idempotent,
    ))
}

/// Relative path -> content for every file under `root`.
pub fn tree_snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).expect("walk stays under root").to_path_buf();
            let content = fs::read(e.path()).expect("Failed to read file");
            (rel, content)
        })
        .collect()
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

/// Assert that a file contains exactly the expected content.
pub fn assert_file_eq(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read file {}: {}", path.display(), e));
    assert_eq!(content, expected, "Unexpected content in {}", path.display());
}
