//! Step manifest: the declarative input of a provisioning run.
//!
//! ```json
//! {
//!   "steps": [
//!     {"id": "base", "command": "apt-get install -y build-essential"},
//!     {"id": "conda", "command": ["bash", "/tmp/miniconda.sh", "-b"],
//!      "dependsOn": ["base"], "idempotent": false, "timeout": 900}
//!   ],
//!   "env": [{"name": "PATH", "value": "/opt/conda/bin:$PATH"}]
//! }
//! ```
//!
//! Parsing checks the shape of each record. Relationships between steps
//! (duplicate ids, dangling references, cycles) are checked by
//! [`crate::graph::DependencyGraph::build`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::common::paths::{DEFAULT_PROFILE, STATE_DIR};
use crate::error::ProvisionError;

/// An opaque installer invocation.
///
/// A plain string runs through the configured shell; a list runs directly
/// with the first element as the program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    Shell(String),
    Argv(Vec<String>),
}

impl Command {
    /// Program looked up on PATH, for argv commands only.
    pub fn program(&self) -> Option<&str> {
        match self {
            Self::Shell(_) => None,
            Self::Argv(argv) => argv.first().map(String::as_str),
        }
    }

    /// SHA256 of the invocation, recorded in success markers.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        match self {
            Self::Shell(line) => {
                hasher.update(b"shell\0");
                hasher.update(line.as_bytes());
            }
            Self::Argv(argv) => {
                hasher.update(b"argv\0");
                for arg in argv {
                    hasher.update(arg.as_bytes());
                    hasher.update(b"\0");
                }
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(line) => f.write_str(line),
            Self::Argv(argv) => f.write_str(&argv.join(" ")),
        }
    }
}

/// A single unit of provisioning work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Step {
    pub id: String,
    pub command: Command,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Safe to re-run on every apply. Steps with `false` are tracked by a
    /// success marker and skipped once it exists.
    #[serde(default = "default_idempotent")]
    pub idempotent: bool,
    /// Per-step timeout in seconds, overriding the run default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_idempotent() -> bool {
    true
}

impl Step {
    /// Create a step with no dependencies, idempotent by default.
    pub fn new(id: impl Into<String>, command: Command) -> Self {
        Self {
            id: id.into(),
            command,
            depends_on: Vec::new(),
            idempotent: true,
            timeout: None,
            description: None,
        }
    }

    /// Builder-style helper used by tests and programmatic manifests.
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Mark the step as tracked: run once, then skipped while its marker exists.
    pub fn run_once(mut self) -> Self {
        self.idempotent = false;
        self
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

/// One environment declaration for the produced artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Parsed manifest file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Profile location relative to the target root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<PathBuf>,
}

impl Manifest {
    /// Load and validate a manifest from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProvisionError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ProvisionError::io("read manifest", path, e))?;
        Self::from_json(&json, &path.display().to_string())
    }

    /// Parse and validate manifest JSON. `origin` names the source in errors.
    pub fn from_json(json: &str, origin: &str) -> Result<Self, ProvisionError> {
        let manifest: Self =
            serde_json::from_str(json).map_err(|e| ProvisionError::InvalidManifest {
                path: origin.to_string(),
                message: e.to_string(),
            })?;
        manifest.validate(origin)?;
        Ok(manifest)
    }

    /// Check per-record constraints.
    pub fn validate(&self, origin: &str) -> Result<(), ProvisionError> {
        let invalid = |message: String| ProvisionError::InvalidManifest {
            path: origin.to_string(),
            message,
        };

        for step in &self.steps {
            if !is_valid_step_id(&step.id) {
                return Err(invalid(format!(
                    "step id '{}' must start with a letter or digit and contain only [A-Za-z0-9._-]",
                    step.id
                )));
            }
            match &step.command {
                Command::Shell(line) if line.trim().is_empty() => {
                    return Err(invalid(format!("step '{}' has an empty command", step.id)));
                }
                Command::Argv(argv) if argv.first().map_or(true, |p| p.is_empty()) => {
                    return Err(invalid(format!("step '{}' has an empty argv", step.id)));
                }
                _ => {}
            }
            if step.timeout == Some(0) {
                return Err(invalid(format!("step '{}' has a zero timeout", step.id)));
            }
        }

        for var in &self.env {
            if !is_valid_env_name(&var.name) {
                return Err(invalid(format!("invalid environment variable name '{}'", var.name)));
            }
            if var.value.contains('\n') || var.value.contains('\r') {
                return Err(invalid(format!("value of '{}' contains a newline", var.name)));
            }
        }

        if let Some(profile) = &self.profile {
            let escapes = profile
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if escapes || profile.as_os_str().is_empty() {
                return Err(invalid(format!(
                    "profile path {} must be relative to the target root",
                    profile.display()
                )));
            }
            let normalized: PathBuf = profile
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .collect();
            if normalized.starts_with(STATE_DIR) && normalized != Path::new(DEFAULT_PROFILE) {
                return Err(invalid(format!(
                    "profile path {} is inside the reserved {} directory",
                    profile.display(),
                    STATE_DIR
                )));
            }
        }

        Ok(())
    }

    /// Profile location relative to the target root.
    pub fn profile_path(&self) -> &Path {
        self.profile
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_PROFILE))
    }

    /// Environment declarations as (name, value) pairs, in declaration order.
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().map(|v| (v.name.as_str(), v.value.as_str()))
    }
}

pub(crate) fn is_valid_step_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

pub(crate) fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
