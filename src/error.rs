//! Error taxonomy for provisioning runs.
//!
//! Construction-time errors (manifest, duplicate ids, cycles, dangling
//! references) are raised before the target root is touched. Execution-time
//! errors are recorded per step and surfaced once the run stops.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why a single installer invocation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    /// Process exited with a non-zero status (-1 when killed by a signal).
    ExitStatus(i32),
    /// Invocation exceeded its time budget and was killed.
    Timeout(Duration),
    /// Installer could not be started at all.
    Spawn(String),
    /// Invocation was killed because the run was cancelled.
    Cancelled,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitStatus(code) => write!(f, "exit code {}", code),
            Self::Timeout(limit) => write!(f, "TimeoutError: exceeded {}s", limit.as_secs()),
            Self::Spawn(message) => write!(f, "failed to start installer: {}", message),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid manifest {path}: {message}")]
    InvalidManifest { path: String, message: String },

    #[error("duplicate step id '{id}'")]
    DuplicateStep { id: String },

    #[error("dependency cycle: {}", format_cycle(.participants))]
    Cycle { participants: Vec<String> },

    #[error("step '{step_id}' depends on unknown step '{missing_id}'")]
    UnknownDependency { step_id: String, missing_id: String },

    #[error("step '{step_id}' failed ({failure})")]
    StepExecution {
        step_id: String,
        failure: StepFailure,
    },

    #[error("failed to {operation} {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("target root {} is locked by another run", .root.display())]
    RootLocked { root: PathBuf },

    #[error("run cancelled")]
    Cancelled,
}

impl ProvisionError {
    /// Shorthand for wrapping an I/O error with the path it concerns.
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Process exit code for the command surface.
    ///
    /// Code 2 is left to clap for usage errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidManifest { .. } | Self::DuplicateStep { .. } => 3,
            Self::Cycle { .. } => 4,
            Self::UnknownDependency { .. } => 5,
            Self::StepExecution { .. } => 6,
            Self::Io { .. } => 7,
            Self::RootLocked { .. } => 8,
            Self::Cancelled => 130,
        }
    }
}

fn format_cycle(participants: &[String]) -> String {
    match participants.first() {
        Some(first) => format!("{} -> {}", participants.join(" -> "), first),
        None => String::new(),
    }
}
