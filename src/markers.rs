//! Idempotency markers - on-disk evidence that a step already succeeded.
//!
//! Steps declared `idempotent: false` get one marker under
//! `<root>/.provisor/markers/<step-id>` after a successful run. The marker
//! records the SHA256 of the step's command, so editing a step's command
//! invalidates its marker instead of silently skipping the new command.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::common::paths::{marker_path, markers_dir};
use crate::common::write_atomic;
use crate::error::ProvisionError;
use crate::manifest::Step;

/// Marker file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub step: String,
    pub command_sha256: String,
    /// Seconds since the Unix epoch.
    pub completed_at: u64,
    pub duration_ms: u64,
}

/// What the marker directory says about one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerState {
    Missing,
    /// Marker present and recorded for the current command.
    Valid(Marker),
    /// Marker present but recorded for a different command.
    Stale(Marker),
}

impl MarkerState {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// Inspect the marker for a step.
///
/// An unreadable or corrupt marker is reported as missing (with a warning),
/// so the step simply runs again.
pub fn check(root: &Path, step: &Step) -> MarkerState {
    let path = marker_path(root, &step.id);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return MarkerState::Missing,
        Err(e) => {
            tracing::warn!(step = %step.id, "cannot read marker {}: {} (step will re-run)", path.display(), e);
            return MarkerState::Missing;
        }
    };

    match serde_json::from_str::<Marker>(&content) {
        Ok(marker) if marker.command_sha256 == step.command.fingerprint() => {
            MarkerState::Valid(marker)
        }
        Ok(marker) => MarkerState::Stale(marker),
        Err(e) => {
            tracing::warn!(step = %step.id, "corrupt marker {}: {} (step will re-run)", path.display(), e);
            MarkerState::Missing
        }
    }
}

/// Record a successful run of `step`.
pub fn write(root: &Path, step: &Step, duration: Duration) -> Result<Marker, ProvisionError> {
    let completed_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let marker = Marker {
        step: step.id.clone(),
        command_sha256: step.command.fingerprint(),
        completed_at,
        duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
    };

    let path = marker_path(root, &step.id);
    let json = serde_json::to_string_pretty(&marker)
        .map_err(|e| ProvisionError::io("serialize marker", &path, e.into()))?;
    write_atomic(&path, json)?;
    Ok(marker)
}

/// Remove one step's marker. Returns whether a marker existed.
pub fn remove(root: &Path, step_id: &str) -> Result<bool, ProvisionError> {
    let path = marker_path(root, step_id);
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ProvisionError::io("remove marker", path, e)),
    }
}

/// Remove every marker under the root. Returns how many were removed.
pub fn remove_all(root: &Path) -> Result<usize, ProvisionError> {
    let ids = list(root)?;
    for id in &ids {
        remove(root, id)?;
    }
    Ok(ids.len())
}

/// Step ids that currently have a marker, sorted.
pub fn list(root: &Path) -> Result<Vec<String>, ProvisionError> {
    let dir = markers_dir(root);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ProvisionError::io("list markers in", dir, e)),
    };

    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ProvisionError::io("list markers in", &dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        // Interrupted atomic writes leave `.<id>.tmp` behind.
        if name.starts_with('.') || !entry.path().is_file() {
            continue;
        }
        ids.push(name);
    }
    ids.sort();
    Ok(ids)
}
