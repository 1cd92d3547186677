//! Status command - shows what a target root already has.

use anyhow::Result;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::graph::DependencyGraph;
use crate::manifest::Manifest;
use crate::markers::{self, MarkerState};
use crate::snapshot::EnvironmentSnapshot;

/// Execute the status command.
pub fn cmd_status(manifest_path: &Path, root: &Path) -> Result<()> {
    let manifest = Manifest::load(manifest_path)?;
    let graph = DependencyGraph::build(manifest.steps.clone())?;

    println!("Target root: {}", root.display());
    println!("Steps:");
    for step in graph.order() {
        let state = if step.idempotent {
            "runs every apply".to_string()
        } else {
            match markers::check(root, step) {
                MarkerState::Valid(marker) => format!("done {}", age(marker.completed_at)),
                MarkerState::Stale(_) => "stale (command changed, will re-run)".to_string(),
                MarkerState::Missing => "pending".to_string(),
            }
        };
        println!("  {:<24} {}", step.id, state);
    }

    let orphans: Vec<String> = markers::list(root)?
        .into_iter()
        .filter(|id| graph.get(id).is_none())
        .collect();
    if !orphans.is_empty() {
        println!("Markers for steps not in this manifest: {}", orphans.join(", "));
    }

    match EnvironmentSnapshot::load(root, manifest.profile_path())? {
        Some(profile) => {
            println!("Environment profile ({} variables):", profile.len());
            for (name, value) in profile.iter() {
                println!("  {}={}", name, value);
            }
        }
        None => println!("Environment profile: not written (no completed run)"),
    }
    Ok(())
}

/// "3m ago" style age of a Unix timestamp.
fn age(completed_at: u64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(completed_at);
    let secs = now.saturating_sub(completed_at);
    match secs {
        0..=59 => format!("{}s ago", secs),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86400),
    }
}
