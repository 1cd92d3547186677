//! Plan command - validates a manifest and prints the execution order.
//!
//! Touches no target root. Useful as a preflight in image build pipelines.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::graph::DependencyGraph;
use crate::manifest::Manifest;
use crate::snapshot::EnvironmentSnapshot;

/// Execute the plan command.
pub fn cmd_plan(manifest_path: &Path, config: &Config) -> Result<()> {
    let manifest = Manifest::load(manifest_path)?;
    let graph = DependencyGraph::build(manifest.steps.clone())?;

    println!("Execution order ({} steps):", graph.len());
    for (n, step) in graph.order().enumerate() {
        let mut line = format!("  {:>2}. {}", n + 1, step.id);
        if !step.depends_on.is_empty() {
            line.push_str(&format!("  (after: {})", step.depends_on.join(", ")));
        }
        if !step.idempotent {
            line.push_str("  [run once]");
        }
        if let Some(timeout) = step.timeout {
            line.push_str(&format!("  [timeout {}s]", timeout));
        }
        println!("{}", line);
        if let Some(description) = &step.description {
            println!("        {}", description);
        }
        println!("        $ {}", step.command);
    }

    let mut warnings = 0;
    if manifest.steps.iter().any(|s| s.command.program().is_none()) && which::which(&config.shell).is_err() {
        println!("  [WARN] shell {} not found on this host", config.shell);
        warnings += 1;
    }
    for step in graph.order() {
        if let Some(program) = step.command.program() {
            // Absolute installer paths usually live inside the root being built.
            if !program.contains('/') && which::which(program).is_err() {
                println!("  [WARN] {}: '{}' not found on PATH", step.id, program);
                warnings += 1;
            }
        }
    }

    let snapshot = EnvironmentSnapshot::capture(manifest.env_pairs());
    println!("\nEnvironment profile ({}):", manifest.profile_path().display());
    if snapshot.is_empty() {
        println!("  (empty)");
    } else {
        for (name, value) in snapshot.iter() {
            println!("  {}={}", name, value);
        }
    }

    if warnings > 0 {
        println!("\n{} warning(s); steps may fail at apply time.", warnings);
    }
    Ok(())
}
