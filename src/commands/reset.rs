//! Reset command - removes success markers so tracked steps run again.

use anyhow::{Context, Result};
use std::path::Path;

use crate::lock::RootLock;
use crate::manifest::is_valid_step_id;
use crate::markers;

/// Execute the reset command.
pub fn cmd_reset(root: &Path, step: Option<&str>) -> Result<()> {
    if let Some(id) = step {
        if !is_valid_step_id(id) {
            anyhow::bail!("'{}' is not a valid step id", id);
        }
    }
    if !root.is_dir() {
        anyhow::bail!("target root {} does not exist", root.display());
    }
    // Never pull markers out from under a running apply.
    let _lock = RootLock::acquire(root).context("cannot reset while the root is in use")?;

    match step {
        Some(id) => {
            if markers::remove(root, id)? {
                println!("Removed marker for '{}'.", id);
            } else {
                println!("No marker for '{}'.", id);
            }
        }
        None => {
            let removed = markers::remove_all(root)?;
            println!("Removed {} marker(s).", removed);
        }
    }
    Ok(())
}
