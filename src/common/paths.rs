//! Layout of provisor's reserved state directory inside a target root.
//!
//! ```text
//! <root>/.provisor/
//!   lock              advisory lock held for the duration of a run
//!   markers/<step>    one success marker per tracked step
//!   environment       default runtime-activation profile
//! ```

use std::path::{Path, PathBuf};

/// Reserved directory name under the target root.
pub const STATE_DIR: &str = ".provisor";

/// Default profile location, relative to the target root.
pub const DEFAULT_PROFILE: &str = ".provisor/environment";

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

pub fn markers_dir(root: &Path) -> PathBuf {
    state_dir(root).join("markers")
}

pub fn marker_path(root: &Path, step_id: &str) -> PathBuf {
    markers_dir(root).join(step_id)
}

pub fn lock_path(root: &Path) -> PathBuf {
    state_dir(root).join("lock")
}
