//! Shared utilities across provisor modules.

pub mod files;
pub mod paths;

pub use files::{ensure_parent_exists, write_atomic};
