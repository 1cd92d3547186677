//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `apply` - Provision a target root from a manifest
//! - `plan` - Validate a manifest and show the execution order
//! - `status` - Show marker and profile state of a target root
//! - `reset` - Remove success markers so steps run again

pub mod apply;
mod plan;
mod reset;
mod status;

pub use apply::cmd_apply;
pub use plan::cmd_plan;
pub use reset::cmd_reset;
pub use status::cmd_status;
