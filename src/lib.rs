//! Provisor library exports.
//!
//! The binary is a thin CLI over these modules; integration tests drive
//! them directly. See `tests/helpers.rs` for the shared test fixtures.

pub mod commands;
pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod lock;
pub mod manifest;
pub mod markers;
pub mod process;
pub mod snapshot;
pub mod timing;

pub use engine::{Engine, EngineState, Outcome};
pub use error::{ProvisionError, StepFailure};
pub use executor::{ExecutionResult, ExecutorOptions, RunReport, StepStatus};
pub use graph::DependencyGraph;
pub use manifest::{Command, Manifest, Step};
pub use snapshot::EnvironmentSnapshot;
