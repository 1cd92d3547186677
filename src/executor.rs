//! Step executor - runs the graph's steps in order against a target root.
//!
//! Steps run strictly one at a time: installers mutate the shared root and
//! later steps consume what earlier ones left behind.
//!
//! ```text
//! for step in graph.order():
//!     blocked by a failed prerequisite?  -> Skipped (continue-on-error only)
//!     tracked and marker valid?          -> Skipped
//!     run installer in <root>            -> Success | Failed
//!     tracked and succeeded?             -> write marker
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{ProvisionError, StepFailure};
use crate::graph::DependencyGraph;
use crate::manifest::Step;
use crate::markers::{self, MarkerState};
use crate::process::{CancelToken, Cmd};
use crate::timing::Timer;

/// Environment variable carrying the target root into every installer.
pub const ROOT_ENV: &str = "PROVISOR_ROOT";
/// Environment variable carrying the running step's id.
pub const STEP_ENV: &str = "PROVISOR_STEP";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Skipped => "Skipped",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A valid success marker exists from an earlier run.
    AlreadyComplete,
    /// The named prerequisite failed or was itself blocked.
    DependencyFailed(String),
}

/// Outcome of one step in one run. Never modified after creation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub step_id: String,
    pub status: StepStatus,
    /// Combined installer output; empty for skipped steps.
    pub output: String,
    pub duration: Duration,
    pub exit_code: Option<i32>,
    pub failure: Option<StepFailure>,
    pub skip_reason: Option<SkipReason>,
}

impl ExecutionResult {
    fn skipped(step_id: &str, reason: SkipReason) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Skipped,
            output: String::new(),
            duration: Duration::ZERO,
            exit_code: None,
            failure: None,
            skip_reason: Some(reason),
        }
    }
}

/// Knobs for a single run.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Keep running independent steps after a failure.
    pub continue_on_error: bool,
    /// Timeout for steps that do not declare their own.
    pub default_timeout: Option<Duration>,
    /// Shell for string commands.
    pub shell: String,
    /// Stream installer output to stdout while it runs.
    pub echo_output: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            default_timeout: None,
            shell: "/bin/sh".to_string(),
            echo_output: false,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    /// One result per step reached, in execution order.
    pub results: Vec<ExecutionResult>,
    /// First error that decided the run's fate, if any.
    pub fatal: Option<ProvisionError>,
}

impl RunReport {
    /// True when every step reached either succeeded or was already complete.
    pub fn all_succeeded(&self) -> bool {
        self.fatal.is_none()
            && self.results.iter().all(|r| match r.status {
                StepStatus::Success => true,
                StepStatus::Skipped => r.skip_reason == Some(SkipReason::AlreadyComplete),
                StepStatus::Failed => false,
            })
    }

    /// First step that failed, in execution order.
    pub fn first_failure(&self) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.status == StepStatus::Failed)
    }

    pub fn result(&self, step_id: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.step_id == step_id)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

/// Run every step of `graph` in order inside `root`.
///
/// Never returns early with an error: failures are recorded in the report
/// so the caller always sees the results gathered up to the stop.
pub async fn run(
    graph: &DependencyGraph,
    root: &Path,
    options: &ExecutorOptions,
    cancel: &mut CancelToken,
) -> RunReport {
    let mut report = RunReport::default();
    // Failed or blocked steps; their dependents are blocked too.
    let mut broken: HashSet<&str> = HashSet::new();

    for step in graph.order() {
        if cancel.is_cancelled() {
            report.fatal = Some(ProvisionError::Cancelled);
            break;
        }

        if let Some(dep) = graph.dependencies(&step.id).find(|d| broken.contains(d.id.as_str())) {
            println!("  [BLOCKED] {} (prerequisite '{}' did not succeed)", step.id, dep.id);
            report
                .results
                .push(ExecutionResult::skipped(&step.id, SkipReason::DependencyFailed(dep.id.clone())));
            broken.insert(&step.id);
            continue;
        }

        if !step.idempotent {
            match markers::check(root, step) {
                MarkerState::Valid(_) => {
                    println!("  [SKIP] {} already complete", step.id);
                    report
                        .results
                        .push(ExecutionResult::skipped(&step.id, SkipReason::AlreadyComplete));
                    continue;
                }
                MarkerState::Stale(_) => {
                    tracing::info!(step = %step.id, "command changed since last success, re-running");
                }
                MarkerState::Missing => {}
            }
        }

        let result = run_step(step, root, options, cancel).await;
        let failure = result.failure.clone();
        let duration = result.duration;
        report.results.push(result);

        match failure {
            None => {
                if !step.idempotent {
                    if let Err(e) = markers::write(root, step, duration) {
                        report.fatal = Some(e);
                        break;
                    }
                }
            }
            Some(StepFailure::Cancelled) => {
                report.fatal = Some(ProvisionError::Cancelled);
                break;
            }
            Some(failure) => {
                broken.insert(&step.id);
                if report.fatal.is_none() {
                    report.fatal = Some(ProvisionError::StepExecution {
                        step_id: step.id.clone(),
                        failure,
                    });
                }
                if !options.continue_on_error {
                    break;
                }
            }
        }
    }

    report
}

async fn run_step(
    step: &Step,
    root: &Path,
    options: &ExecutorOptions,
    cancel: &mut CancelToken,
) -> ExecutionResult {
    println!("Running {}...", step.id);
    let timer = Timer::start(&step.id);
    tracing::debug!(step = %step.id, command = %step.command, "invoking installer");

    let outcome = Cmd::for_command(&step.command, &options.shell)
        .dir(root)
        .env(ROOT_ENV, root.to_string_lossy())
        .env(STEP_ENV, step.id.as_str())
        .timeout(step.timeout_duration().or(options.default_timeout))
        .echo(options.echo_output)
        .run(cancel)
        .await;

    let (status, failure) = match outcome.status {
        Ok(()) => (StepStatus::Success, None),
        Err(failure) => (StepStatus::Failed, Some(failure)),
    };
    match &failure {
        None => timer.finish("OK"),
        Some(f) => {
            tracing::warn!(step = %step.id, "installer failed: {}", f);
            timer.finish("FAIL")
        }
    };

    ExecutionResult {
        step_id: step.id.clone(),
        status,
        output: outcome.output,
        duration: outcome.duration,
        exit_code: outcome.code,
        failure,
        skip_reason: None,
    }
}
