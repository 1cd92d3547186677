//! Apply command - provisions a target root.

use anyhow::Result;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::engine::{Engine, EngineState, Outcome};
use crate::executor::{ExecutorOptions, SkipReason, StepStatus};
use crate::process::{cancel_pair, tail};
use crate::timing::format_duration;

/// Lines of captured output shown for a failing step.
const OUTPUT_TAIL_LINES: usize = 20;

/// Flags of the apply command.
pub struct ApplyOptions {
    pub continue_on_error: bool,
    /// Overrides PROVISOR_STEP_TIMEOUT.
    pub timeout: Option<Duration>,
    pub verbose: bool,
}

/// Execute the apply command.
///
/// Returns the run's fatal error, if any, so `main` can map it to an exit code.
pub fn cmd_apply(manifest: &Path, root: &Path, opts: ApplyOptions, config: &Config) -> Result<()> {
    let options = ExecutorOptions {
        continue_on_error: opts.continue_on_error,
        default_timeout: opts.timeout.or(config.step_timeout),
        shell: config.shell.clone(),
        echo_output: opts.verbose,
    };

    let (handle, token) = cancel_pair();
    let mut outcome = Engine::new(options)
        .with_cancel(token)
        .listen_for_signals(handle)
        .run(manifest, root)?;

    print_summary(&outcome);

    match outcome.state {
        EngineState::Completed => Ok(()),
        _ => {
            print_failure(&outcome);
            match outcome.report.fatal.take() {
                Some(err) => Err(err.into()),
                None => anyhow::bail!("run aborted"),
            }
        }
    }
}

fn print_summary(outcome: &Outcome) {
    let report = &outcome.report;
    let already = report
        .results
        .iter()
        .filter(|r| r.skip_reason == Some(SkipReason::AlreadyComplete))
        .count();
    let blocked = report.count(StepStatus::Skipped) - already;

    println!();
    println!(
        "{} succeeded, {} failed, {} already complete, {} blocked ({})",
        report.count(StepStatus::Success),
        report.count(StepStatus::Failed),
        already,
        blocked,
        format_duration(outcome.duration),
    );
    if let Some(profile) = &outcome.profile {
        println!("Environment profile: {}", profile.display());
    }
}

fn print_failure(outcome: &Outcome) {
    if let Some(failed) = outcome.report.first_failure() {
        let reason = failed
            .failure
            .as_ref()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "unknown failure".to_string());
        eprintln!("\n[FAIL] step '{}' failed ({})", failed.step_id, reason);

        let output = tail(&failed.output, OUTPUT_TAIL_LINES);
        if output.is_empty() {
            eprintln!("  (no output captured)");
        } else {
            eprintln!("--- last {} lines of output ---", OUTPUT_TAIL_LINES);
            eprintln!("{}", output);
            eprintln!("---");
        }
    }
    eprintln!("No environment profile written: the root is not fully provisioned.");
}
