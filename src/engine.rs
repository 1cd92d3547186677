//! Provisioning engine - one run from manifest to environment profile.
//!
//! ```text
//! Pending ──(manifest + graph ok, root locked)──> Running ──> Completed
//!    │                                               │
//!    └──────────────(construction error)──────> Aborted <──(step failed,
//!                                                        cancelled, I/O)
//! ```
//!
//! Construction errors are raised before the target root is touched. The
//! environment profile is only written when every step succeeded, so a
//! half-provisioned root is never marked environment-complete. There are no
//! automatic retries; re-running relies on success markers to skip finished
//! work.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::ProvisionError;
use crate::executor::{self, ExecutorOptions, RunReport};
use crate::graph::DependencyGraph;
use crate::lock::RootLock;
use crate::manifest::Manifest;
use crate::process::{cancel_on_signal, CancelHandle, CancelToken};
use crate::snapshot::EnvironmentSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Pending,
    Running,
    Completed,
    Aborted,
}

/// Result of a run that got as far as executing steps.
#[derive(Debug)]
pub struct Outcome {
    pub state: EngineState,
    pub report: RunReport,
    /// Where the profile was written, for completed runs.
    pub profile: Option<PathBuf>,
    pub duration: Duration,
}

impl Outcome {
    /// Error that aborted the run, if it was aborted.
    pub fn error(&self) -> Option<&ProvisionError> {
        self.report.fatal.as_ref()
    }

    pub fn exit_code(&self) -> u8 {
        match (self.state, self.error()) {
            (EngineState::Completed, _) => 0,
            (_, Some(err)) => err.exit_code(),
            // Aborted always carries its cause; keep a failing code regardless.
            (_, None) => 1,
        }
    }
}

/// Single-use orchestrator: build with options, then [`Engine::run`].
pub struct Engine {
    options: ExecutorOptions,
    cancel: CancelToken,
    signals: Option<CancelHandle>,
    state: EngineState,
}

impl Engine {
    pub fn new(options: ExecutorOptions) -> Self {
        Self {
            options,
            cancel: CancelToken::never(),
            signals: None,
            state: EngineState::Pending,
        }
    }

    /// Stop the run when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Fire `handle` on SIGINT/SIGTERM for the duration of the run.
    pub fn listen_for_signals(mut self, handle: CancelHandle) -> Self {
        self.signals = Some(handle);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Load the manifest at `manifest_path` and provision `root` with it.
    pub fn run(mut self, manifest_path: &Path, root: &Path) -> Result<Outcome, ProvisionError> {
        let manifest = match Manifest::load(manifest_path) {
            Ok(manifest) => manifest,
            Err(e) => return Err(self.abort(e)),
        };
        self.run_manifest(manifest, root)
    }

    /// Provision `root` from an already parsed manifest.
    pub fn run_manifest(mut self, manifest: Manifest, root: &Path) -> Result<Outcome, ProvisionError> {
        let start = Instant::now();

        let graph = match DependencyGraph::build(manifest.steps.clone()) {
            Ok(graph) => graph,
            Err(e) => return Err(self.abort(e)),
        };

        // Installers get an absolute root no matter where provisor was started.
        let prepared = fs::create_dir_all(root)
            .and_then(|_| fs::canonicalize(root))
            .map_err(|e| ProvisionError::io("create target root", root, e))
            .and_then(|root| RootLock::acquire(&root).map(|lock| (root, lock)));
        let (root, _lock) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.abort(e)),
        };

        self.transition(EngineState::Running);
        println!("Provisioning {} ({} steps)", root.display(), graph.len());

        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => return Err(self.abort(ProvisionError::io("start async runtime for", &root, e))),
        };
        if let Some(handle) = self.signals.take() {
            runtime.spawn(cancel_on_signal(handle));
        }
        let mut cancel = self.cancel.clone();
        let mut report = runtime.block_on(executor::run(&graph, &root, &self.options, &mut cancel));

        let mut profile = None;
        if report.all_succeeded() {
            let snapshot = EnvironmentSnapshot::capture(manifest.env_pairs());
            match snapshot.persist(&root, manifest.profile_path()) {
                Ok(path) => {
                    profile = Some(path);
                    self.transition(EngineState::Completed);
                }
                Err(e) => {
                    report.fatal = Some(e);
                    self.transition(EngineState::Aborted);
                }
            }
        } else {
            if let Some(err) = &report.fatal {
                tracing::error!("run aborted: {}", err);
            }
            self.transition(EngineState::Aborted);
        }

        Ok(Outcome {
            state: self.state,
            report,
            profile,
            duration: start.elapsed(),
        })
    }

    /// Move to `Aborted` from whichever state the error surfaced in.
    fn abort(&mut self, err: ProvisionError) -> ProvisionError {
        tracing::error!("aborting run: {}", err);
        self.transition(EngineState::Aborted);
        err
    }

    fn transition(&mut self, next: EngineState) {
        debug_assert!(
            matches!(
                (self.state, next),
                (EngineState::Pending, EngineState::Running)
                    | (EngineState::Pending, EngineState::Aborted)
                    | (EngineState::Running, EngineState::Completed)
                    | (EngineState::Running, EngineState::Aborted)
            ),
            "illegal engine transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(from = ?self.state, to = ?next, "engine state");
        self.state = next;
    }
}
