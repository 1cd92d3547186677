//! Installer invocation with output capture, timeout and cancellation.
//!
//! Every step's installer goes through [`Cmd`]: stdout and stderr are merged
//! line by line into one capture, and stdin is closed so installers cannot
//! block on interactive prompts. Each installer leads its own process group.
//! A terminal Ctrl+C therefore reaches only provisor, and a timeout or
//! cancellation kills the installer together with everything it spawned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

use crate::error::StepFailure;
use crate::manifest;

/// Result of one invocation. Output is kept even when the invocation failed.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// `Ok` on exit status 0.
    pub status: Result<(), StepFailure>,
    /// Exit code, when the process exited on its own.
    pub code: Option<i32>,
    /// Combined stdout and stderr, in arrival order per line.
    pub output: String,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status.is_ok()
    }
}

/// Builder for configuring an installer invocation.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
    timeout: Option<Duration>,
    /// Echo output lines to stdout as they arrive.
    echo: bool,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            timeout: None,
            echo: false,
        }
    }

    /// Build the invocation for a manifest command.
    ///
    /// Shell commands run as `<shell> -c <line>`.
    pub fn for_command(command: &manifest::Command, shell: &str) -> Self {
        match command {
            manifest::Command::Shell(line) => Cmd::new(shell).arg("-c").arg(line),
            manifest::Command::Argv(argv) => {
                let (program, rest) = argv.split_first().map_or(("", &[][..]), |(p, r)| (p.as_str(), r));
                Cmd::new(program).args(rest)
            }
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Set the working directory.
    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Run to completion, timeout, or cancellation.
    pub async fn run(self, cancel: &mut CancelToken) -> CommandResult {
        let start = Instant::now();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CommandResult {
                    status: Err(StepFailure::Spawn(format!("'{}': {}", self.program, e))),
                    code: None,
                    output: String::new(),
                    duration: start.elapsed(),
                };
            }
        };
        // The child leads its group, so its pid is also the group id.
        let pgid = child.id();
        tracing::debug!(program = %self.program, pid = ?pgid, "spawned installer");

        let captured = Mutex::new(Vec::new());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = async {
            let (_, _, status) = tokio::join!(
                pump(stdout, &captured, self.echo),
                pump(stderr, &captured, self.echo),
                child.wait(),
            );
            status
        };
        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let (status, code) = tokio::select! {
            waited = finished => match waited {
                Ok(exit) if exit.success() => (Ok(()), exit.code()),
                Ok(exit) => {
                    let code = exit.code();
                    (Err(StepFailure::ExitStatus(code.unwrap_or(-1))), code)
                }
                Err(e) => (Err(StepFailure::Spawn(format!("waiting on '{}': {}", self.program, e))), None),
            },
            _ = deadline => {
                let limit = self.timeout.unwrap_or_default();
                tracing::warn!(program = %self.program, ?limit, "installer timed out, killing");
                (Err(StepFailure::Timeout(limit)), None)
            }
            _ = cancel.cancelled() => {
                tracing::warn!(program = %self.program, "run cancelled, killing installer");
                (Err(StepFailure::Cancelled), None)
            }
        };

        // A cancelled run wins over however the installer happened to exit.
        let status = match status {
            Err(_) if cancel.is_cancelled() => Err(StepFailure::Cancelled),
            other => other,
        };

        if status.is_err() {
            kill_group(pgid);
            if let Err(e) = child.start_kill() {
                tracing::debug!("kill after abort: {}", e);
            }
            let _ = child.wait().await;
        }

        let bytes = captured.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        CommandResult {
            status,
            code,
            output: String::from_utf8_lossy(&bytes).into_owned(),
            duration: start.elapsed(),
        }
    }
}

/// SIGKILL the installer's process group, leftover background jobs included.
fn kill_group(pgid: Option<u32>) {
    let Some(pgid) = pgid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: killpg takes plain integers; a vanished group yields ESRCH.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::debug!(pgid, "killpg failed: {}", err);
        }
    }
}

/// Copy lines from one child stream into the shared capture.
async fn pump<R: AsyncRead + Unpin>(stream: Option<R>, sink: &Mutex<Vec<u8>>, echo: bool) {
    let Some(stream) = stream else {
        return;
    };
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if echo {
                    print!("    | {}", String::from_utf8_lossy(&line));
                    if !line.ends_with(b"\n") {
                        println!();
                    }
                }
                let mut buf = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                buf.extend_from_slice(&line);
            }
            Err(e) => {
                tracing::debug!("output stream closed: {}", e);
                break;
            }
        }
    }
}

/// Last `lines` lines of a capture, for failure reports.
pub fn tail(output: &str, lines: usize) -> &str {
    if lines == 0 {
        return "";
    }
    let trimmed = output.trim_end_matches('\n');
    let mut start = trimmed.len();
    for _ in 0..lines {
        match trimmed[..start].rfind('\n') {
            Some(pos) => start = pos,
            None => return trimmed,
        }
    }
    &trimmed[start + 1..]
}

// =============================================================================
// Cancellation
// =============================================================================

/// Sending half: flips the run into cancelled state.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Receiving half, checked between steps and awaited during invocations.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_, token) = cancel_pair();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is gone.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|&cancelled| cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Cancel the run on SIGINT or SIGTERM.
pub async fn cancel_on_signal(handle: CancelHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {}", e);
                if tokio::signal::ctrl_c().await.is_ok() {
                    handle.cancel();
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    eprintln!("\nInterrupted, stopping after killing the running installer...");
    handle.cancel();
}

// =============================================================================
// Tests
// =============================================================================
