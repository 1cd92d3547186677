//! End-to-end tests: manifest on disk, mock installers, real target root.
//!
//! The first half drives the library engine; the second half runs the
//! `provisor` binary to check exit codes and user-visible output.

mod helpers;

use helpers::{assert_file_eq, assert_file_exists, image_manifest, tree_snapshot, TestEnv};
use provisor::{Engine, EngineState, ExecutorOptions, ProvisionError, StepFailure, StepStatus};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

fn apply(env: &TestEnv, manifest: &std::path::Path) -> provisor::Outcome {
    Engine::new(ExecutorOptions::default())
        .run(manifest, &env.root)
        .expect("construction should succeed")
}

fn statuses(outcome: &provisor::Outcome) -> Vec<(String, StepStatus)> {
    outcome
        .report
        .results
        .iter()
        .map(|r| (r.step_id.clone(), r.status))
        .collect()
}

// =============================================================================
// Engine
// =============================================================================

#[test]
fn test_image_build_completes_and_writes_profile() {
    let env = TestEnv::new();
    let manifest = image_manifest(&env, "mkdir -p opt/python && touch opt/python/python3", true);

    let outcome = apply(&env, &manifest);

    assert_eq!(outcome.state, EngineState::Completed);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(env.invocations(), vec!["install-os-packages", "install-interpreter", "install-app"]);
    assert_file_exists(&env.root.join("usr/bin/os"));
    assert_file_exists(&env.root.join("opt/python/python3"));
    assert_file_exists(&env.root.join("opt/app/bin/app"));
    assert_file_eq(&env.profile(), "PATH=/opt/app/bin:$PATH\n");
}

#[test]
fn test_image_build_failure_halts_and_writes_no_profile() {
    let env = TestEnv::new();
    let manifest = image_manifest(&env, "echo 'conda: checksum mismatch' >&2; exit 1", true);

    let outcome = apply(&env, &manifest);

    assert_eq!(outcome.state, EngineState::Aborted);
    assert_eq!(
        statuses(&outcome),
        vec![
            ("base".to_string(), StepStatus::Success),
            ("runtime".to_string(), StepStatus::Failed),
        ]
    );
    assert!(outcome.report.result("app").is_none());
    assert_eq!(env.invocations(), vec!["install-os-packages", "install-interpreter"]);
    assert!(outcome.report.results[1].output.contains("checksum mismatch"));
    assert!(matches!(
        outcome.error(),
        Some(ProvisionError::StepExecution { step_id, failure: StepFailure::ExitStatus(1) }) if step_id == "runtime"
    ));
    assert_eq!(outcome.exit_code(), ProvisionError::StepExecution {
        step_id: String::new(),
        failure: StepFailure::ExitStatus(1),
    }
    .exit_code());
    assert!(!env.profile().exists());
}

#[test]
fn test_rerun_of_tracked_steps_is_a_no_op() {
    let env = TestEnv::new();
    let manifest = image_manifest(&env, "touch runtime-installed", false);

    let first = apply(&env, &manifest);
    assert_eq!(first.state, EngineState::Completed);
    let before = tree_snapshot(&env.root);

    let second = apply(&env, &manifest);

    assert_eq!(second.state, EngineState::Completed);
    assert!(second.report.results.iter().all(|r| r.status == StepStatus::Skipped));
    assert_eq!(env.invocations().len(), 3, "no installer may run twice");
    assert_eq!(tree_snapshot(&env.root), before);
}

#[test]
fn test_rerun_after_failure_resumes_at_failed_step() {
    let env = TestEnv::new();
    let flag = env.root.join("..").join("runtime-fixed");
    let body = format!("test -e '{}'", flag.display());
    let manifest = image_manifest(&env, &body, false);

    let first = apply(&env, &manifest);
    assert_eq!(first.state, EngineState::Aborted);

    std::fs::write(&flag, "").unwrap();
    let second = apply(&env, &manifest);

    assert_eq!(second.state, EngineState::Completed);
    assert_eq!(
        statuses(&second),
        vec![
            ("base".to_string(), StepStatus::Skipped),
            ("runtime".to_string(), StepStatus::Success),
            ("app".to_string(), StepStatus::Success),
        ]
    );
    assert_eq!(
        env.invocations(),
        vec!["install-os-packages", "install-interpreter", "install-interpreter", "install-app"]
    );
}

#[test]
fn test_cycle_fails_before_any_installer_runs() {
    let env = TestEnv::new();
    let a = env.installer("a", "true");
    let b = env.installer("b", "true");
    let manifest = env.manifest(&format!(
        r#"{{"steps": [
            {{"id": "a", "command": ["{}"], "dependsOn": ["b"]}},
            {{"id": "b", "command": ["{}"], "dependsOn": ["a"]}}
        ]}}"#,
        a.display(),
        b.display()
    ));

    let err = Engine::new(ExecutorOptions::default())
        .run(&manifest, &env.root)
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Cycle { .. }));
    assert!(env.invocations().is_empty());
    assert!(!env.root.join(".provisor").exists());
}

#[test]
fn test_snapshot_ordering_with_duplicate_declarations() {
    let env = TestEnv::new();
    let manifest = env.manifest(
        r#"{
            "steps": [{"id": "noop", "command": "true"}],
            "env": [
                {"name": "PATH", "value": "/usr/bin"},
                {"name": "CONDA_DIR", "value": "/opt/conda"},
                {"name": "PATH", "value": "/opt/conda/bin:$PATH"}
            ],
            "profile": "etc/provisor.env"
        }"#,
    );

    let outcome = apply(&env, &manifest);

    assert_eq!(outcome.state, EngineState::Completed);
    assert_file_eq(
        &env.root.join("etc/provisor.env"),
        "PATH=/opt/conda/bin:$PATH\nCONDA_DIR=/opt/conda\n",
    );
}

// =============================================================================
// CLI
// =============================================================================

fn provisor() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_provisor"));
    cmd.env_remove("PROVISOR_STEP_TIMEOUT").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_apply_success_exits_zero() {
    let env = TestEnv::new();
    let manifest = image_manifest(&env, "true", true);

    let output = provisor()
        .arg("apply")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--root")
        .arg(&env.root)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0), "{}", String::from_utf8_lossy(&output.stderr));
    assert_file_eq(&env.profile(), "PATH=/opt/app/bin:$PATH\n");
}

#[test]
fn test_cli_apply_failure_reports_step_and_output() {
    let env = TestEnv::new();
    let manifest = image_manifest(&env, "echo 'resolver exploded'; exit 4", true);

    let output = provisor()
        .arg("apply")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--root")
        .arg(&env.root)
        .output()
        .unwrap();

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(6));
    assert!(stderr.contains("runtime"), "stderr: {}", stderr);
    assert!(stderr.contains("resolver exploded"), "stderr: {}", stderr);
    assert!(!env.profile().exists());
}

#[test]
fn test_cli_distinct_exit_codes_for_construction_errors() {
    let env = TestEnv::new();
    let cases = [
        (r#"{"steps": [{"id": "a", "command": "true", "dependsOn": ["a"]}]}"#, 4),
        (r#"{"steps": [{"id": "a", "command": "true", "dependsOn": ["ghost"]}]}"#, 5),
        (r#"{"steps": [{"id": "a"}]}"#, 3),
    ];

    for (json, expected) in cases {
        let manifest = env.manifest(json);
        let output = provisor()
            .arg("apply")
            .arg("--manifest")
            .arg(&manifest)
            .arg("--root")
            .arg(&env.root)
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(expected), "manifest: {}", json);
    }
}

#[test]
fn test_cli_timeout_flag_fails_slow_step() {
    let env = TestEnv::new();
    let manifest = env.manifest(r#"{"steps": [{"id": "slow", "command": "sleep 10"}]}"#);

    let output = provisor()
        .arg("apply")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--root")
        .arg(&env.root)
        .arg("--timeout")
        .arg("1")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(6));
    assert!(String::from_utf8_lossy(&output.stderr).contains("TimeoutError"));
}

#[test]
fn test_cli_plan_prints_order_without_touching_root() {
    let env = TestEnv::new();
    let manifest = env.manifest(
        r#"{"steps": [
            {"id": "app", "command": "true", "dependsOn": ["base"]},
            {"id": "base", "command": "true"}
        ]}"#,
    );

    let output = provisor().arg("plan").arg("--manifest").arg(&manifest).output().unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(0));
    let base = stdout.find("1. base").expect("base listed first");
    let app = stdout.find("2. app").expect("app listed second");
    assert!(base < app);
    assert!(std::fs::read_dir(&env.root).unwrap().next().is_none());
}

#[test]
fn test_cli_reset_forces_rerun() {
    let env = TestEnv::new();
    let manifest = image_manifest(&env, "true", false);
    let run = || {
        provisor()
            .arg("apply")
            .arg("--manifest")
            .arg(&manifest)
            .arg("--root")
            .arg(&env.root)
            .output()
            .unwrap()
    };

    assert_eq!(run().status.code(), Some(0));
    let reset = provisor()
        .arg("reset")
        .arg("--root")
        .arg(&env.root)
        .arg("--step")
        .arg("app")
        .output()
        .unwrap();
    assert_eq!(reset.status.code(), Some(0));
    assert_eq!(run().status.code(), Some(0));

    assert_eq!(
        env.invocations(),
        vec!["install-os-packages", "install-interpreter", "install-app", "install-app"]
    );
}

#[test]
fn test_cli_sigint_cancels_run_with_130() {
    let env = TestEnv::new();
    let manifest = env.manifest(
        r#"{"steps": [{"id": "slow", "command": "touch started; sleep 30; touch finished", "idempotent": false}]}"#,
    );

    let child = provisor()
        .arg("apply")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--root")
        .arg(&env.root)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let started = env.root.join("started");
    let deadline = Instant::now() + Duration::from_secs(10);
    while !started.exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(started.exists(), "installer never started");
    std::thread::sleep(Duration::from_millis(200));

    // SAFETY: plain kill(2) on our own child.
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGINT) };
    assert_eq!(rc, 0);
    let output = child.wait_with_output().unwrap();

    assert_eq!(output.status.code(), Some(130), "{}", String::from_utf8_lossy(&output.stderr));
    std::thread::sleep(Duration::from_millis(500));
    assert!(!env.root.join("finished").exists());
    assert!(!env.root.join(".provisor/markers/slow").exists());
    assert!(!env.profile().exists());
}

#[test]
fn test_cli_status_reports_markers_and_profile() {
    let env = TestEnv::new();
    let manifest = image_manifest(&env, "true", false);
    let status = || {
        let output = provisor()
            .arg("status")
            .arg("--manifest")
            .arg(&manifest)
            .arg("--root")
            .arg(&env.root)
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(0));
        String::from_utf8_lossy(&output.stdout).into_owned()
    };

    let before = status();
    assert!(before.contains("pending"), "{}", before);
    assert!(before.contains("not written"), "{}", before);

    let applied = provisor()
        .arg("apply")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--root")
        .arg(&env.root)
        .output()
        .unwrap();
    assert_eq!(applied.status.code(), Some(0));

    let after = status();
    for id in ["base", "runtime", "app"] {
        assert!(after.lines().any(|l| l.contains(id) && l.contains("done")), "{}", after);
    }
    assert!(after.contains("PATH=/opt/app/bin:$PATH"), "{}", after);
    assert!(!after.contains("pending"), "{}", after);
}
