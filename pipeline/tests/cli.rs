//! CLI tests for the `pipeline` binary.
//!
//! Spawns the binary and verifies exit codes for usage errors, aborted runs,
//! and gate outcomes driven by a fake agent executable.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use contract_pipeline::exit_codes;
use contract_pipeline::test_support::{TestRepo, contract_text, write_contract};

fn pipeline(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pipeline"))
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("spawn pipeline")
}

/// Agent executable that optionally writes a file, then reports a result.
fn fake_agent(dir: &Path, write_file: bool) -> PathBuf {
    let script = dir.join("fake-agent.sh");
    let mut body = String::from("#!/bin/sh\ncat > /dev/null\n");
    if write_file {
        body.push_str("mkdir -p lib\nprintf 'export const a = 1;\\n' > lib/a.ts\n");
    }
    body.push_str(
        "echo '{\"type\":\"result\",\"subtype\":\"success\",\"is_error\":false,\"result\":\"[S1-001] Gate: PASS\",\"session_id\":\"s-1\"}'\n",
    );
    fs::write(&script, body).expect("write agent script");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
    script
}

fn config_file(dir: &Path, agent: &Path) -> PathBuf {
    let path = dir.join("config.toml");
    fs::write(
        &path,
        format!(
            "[agent]\nbinary = \"{}\"\ntimeout_secs = 30\n\n[gate]\ncompile_command = [\"true\"]\ncommand_timeout_secs = 30\n",
            agent.display()
        ),
    )
    .expect("write config");
    path
}

#[test]
fn missing_contract_flag_is_a_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = pipeline(&["--retries", "1"], temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::USAGE));
}

#[test]
fn unreadable_contract_aborts_before_any_phase() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = pipeline(&["--contract", "tasks/S9-999-missing.md"], temp.path());

    assert_eq!(output.status.code(), Some(exit_codes::ABORTED));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("contract unreadable"), "{stderr}");
    assert!(!temp.path().join(".pipeline").exists());
}

#[test]
fn failing_gate_exits_non_zero_and_names_the_report() {
    let repo = TestRepo::new();
    let root = repo.root();
    write_contract(
        &root,
        "S1-001-fixture.md",
        &contract_text("S1-001", "Library", &["lib/a.ts"]),
    );
    repo.commit("add contract");
    let tools = tempfile::tempdir().expect("tempdir");
    let config = config_file(tools.path(), &fake_agent(tools.path(), false));

    let output = pipeline(
        &[
            "--contract",
            "tasks/S1-001-fixture.md",
            "--retries",
            "0",
            "--config",
            &config.display().to_string(),
        ],
        &root,
    );

    assert_eq!(output.status.code(), Some(exit_codes::GATE_FAILED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("tasks/sprint-s1/gate-reports/S1-001-gate.md"),
        "{stdout}"
    );
    let report = fs::read_to_string(root.join("tasks/sprint-s1/gate-reports/S1-001-gate.md"))
        .expect("report");
    assert!(report.contains("Re-Run Appendix"));
}

#[test]
fn passing_gate_exits_zero() {
    let repo = TestRepo::new();
    let root = repo.root();
    write_contract(
        &root,
        "S1-001-fixture.md",
        &contract_text("S1-001", "Library", &["lib/a.ts"]),
    );
    repo.commit("add contract");
    let tools = tempfile::tempdir().expect("tempdir");
    let config = config_file(tools.path(), &fake_agent(tools.path(), true));

    let output = pipeline(
        &[
            "--contract",
            "tasks/S1-001-fixture.md",
            "--config",
            &config.display().to_string(),
        ],
        &root,
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{stdout}");
    assert!(stdout.contains("[S1-001] Gate: PASS"), "{stdout}");
}
