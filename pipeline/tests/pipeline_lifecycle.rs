//! Run-level harness tests for full pipeline lifecycle scenarios.
//!
//! These tests drive `run_pipeline` with a scripted agent, scripted gate
//! commands and fixed produced-file sets to verify gate verdicts, the retry
//! bound, appendix feedback, and abort behavior.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use contract_pipeline::core::contract::TaskContract;
use contract_pipeline::core::engine::ProducedFile;
use contract_pipeline::core::render::render_appendix;
use contract_pipeline::core::report::GateReport;
use contract_pipeline::core::types::{CheckId, OverallStatus, Phase, SessionRef, Verdict};
use contract_pipeline::error::{AdapterExhausted, ReportWriteFailure};
use contract_pipeline::io::changes::GitChangeSource;
use contract_pipeline::io::config::PipelineConfig;
use contract_pipeline::io::contract::load_contract;
use contract_pipeline::io::git::Git;
use contract_pipeline::orchestrator::{
    PhaseOnly, RunEnd, RunOptions, change_exclusions, prepare_base, run_pipeline,
};
use contract_pipeline::phases::RunEvent;
use contract_pipeline::test_support::{
    AgentStep, FixedChanges, ScriptedAgent, ScriptedCommands, TestRepo, contract_text,
    write_contract,
};

const STAMP: &str = "20260101T000000.000Z";
const ADD_TS: &str = "export function add(a: number, b: number): number {\n  return a + b;\n}\n";

fn fixture(text: &str) -> (tempfile::TempDir, PathBuf, TaskContract) {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().canonicalize().expect("canonical root");
    let path = write_contract(&root, "S1-001-fixture.md", text);
    let contract = load_contract(&path).expect("load contract");
    (temp, root, contract)
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.gate.advisory_command = vec!["advise".to_string()];
    config
}

fn options(root: &Path, max_retries: u32, phase_only: Option<PhaseOnly>) -> RunOptions {
    RunOptions {
        repo_root: root.to_path_buf(),
        max_retries,
        max_turns: 40,
        phase_only,
        base_rev: "base".to_string(),
        run_stamp: STAMP.to_string(),
    }
}

fn agent() -> ScriptedAgent {
    ScriptedAgent::new(
        vec![AgentStep::finished("implemented", Some("sess-1"))],
        vec![AgentStep::finished("[S1-001] Gate: PASS", None)],
    )
}

fn attempt_report(root: &Path, attempt: u32) -> GateReport {
    let path = root
        .join(".pipeline/runs/S1-001")
        .join(STAMP)
        .join(format!("attempt-{attempt}"))
        .join("report.json");
    let raw = fs::read_to_string(&path).expect("read report sidecar");
    serde_json::from_str(&raw).expect("parse report sidecar")
}

fn check(report: &GateReport, id: CheckId) -> Verdict {
    report
        .automated_checks
        .iter()
        .find(|check| check.id == id)
        .map(|check| check.outcome.verdict)
        .expect("check present")
}

#[test]
fn exact_scope_passes_every_check_without_appendix() {
    let text = format!(
        "{}\n## Interface Contract\n\n### `lib/a.ts`\n```ts\nexport function add(a: number, b: number): number\n```\n",
        contract_text("S1-001", "Database", &["lib/a.ts", "lib/b.ts"])
    );
    let (_temp, root, contract) = fixture(&text);
    let agent = agent();
    let commands = ScriptedCommands::passing();
    let changes = FixedChanges::always(vec![
        ProducedFile::text("lib/a.ts", ADD_TS),
        ProducedFile::text("lib/b.ts", "export const b = 2;\n"),
    ]);

    let outcome = run_pipeline(
        contract,
        &config(),
        &options(&root, 2, None),
        &agent,
        &commands,
        &changes,
        &|_| {},
    )
    .expect("run");

    assert_eq!(outcome.end, RunEnd::Passed);
    assert_eq!(outcome.implementations, 1);
    assert_eq!(outcome.last_status, Some(OverallStatus::Pass));
    let markdown_path = root.join("tasks/sprint-s1/gate-reports/S1-001-gate.md");
    assert_eq!(outcome.last_report.as_deref(), Some(markdown_path.as_path()));
    let markdown = fs::read_to_string(&markdown_path).expect("read report");
    assert!(markdown.contains("**Status:** PASS\n"));
    assert!(!markdown.contains("Re-Run Appendix"));

    let report = attempt_report(&root, 0);
    assert!(report.re_run_appendix.is_none());
    assert!(report.review_flags.is_empty());
    for id in CheckId::ALL {
        assert_eq!(check(&report, id), Verdict::Pass, "{id:?}");
    }
    assert!(commands.seen().contains(&"advise".to_string()));
    assert_eq!(
        changes.commits(),
        vec![(
            "tasks/sprint-s1/gate-reports/S1-001-gate.md".to_string(),
            "[S1-001] Gate: PASS".to_string()
        )]
    );
}

#[test]
fn extra_file_fails_file_scope_with_one_violation() {
    let (_temp, root, contract) = fixture(&contract_text("S1-001", "Library", &["lib/a.ts"]));
    let agent = agent();
    let commands = ScriptedCommands::passing();
    let changes = FixedChanges::always(vec![
        ProducedFile::text("lib/a.ts", ADD_TS),
        ProducedFile::text("lib/c.ts", "export const c = 3;\n"),
    ]);

    let outcome = run_pipeline(
        contract,
        &config(),
        &options(&root, 0, None),
        &agent,
        &commands,
        &changes,
        &|_| {},
    )
    .expect("run");

    assert_eq!(outcome.end, RunEnd::Failed);
    let report = attempt_report(&root, 0);
    assert_eq!(report.overall_status, OverallStatus::Fail);
    assert_eq!(report.file_scope.extra, vec!["lib/c.ts".to_string()]);
    assert_eq!(check(&report, CheckId::FileScope), Verdict::Fail);
    let appendix = report.re_run_appendix.expect("appendix");
    assert_eq!(appendix.violations.len(), 1);
    assert_eq!(appendix.violations[0].check_ref, CheckId::FileScope.label());
    assert_eq!(appendix.violations[0].file_path.as_deref(), Some("lib/c.ts"));
}

#[test]
fn retry_prompt_carries_previous_appendix_verbatim() {
    let (_temp, root, contract) = fixture(&contract_text("S1-001", "Library", &["lib/a.ts"]));
    let agent = agent();
    let commands = ScriptedCommands::passing();
    let changes = FixedChanges::always(vec![
        ProducedFile::text("lib/a.ts", ADD_TS),
        ProducedFile::text("lib/c.ts", "export const c = 3;\n"),
    ]);
    let events = Mutex::new(Vec::new());
    let sink = |event: &RunEvent<'_>| {
        if let RunEvent::RetryScheduled { next_attempt, .. } = event {
            events.lock().expect("events lock").push(*next_attempt);
        }
    };

    let outcome = run_pipeline(
        contract,
        &config(),
        &options(&root, 1, None),
        &agent,
        &commands,
        &changes,
        &sink,
    )
    .expect("run");

    assert_eq!(outcome.end, RunEnd::Failed);
    assert_eq!(outcome.implementations, 2);
    assert_eq!(*events.lock().expect("events lock"), vec![1]);

    let implement = agent.requests_for(Phase::Implement);
    assert_eq!(implement.len(), 2);
    assert!(!implement[0].prompt.contains("Re-Run Appendix"));
    assert_eq!(implement[0].prior_session, None);
    assert_eq!(implement[1].prior_session, Some(SessionRef("sess-1".to_string())));

    let first = attempt_report(&root, 0);
    let appendix = render_appendix(first.re_run_appendix.as_ref().expect("appendix"));
    assert!(implement[1].prompt.contains(appendix.trim_end()));

    let second = attempt_report(&root, 1);
    assert_eq!(second.attempt, 1);
    assert!(
        agent
            .requests_for(Phase::Validate)
            .iter()
            .all(|request| request.prior_session.is_none())
    );
}

#[test]
fn presentation_contract_skips_the_advisory_scan() {
    let (_temp, root, contract) = fixture(&contract_text(
        "S1-001",
        "Presentation",
        &["components/Widget.tsx"],
    ));
    let agent = agent();
    let commands = ScriptedCommands::passing();
    let changes = FixedChanges::always(vec![ProducedFile::text(
        "components/Widget.tsx",
        "export function Widget(): JSX.Element {\n  return <div />;\n}\n",
    )]);

    let outcome = run_pipeline(
        contract,
        &config(),
        &options(&root, 0, None),
        &agent,
        &commands,
        &changes,
        &|_| {},
    )
    .expect("run");

    let report = attempt_report(&root, 0);
    assert_eq!(check(&report, CheckId::MigrationAdvisory), Verdict::NotApplicable);
    assert_ne!(report.overall_status, OverallStatus::Fail);
    assert_eq!(outcome.end, RunEnd::Passed);
    assert!(!commands.seen().contains(&"advise".to_string()));
}

#[test]
fn always_failing_gate_runs_exactly_retries_plus_one_attempts() {
    for max_retries in 0..3 {
        let (_temp, root, contract) =
            fixture(&contract_text("S1-001", "Library", &["lib/a.ts"]));
        let agent = agent();
        let commands = ScriptedCommands::passing();
        let changes = FixedChanges::always(Vec::new());

        let outcome = run_pipeline(
            contract,
            &config(),
            &options(&root, max_retries, None),
            &agent,
            &commands,
            &changes,
            &|_| {},
        )
        .expect("run");

        assert_eq!(outcome.end, RunEnd::Failed);
        assert_eq!(outcome.implementations, max_retries + 1);
        assert_eq!(agent.requests_for(Phase::Implement).len() as u32, max_retries + 1);
        assert_eq!(changes.calls() as u32, max_retries + 1);
        let last = attempt_report(&root, max_retries);
        assert_eq!(last.file_scope.missing, vec!["lib/a.ts".to_string()]);
        let commits = changes.commits();
        assert_eq!(commits.len() as u32, max_retries + 1);
        assert!(commits.iter().all(|(_, message)| message == "[S1-001] Gate: FAIL"));
    }
}

#[test]
fn a_later_pass_ends_the_loop_early() {
    let (_temp, root, contract) = fixture(&contract_text("S1-001", "Library", &["lib/a.ts"]));
    let agent = agent();
    let commands = ScriptedCommands::passing();
    let changes = FixedChanges::new(vec![
        Vec::new(),
        vec![ProducedFile::text("lib/a.ts", ADD_TS)],
    ]);

    let outcome = run_pipeline(
        contract,
        &config(),
        &options(&root, 3, None),
        &agent,
        &commands,
        &changes,
        &|_| {},
    )
    .expect("run");

    assert_eq!(outcome.end, RunEnd::Passed);
    assert_eq!(outcome.implementations, 2);
    let meta = fs::read_to_string(
        root.join(".pipeline/runs/S1-001")
            .join(STAMP)
            .join("attempt-0/meta.json"),
    )
    .expect("meta");
    assert!(meta.contains("\"overall_status\": \"FAIL\""));
}

#[test]
fn exhausted_turn_budget_aborts_without_retry() {
    let (_temp, root, contract) = fixture(&contract_text("S1-001", "Library", &["lib/a.ts"]));
    let agent = ScriptedAgent::new(vec![AgentStep::exhausted()], Vec::new());
    let commands = ScriptedCommands::passing();
    let changes = FixedChanges::always(Vec::new());

    let err = run_pipeline(
        contract,
        &config(),
        &options(&root, 2, None),
        &agent,
        &commands,
        &changes,
        &|_| {},
    )
    .unwrap_err();

    let exhausted = err.downcast_ref::<AdapterExhausted>().expect("exhausted");
    assert_eq!(exhausted.turn_budget, 40);
    assert_eq!(agent.requests().len(), 1);
    assert_eq!(changes.calls(), 0);
    assert!(!root.join("tasks/sprint-s1/gate-reports/S1-001-gate.md").exists());
    let meta = fs::read_to_string(
        root.join(".pipeline/runs/S1-001")
            .join(STAMP)
            .join("attempt-0/meta.json"),
    )
    .expect("meta");
    assert!(meta.contains("\"overall_status\": null"));
}

#[test]
fn unwritable_report_aborts_the_run() {
    let (_temp, root, contract) = fixture(&contract_text("S1-001", "Library", &["lib/a.ts"]));
    fs::create_dir_all(root.join("tasks/sprint-s1/gate-reports/S1-001-gate.md"))
        .expect("block report path");
    let agent = agent();
    let commands = ScriptedCommands::passing();
    let changes = FixedChanges::always(vec![ProducedFile::text("lib/a.ts", ADD_TS)]);

    let err = run_pipeline(
        contract,
        &config(),
        &options(&root, 2, None),
        &agent,
        &commands,
        &changes,
        &|_| {},
    )
    .unwrap_err();

    assert!(err.downcast_ref::<ReportWriteFailure>().is_some());
    assert_eq!(agent.requests_for(Phase::Implement).len(), 1);
}

#[test]
fn validate_only_judges_without_implementing() {
    let (_temp, root, contract) = fixture(&contract_text("S1-001", "Library", &["lib/a.ts"]));
    let agent = agent();
    let commands = ScriptedCommands::passing();
    let changes = FixedChanges::always(vec![ProducedFile::text("lib/a.ts", ADD_TS)]);

    let outcome = run_pipeline(
        contract,
        &config(),
        &options(&root, 2, Some(PhaseOnly::Validate)),
        &agent,
        &commands,
        &changes,
        &|_| {},
    )
    .expect("run");

    assert_eq!(outcome.end, RunEnd::Passed);
    assert_eq!(outcome.implementations, 0);
    assert!(agent.requests_for(Phase::Implement).is_empty());
    assert_eq!(agent.requests_for(Phase::Validate).len(), 1);
}

#[test]
fn implement_only_never_runs_the_gate() {
    let (_temp, root, contract) = fixture(&contract_text("S1-001", "Library", &["lib/a.ts"]));
    let agent = agent();
    let commands = ScriptedCommands::passing();
    let changes = FixedChanges::always(Vec::new());

    let outcome = run_pipeline(
        contract,
        &config(),
        &options(&root, 2, Some(PhaseOnly::Implement)),
        &agent,
        &commands,
        &changes,
        &|_| {},
    )
    .expect("run");

    assert_eq!(outcome.end, RunEnd::Implemented);
    assert_eq!(outcome.last_report, None);
    assert_eq!(changes.calls(), 0);
    assert!(commands.seen().is_empty());
    assert!(agent.requests_for(Phase::Validate).is_empty());
}

#[test]
fn git_worktree_run_judges_what_the_agent_wrote() {
    let repo = TestRepo::new();
    let root = repo.root();
    let contract_path = write_contract(
        &root,
        "S1-001-fixture.md",
        &contract_text("S1-001", "Library", &["lib/a.ts"]),
    );
    repo.commit("add contract");

    let mut config = config();
    config.agent.run_validator = false;
    let git = Git::new(&root);
    let base = prepare_base(&git, &config, None, None).expect("base");
    let contract = load_contract(&contract_path).expect("load contract");
    let changes = GitChangeSource {
        git,
        base: base.clone(),
        exclude: change_exclusions(&root, &contract, &config),
    };
    let agent = ScriptedAgent::new(
        vec![AgentStep::finished("done", None).writing("lib/a.ts", ADD_TS)],
        Vec::new(),
    );
    let commands = ScriptedCommands::passing();
    let mut options = options(&root, 1, None);
    options.base_rev = base;

    let outcome = run_pipeline(
        contract,
        &config,
        &options,
        &agent,
        &commands,
        &changes,
        &|_| {},
    )
    .expect("run");

    assert_eq!(outcome.end, RunEnd::Passed);
    let report = attempt_report(&root, 0);
    assert_eq!(report.file_scope.received, vec!["lib/a.ts".to_string()]);
    assert!(agent.requests_for(Phase::Validate).is_empty());
    assert_eq!(repo.head_subject(), "[S1-001] Gate: PASS");
}

#[test]
fn report_commit_can_be_switched_off() {
    let (_temp, root, contract) = fixture(&contract_text("S1-001", "Library", &["lib/a.ts"]));
    let agent = agent();
    let commands = ScriptedCommands::passing();
    let changes = FixedChanges::always(vec![ProducedFile::text("lib/a.ts", ADD_TS)]);
    let mut config = config();
    config.gate.commit_report = false;

    let outcome = run_pipeline(
        contract,
        &config,
        &options(&root, 2, None),
        &agent,
        &commands,
        &changes,
        &|_| {},
    )
    .expect("run");

    assert_eq!(outcome.end, RunEnd::Passed);
    assert!(root.join("tasks/sprint-s1/gate-reports/S1-001-gate.md").is_file());
    assert!(changes.commits().is_empty());
}

#[test]
fn dirty_worktree_is_refused_outside_allowed_prefixes() {
    let repo = TestRepo::new();
    let root = repo.root();
    let config = config();
    let git = Git::new(&root);

    repo.write("tasks/S1-002.md", "## Produces\n- a.ts\n");
    repo.write(".pipeline/config.toml", "");
    prepare_base(&git, &config, None, None).expect("tasks and bookkeeping are allowed");

    repo.write("stray.ts", "export {};\n");
    assert!(prepare_base(&git, &config, None, None).is_err());
    assert!(prepare_base(&git, &config, Some(PhaseOnly::Implement), None).is_err());
    prepare_base(&git, &config, Some(PhaseOnly::Validate), Some("HEAD"))
        .expect("validation only accepts a dirty tree");
}
