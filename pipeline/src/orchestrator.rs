//! Drive one contract through implement/validate cycles until the gate
//! passes or the retry budget runs out.

use std::path::{Path, PathBuf};

use anyhow::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use crate::core::contract::TaskContract;
use crate::core::layers::normalize;
use crate::core::render::render_appendix;
use crate::core::run::{PipelineRun, RunStatus};
use crate::core::types::{OverallStatus, SessionRef};
use crate::io::agent::AgentRuntime;
use crate::io::attempt_log::{AttemptMeta, AttemptPaths, run_dir, write_meta};
use crate::io::changes::ChangeSource;
use crate::io::commands::CommandRunner;
use crate::io::config::PipelineConfig;
use crate::io::git::Git;
use crate::phases::{EventSink, PhaseEnv, RunEvent, Validation};

/// Pipeline bookkeeping lives here regardless of configuration.
const PIPELINE_DIR: &str = ".pipeline/";

/// Run a single phase instead of the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOnly {
    /// Implementation only (`2a`).
    Implement,
    /// Validation only (`3`), against an explicit base revision.
    Validate,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Canonical repository root.
    pub repo_root: PathBuf,
    pub max_retries: u32,
    pub max_turns: u32,
    pub phase_only: Option<PhaseOnly>,
    /// Commit the produced-file set is measured against.
    pub base_rev: String,
    pub run_stamp: String,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Passed,
    Failed,
    /// `--phase-only 2a` finished its implementation phase.
    Implemented,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub task_id: String,
    pub end: RunEnd,
    /// Implementation phases executed.
    pub implementations: u32,
    pub last_status: Option<OverallStatus>,
    /// Markdown report written by the last validation phase.
    pub last_report: Option<PathBuf>,
    pub run_dir: PathBuf,
}

/// Execute the pipeline for `contract`.
///
/// Gate FAILs feed the retry policy; every other error aborts the run.
#[instrument(skip_all, fields(task_id = %contract.id, max_retries = options.max_retries, phase_only = ?options.phase_only))]
pub fn run_pipeline<A: AgentRuntime, C: CommandRunner, S: ChangeSource>(
    contract: TaskContract,
    config: &PipelineConfig,
    options: &RunOptions,
    agent: &A,
    commands: &C,
    changes: &S,
    on_event: EventSink<'_>,
) -> Result<RunOutcome> {
    let env = PhaseEnv {
        repo_root: &options.repo_root,
        config,
        turn_budget: options.max_turns,
        agent,
        commands,
        changes,
    };
    let record = AttemptRecord {
        task_id: contract.id.clone(),
        run_stamp: &options.run_stamp,
        base_rev: &options.base_rev,
        report_relpath: normalize(&contract.report_relpath().display().to_string()),
    };
    let run_dir = run_dir(&options.repo_root, &contract.id, &options.run_stamp);
    info!(base = %options.base_rev, run_dir = %run_dir.display(), "starting run");

    match options.phase_only {
        None => full_run(&env, &record, contract, options.max_retries, &run_dir, on_event),
        Some(PhaseOnly::Implement) => implement_only(&env, &record, contract, &run_dir, on_event),
        Some(PhaseOnly::Validate) => validate_only(&env, &record, contract, &run_dir, on_event),
    }
}

fn full_run<A: AgentRuntime, C: CommandRunner, S: ChangeSource>(
    env: &PhaseEnv<'_, A, C, S>,
    record: &AttemptRecord<'_>,
    contract: TaskContract,
    max_retries: u32,
    run_dir: &Path,
    on_event: EventSink<'_>,
) -> Result<RunOutcome> {
    let task_id = contract.id.clone();
    let mut run = PipelineRun::new(contract, max_retries);
    loop {
        run.begin_implementation().map_err(Error::msg)?;
        let attempt = run.attempt();
        let paths = AttemptPaths::new(run_dir, attempt);
        let started_at = Utc::now();

        let result = (|| -> Result<Validation> {
            let session = env.implement(&run, &paths, on_event)?;
            run.finish_implementation(session).map_err(Error::msg)?;
            env.validate(run.contract(), attempt, &paths, on_event)
        })();
        let validation = match result {
            Ok(validation) => validation,
            Err(err) => {
                return Err(record.abort(&paths, attempt, started_at, run.session_ref(), err));
            }
        };
        let status = validation.report.overall_status;
        record.write(&paths, attempt, started_at, run.session_ref(), Some(status))?;

        let appendix = validation
            .report
            .re_run_appendix
            .as_ref()
            .map(render_appendix);
        let next = run.record_gate(status, appendix).map_err(Error::msg)?;
        info!(attempt, status = %status, next = ?next, "attempt finished");

        let end = match next {
            RunStatus::Passed => RunEnd::Passed,
            RunStatus::Failed => RunEnd::Failed,
            _ => {
                on_event(&RunEvent::RetryScheduled {
                    next_attempt: attempt + 1,
                    max_retries,
                });
                continue;
            }
        };
        return Ok(RunOutcome {
            task_id,
            end,
            implementations: attempt + 1,
            last_status: Some(status),
            last_report: Some(validation.stored.markdown_path),
            run_dir: run_dir.to_path_buf(),
        });
    }
}

fn implement_only<A: AgentRuntime, C: CommandRunner, S: ChangeSource>(
    env: &PhaseEnv<'_, A, C, S>,
    record: &AttemptRecord<'_>,
    contract: TaskContract,
    run_dir: &Path,
    on_event: EventSink<'_>,
) -> Result<RunOutcome> {
    let task_id = contract.id.clone();
    let mut run = PipelineRun::new(contract, 0);
    run.begin_implementation().map_err(Error::msg)?;
    let paths = AttemptPaths::new(run_dir, 0);
    let started_at = Utc::now();

    let session = match env.implement(&run, &paths, on_event) {
        Ok(session) => session,
        Err(err) => return Err(record.abort(&paths, 0, started_at, None, err)),
    };
    run.finish_implementation(session).map_err(Error::msg)?;
    record.write(&paths, 0, started_at, run.session_ref(), None)?;

    Ok(RunOutcome {
        task_id,
        end: RunEnd::Implemented,
        implementations: 1,
        last_status: None,
        last_report: None,
        run_dir: run_dir.to_path_buf(),
    })
}

fn validate_only<A: AgentRuntime, C: CommandRunner, S: ChangeSource>(
    env: &PhaseEnv<'_, A, C, S>,
    record: &AttemptRecord<'_>,
    contract: TaskContract,
    run_dir: &Path,
    on_event: EventSink<'_>,
) -> Result<RunOutcome> {
    let paths = AttemptPaths::new(run_dir, 0);
    let started_at = Utc::now();

    let validation = match env.validate(&contract, 0, &paths, on_event) {
        Ok(validation) => validation,
        Err(err) => return Err(record.abort(&paths, 0, started_at, None, err)),
    };
    let status = validation.report.overall_status;
    record.write(&paths, 0, started_at, None, Some(status))?;
    Ok(RunOutcome {
        task_id: contract.id,
        end: if status.is_passing() {
            RunEnd::Passed
        } else {
            RunEnd::Failed
        },
        implementations: 0,
        last_status: Some(status),
        last_report: Some(validation.stored.markdown_path),
        run_dir: run_dir.to_path_buf(),
    })
}

/// Fields shared by every attempt's `meta.json`.
struct AttemptRecord<'a> {
    task_id: String,
    run_stamp: &'a str,
    base_rev: &'a str,
    report_relpath: String,
}

impl AttemptRecord<'_> {
    fn write(
        &self,
        paths: &AttemptPaths,
        attempt: u32,
        started_at: DateTime<Utc>,
        session: Option<&SessionRef>,
        status: Option<OverallStatus>,
    ) -> Result<()> {
        let ended_at = Utc::now();
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
        write_meta(
            paths,
            &AttemptMeta {
                task_id: self.task_id.clone(),
                run_stamp: self.run_stamp.to_string(),
                attempt,
                base_rev: self.base_rev.to_string(),
                session_ref: session.cloned(),
                overall_status: status,
                report_path: status.map(|_| self.report_relpath.clone()),
                started_at: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                ended_at: ended_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                duration_ms,
            },
        )
    }

    /// Record an aborted attempt and hand the error back. A meta write
    /// failure never masks the phase's own error.
    fn abort(
        &self,
        paths: &AttemptPaths,
        attempt: u32,
        started_at: DateTime<Utc>,
        session: Option<&SessionRef>,
        err: Error,
    ) -> Error {
        warn!(attempt, err = %err, "attempt aborted");
        if let Err(meta_err) = self.write(paths, attempt, started_at, session, None) {
            warn!(err = %meta_err, "failed to record aborted attempt");
        }
        err
    }
}

/// Commit the produced-file set is measured against.
///
/// Full runs and implementation-only runs start from a clean worktree
/// (bookkeeping and `tasks/` changes excepted) and record `HEAD`.
pub fn prepare_base(
    git: &Git,
    config: &PipelineConfig,
    phase_only: Option<PhaseOnly>,
    base: Option<&str>,
) -> Result<String> {
    if phase_only != Some(PhaseOnly::Validate) && config.pipeline.require_clean_worktree {
        let mut allowed: Vec<&str> = config
            .pipeline
            .ignore_prefixes
            .iter()
            .map(String::as_str)
            .collect();
        allowed.extend([PIPELINE_DIR, "tasks/"]);
        git.require_clean(&allowed)?;
    }
    match base {
        Some(rev) => git.rev_parse(rev),
        None => git.head_sha(),
    }
}

/// Paths never judged as produced files: bookkeeping, the report directory
/// and the contract itself.
pub fn change_exclusions(
    repo_root: &Path,
    contract: &TaskContract,
    config: &PipelineConfig,
) -> Vec<String> {
    let mut exclude = config.pipeline.ignore_prefixes.clone();
    exclude.push(PIPELINE_DIR.to_string());
    exclude.push(contract.report_dir_relpath());
    if let Ok(relative) = contract.path.strip_prefix(repo_root) {
        exclude.push(normalize(&relative.display().to_string()));
    }
    exclude.sort();
    exclude.dedup();
    exclude
}
