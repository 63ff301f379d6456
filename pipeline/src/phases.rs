//! The two phase kinds: implement and validate.
//!
//! Each phase drives the agent runtime once. Exhausting the turn budget or a
//! runtime error is a hard failure of the phase; only the structured gate
//! report decides whether an attempt passed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing::{info, instrument, warn};

use crate::core::contract::TaskContract;
use crate::core::layers::normalize;
use crate::core::render::commit_message;
use crate::core::report::GateReport;
use crate::core::review::text_verdict;
use crate::core::run::PipelineRun;
use crate::core::types::{OverallStatus, Phase, SessionRef};
use crate::error::{AdapterExhausted, AdapterFailed, ReportWriteFailure};
use crate::gate::{GateRequest, run_gate};
use crate::io::agent::{AgentEvent, AgentRequest, AgentResult, AgentRuntime, AgentTranscript};
use crate::io::attempt_log::{AttemptPaths, write_prompt};
use crate::io::changes::ChangeSource;
use crate::io::commands::CommandRunner;
use crate::io::config::PipelineConfig;
use crate::io::prompt::{ValidationSlots, implementation_prompt, system_prompt, validation_prompt};
use crate::io::report_store::{StoredReport, store_report};

/// Progress reported to the caller while a run executes.
#[derive(Debug)]
pub enum RunEvent<'a> {
    PhaseStarted { phase: Phase, attempt: u32 },
    Agent { phase: Phase, event: &'a AgentEvent },
    ReportWritten { attempt: u32, status: OverallStatus, path: &'a Path },
    RetryScheduled { next_attempt: u32, max_retries: u32 },
}

/// Callback receiving [`RunEvent`]s.
pub type EventSink<'s> = &'s (dyn Fn(&RunEvent<'_>) + Sync);

/// Collaborators and settings shared by both phases.
pub struct PhaseEnv<'a, A, C, S> {
    pub repo_root: &'a Path,
    pub config: &'a PipelineConfig,
    pub turn_budget: u32,
    pub agent: &'a A,
    pub commands: &'a C,
    pub changes: &'a S,
}

/// Result of one validation phase.
#[derive(Debug, Clone)]
pub struct Validation {
    pub report: GateReport,
    pub stored: StoredReport,
}

impl<A: AgentRuntime, C: CommandRunner, S: ChangeSource> PhaseEnv<'_, A, C, S> {
    /// Run the implementation agent for the current attempt. Returns the
    /// session handle the runtime offered, if any.
    #[instrument(skip_all, fields(task_id = %run.contract().id, attempt = run.attempt()))]
    pub fn implement(
        &self,
        run: &PipelineRun,
        paths: &AttemptPaths,
        on_event: EventSink<'_>,
    ) -> Result<Option<SessionRef>> {
        let phase = Phase::Implement;
        on_event(&RunEvent::PhaseStarted {
            phase,
            attempt: run.attempt(),
        });

        let prompt = implementation_prompt(
            &self.config.gate.rules,
            &run.contract().text,
            run.feedback(),
        )?;
        write_prompt(&paths.implement_prompt_path, &prompt)?;

        let request = AgentRequest {
            phase,
            prompt,
            system_prompt: Some(system_prompt(phase, self.repo_root)),
            allowed_capabilities: self.config.agent.implement_tools.clone(),
            permission_mode: self.config.agent.permission_mode,
            turn_budget: self.turn_budget,
            workdir: self.repo_root.to_path_buf(),
            prior_session: run.session_ref().cloned(),
            stream_path: Some(paths.implement_stream_path.clone()),
        };
        let transcript = self.invoke(&request, on_event)?;
        let result = require_result(&request, &transcript)?;
        info!(session = ?result.session, "implementation finished");
        Ok(result.session.clone())
    }

    /// Judge the working tree for `attempt` and persist the report.
    #[instrument(skip_all, fields(task_id = %contract.id, attempt = attempt))]
    pub fn validate(
        &self,
        contract: &TaskContract,
        attempt: u32,
        paths: &AttemptPaths,
        on_event: EventSink<'_>,
    ) -> Result<Validation> {
        let phase = Phase::Validate;
        on_event(&RunEvent::PhaseStarted { phase, attempt });

        let agent_verdict = if self.config.agent.run_validator {
            Some(self.run_validator(contract, paths, on_event)?)
        } else {
            None
        };

        let files = self
            .changes
            .produced_files()
            .context("enumerate produced files")?;
        let generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let report = run_gate(
            self.commands,
            &GateRequest {
                repo_root: self.repo_root,
                contract,
                files: &files,
                config: &self.config.gate,
                attempt,
                agent_verdict,
                generated_at: &generated_at,
            },
        );

        let stored = store_report(
            self.repo_root,
            &contract.report_relpath(),
            &paths.report_json_path,
            &report,
        )?;
        if self.config.gate.commit_report {
            let relpath = normalize(&contract.report_relpath().display().to_string());
            self.changes
                .commit_report(&relpath, &commit_message(&report))
                .with_context(|| ReportWriteFailure {
                    path: stored.markdown_path.clone(),
                })?;
        }
        on_event(&RunEvent::ReportWritten {
            attempt,
            status: report.overall_status,
            path: &stored.markdown_path,
        });
        Ok(Validation { report, stored })
    }

    /// Ask the validator agent for its own assessment. Fresh context; its
    /// summary only feeds the advisory verdict.
    fn run_validator(
        &self,
        contract: &TaskContract,
        paths: &AttemptPaths,
        on_event: EventSink<'_>,
    ) -> Result<bool> {
        let phase = Phase::Validate;
        let contract_path = contract.path.display().to_string();
        let draft_path = relative_display(self.repo_root, &paths.validator_report_path);
        let prompt = validation_prompt(ValidationSlots {
            task_id: &contract.id,
            contract_path: &contract_path,
            sprint_phase: &contract.sprint_phase,
            report_path: &draft_path,
        })?;
        write_prompt(&paths.validate_prompt_path, &prompt)?;

        let request = AgentRequest {
            phase,
            prompt,
            system_prompt: Some(system_prompt(phase, self.repo_root)),
            allowed_capabilities: self.config.agent.validate_tools.clone(),
            permission_mode: self.config.agent.permission_mode,
            turn_budget: self.turn_budget,
            workdir: self.repo_root.to_path_buf(),
            prior_session: None,
            stream_path: Some(paths.validate_stream_path.clone()),
        };
        let transcript = self.invoke(&request, on_event)?;
        let result = require_result(&request, &transcript)?;
        let verdict = text_verdict(&result.text);
        info!(agent_verdict = verdict, "validator agent finished");
        Ok(verdict)
    }

    fn invoke(&self, request: &AgentRequest, on_event: EventSink<'_>) -> Result<AgentTranscript> {
        let phase = request.phase;
        let forward = |event: &AgentEvent| on_event(&RunEvent::Agent { phase, event });
        self.agent.invoke(request, &forward)
    }
}

/// The terminal result of a phase, or the hard failure it amounts to.
pub fn require_result<'t>(
    request: &AgentRequest,
    transcript: &'t AgentTranscript,
) -> Result<&'t AgentResult> {
    let exhausted = || AdapterExhausted {
        phase: request.phase,
        turn_budget: request.turn_budget,
    };
    let Some(result) = transcript.result() else {
        warn!(phase = %request.phase, "agent stream ended without a result");
        return Err(exhausted().into());
    };
    if result.exhausted {
        warn!(phase = %request.phase, turn_budget = request.turn_budget, "agent exhausted its turn budget");
        return Err(exhausted().into());
    }
    if result.is_error {
        return Err(AdapterFailed {
            phase: request.phase,
            detail: if result.text.is_empty() {
                "runtime reported an error".to_string()
            } else {
                result.text.clone()
            },
        }
        .into());
    }
    Ok(result)
}

fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(PathBuf::from)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
