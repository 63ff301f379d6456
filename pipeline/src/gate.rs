//! Local merge gate: run the gate's external commands, evaluate the produced
//! files, and assemble the report for one attempt.

use std::path::Path;

use tracing::{info, instrument};

use crate::core::contract::TaskContract;
use crate::core::engine::{GateInput, ProducedFile, evaluate};
use crate::core::report::{GateReport, VerificationResult};
use crate::io::commands::{CommandRunner, CommandSpec};
use crate::io::config::GateConfig;

/// Inputs of one gate evaluation.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub repo_root: &'a Path,
    pub contract: &'a TaskContract,
    pub files: &'a [ProducedFile],
    pub config: &'a GateConfig,
    pub attempt: u32,
    /// Advisory verdict read from the validator agent's summary.
    pub agent_verdict: Option<bool>,
    pub generated_at: &'a str,
}

/// Evaluate one attempt. Never fails: command problems become check verdicts.
#[instrument(skip_all, fields(task_id = %request.contract.id, attempt = request.attempt, files = request.files.len()))]
pub fn run_gate<C: CommandRunner>(runner: &C, request: &GateRequest<'_>) -> GateReport {
    let contract = request.contract;
    let config = request.config;

    let compile = (!config.compile_command.is_empty())
        .then(|| runner.run(CommandSpec::Argv(&config.compile_command), request.repo_root));

    let wants_advisory = contract.layer.is_some_and(|layer| layer.is_data_layer());
    let advisory = (wants_advisory && !config.advisory_command.is_empty())
        .then(|| runner.run(CommandSpec::Argv(&config.advisory_command), request.repo_root));

    let verification: Vec<VerificationResult> = contract
        .verification_commands
        .iter()
        .map(|line| VerificationResult::from_outcome(&runner.run(CommandSpec::Shell(line), request.repo_root)))
        .collect();

    let evaluation = evaluate(&GateInput {
        contract,
        files: request.files,
        compile: compile.as_ref(),
        advisory: advisory.as_ref(),
        rules: &config.rules,
    });

    let report = GateReport::assemble(
        contract,
        evaluation,
        verification,
        request.agent_verdict,
        request.attempt,
        request.generated_at.to_string(),
    );
    info!(
        status = %report.overall_status,
        failed_checks = report.failed_checks(),
        review_flags = report.review_flags.len(),
        "gate evaluated"
    );
    report
}
