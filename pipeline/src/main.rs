//! Contract-driven build pipeline.
//!
//! Drives a task contract through an implementation phase and the merge gate,
//! retrying with the gate's Re-Run Appendix until the gate passes or the
//! retry budget is spent.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};

use contract_pipeline::error::{AdapterExhausted, ReportWriteFailure};
use contract_pipeline::exit_codes;
use contract_pipeline::io::agent::{AgentEvent, ClaudeCliRuntime};
use contract_pipeline::io::attempt_log::run_stamp;
use contract_pipeline::io::changes::GitChangeSource;
use contract_pipeline::io::commands::ProcessRunner;
use contract_pipeline::io::config::load_config;
use contract_pipeline::io::contract::load_contract;
use contract_pipeline::io::git::Git;
use contract_pipeline::logging;
use contract_pipeline::orchestrator::{
    PhaseOnly, RunEnd, RunOptions, RunOutcome, change_exclusions, prepare_base, run_pipeline,
};
use contract_pipeline::phases::RunEvent;

#[derive(Parser, Debug)]
#[command(
    name = "pipeline",
    version,
    about = "Drive a task contract through implementation and the merge gate"
)]
struct Cli {
    /// Task contract (Markdown).
    #[arg(long)]
    contract: PathBuf,

    /// Repository root the agent works in.
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Recovery cycles after the first attempt [config default: 2].
    #[arg(long)]
    retries: Option<u32>,

    /// Agent turn budget per phase [config default: 80].
    #[arg(long)]
    max_turns: Option<u32>,

    /// Run a single phase instead of the retry loop.
    #[arg(long, value_enum)]
    phase_only: Option<PhaseArg>,

    /// Base revision produced files are measured against (default: HEAD).
    #[arg(long)]
    base: Option<String>,

    /// Config file [default: <repo>/.pipeline/config.toml].
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PhaseArg {
    /// Implementation only.
    #[value(name = "2a")]
    Implement,
    /// Validation only.
    #[value(name = "3")]
    Validate,
}

impl From<PhaseArg> for PhaseOnly {
    fn from(arg: PhaseArg) -> Self {
        match arg {
            PhaseArg::Implement => PhaseOnly::Implement,
            PhaseArg::Validate => PhaseOnly::Validate,
        }
    }
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(outcome) => process::exit(conclude(&outcome)),
        Err(err) => {
            eprintln!("error: {err:#}");
            if err.downcast_ref::<AdapterExhausted>().is_some() {
                eprintln!("note: turn exhaustion is not retried; raise --max-turns or split the contract");
            }
            if err.downcast_ref::<ReportWriteFailure>().is_some() {
                eprintln!("note: the attempt was not recorded and does not count as passed");
            }
            process::exit(exit_codes::ABORTED);
        }
    }
}

fn run(cli: &Cli) -> Result<RunOutcome> {
    let contract = load_contract(&cli.contract)?;
    let repo_root = cli
        .repo
        .canonicalize()
        .with_context(|| format!("resolve repository {}", cli.repo.display()))?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| repo_root.join(".pipeline").join("config.toml"));
    let mut config = load_config(&config_path)?;
    if let Some(retries) = cli.retries {
        config.pipeline.max_retries = retries;
    }
    if let Some(max_turns) = cli.max_turns {
        config.pipeline.max_turns = max_turns;
    }
    config.validate()?;

    let phase_only = cli.phase_only.map(PhaseOnly::from);
    let git = Git::new(&repo_root);
    let base_rev = prepare_base(&git, &config, phase_only, cli.base.as_deref())?;
    let changes = GitChangeSource {
        git,
        base: base_rev.clone(),
        exclude: change_exclusions(&repo_root, &contract, &config),
    };
    let agent = ClaudeCliRuntime {
        binary: config.agent.binary.clone(),
        timeout: Duration::from_secs(config.agent.timeout_secs),
        output_limit_bytes: config.agent.output_limit_bytes,
    };
    let commands = ProcessRunner {
        timeout: Duration::from_secs(config.gate.command_timeout_secs),
        output_limit_bytes: config.gate.output_limit_bytes,
    };
    let options = RunOptions {
        repo_root,
        max_retries: config.pipeline.max_retries,
        max_turns: config.pipeline.max_turns,
        phase_only,
        base_rev,
        run_stamp: run_stamp(Utc::now()),
    };

    run_pipeline(
        contract,
        &config,
        &options,
        &agent,
        &commands,
        &changes,
        &print_event,
    )
}

fn print_event(event: &RunEvent<'_>) {
    match event {
        RunEvent::PhaseStarted { phase, attempt } => {
            println!("==> {phase} (attempt {})", attempt + 1);
        }
        RunEvent::Agent { event, .. } => match event {
            AgentEvent::Text(text) => println!("{text}"),
            AgentEvent::ToolInvocation(name) => println!("  [tool] {name}"),
            AgentEvent::Result(_) => {}
        },
        RunEvent::ReportWritten {
            attempt,
            status,
            path,
        } => {
            println!("gate: {status} (attempt {}) {}", attempt + 1, path.display());
        }
        RunEvent::RetryScheduled {
            next_attempt,
            max_retries,
        } => {
            println!("retrying with the Re-Run Appendix ({next_attempt} of {max_retries})");
        }
    }
}

/// Print the run summary and pick the exit code.
fn conclude(outcome: &RunOutcome) -> i32 {
    match outcome.end {
        RunEnd::Passed => {
            let status = outcome
                .last_status
                .map(|status| status.to_string())
                .unwrap_or_default();
            println!("[{}] Gate: {status}", outcome.task_id);
            exit_codes::OK
        }
        RunEnd::Implemented => {
            println!("[{}] implementation phase complete", outcome.task_id);
            exit_codes::OK
        }
        RunEnd::Failed => {
            println!(
                "[{}] Gate: FAIL after {} implementation attempt(s)",
                outcome.task_id, outcome.implementations
            );
            if let Some(report) = &outcome.last_report {
                println!("last gate report: {}", report.display());
            }
            println!("attempt logs: {}", outcome.run_dir.display());
            exit_codes::GATE_FAILED
        }
    }
}
