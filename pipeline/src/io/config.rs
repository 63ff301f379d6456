//! Pipeline configuration stored under `.pipeline/config.toml`.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::engine::RuleParams;

/// Pipeline configuration (TOML).
///
/// Meant to be edited by humans and checked into the target repository.
/// Missing fields default to the values the pipeline ships with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub pipeline: RunConfig,
    pub agent: AgentConfig,
    pub gate: GateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// Recovery cycles after the first attempt.
    pub max_retries: u32,

    /// Turn budget handed to the agent runtime per phase.
    pub max_turns: u32,

    /// Refuse to start on a dirty worktree.
    pub require_clean_worktree: bool,

    /// Paths never treated as produced files (pipeline bookkeeping).
    pub ignore_prefixes: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_turns: 80,
            require_clean_worktree: true,
            ignore_prefixes: vec![".pipeline/".to_string()],
        }
    }
}

/// How the agent runtime may touch the working directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

impl PermissionMode {
    /// Flag value understood by the agent CLI.
    pub fn as_cli_arg(self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent CLI executable.
    pub binary: String,

    /// Wall-clock ceiling per agent invocation, in seconds.
    pub timeout_secs: u64,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub permission_mode: PermissionMode,

    /// Tool allowlist for the implementation phase.
    pub implement_tools: Vec<String>,

    /// Tool allowlist for the validation phase.
    pub validate_tools: Vec<String>,

    /// Invoke the validator agent before the local gate (its verdict is advisory).
    pub run_validator: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let tools = |names: &[&str]| names.iter().map(|name| name.to_string()).collect();
        Self {
            binary: "claude".to_string(),
            timeout_secs: 2 * 60 * 60,
            output_limit_bytes: 4_000_000,
            permission_mode: PermissionMode::AcceptEdits,
            implement_tools: tools(&["Read", "Edit", "Write", "Bash", "Glob", "Grep"]),
            validate_tools: tools(&["Read", "Glob", "Grep", "Bash", "Write"]),
            run_validator: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GateConfig {
    /// Type check command (check 1), e.g. `["npx","tsc","--noEmit"]`.
    pub compile_command: Vec<String>,

    /// Security advisory scan for database contracts (check 10). Empty means not configured.
    pub advisory_command: Vec<String>,

    /// Timeout per gate command, in seconds.
    pub command_timeout_secs: u64,

    /// Truncate gate command output beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Commit each authoritative report as `[<task>] Gate: <STATUS>`.
    pub commit_report: bool,

    pub rules: RuleParams,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            compile_command: vec!["npx".to_string(), "tsc".to_string(), "--noEmit".to_string()],
            advisory_command: Vec::new(),
            command_timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
            commit_report: true,
            rules: RuleParams::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_turns == 0 {
            return Err(anyhow!("pipeline.max_turns must be > 0"));
        }
        if self.agent.binary.trim().is_empty() {
            return Err(anyhow!("agent.binary must be non-empty"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.implement_tools.is_empty() {
            return Err(anyhow!("agent.implement_tools must be a non-empty array"));
        }
        if self.gate.compile_command.is_empty() || self.gate.compile_command[0].trim().is_empty() {
            return Err(anyhow!("gate.compile_command must be a non-empty array"));
        }
        if self
            .gate
            .advisory_command
            .first()
            .is_some_and(|program| program.trim().is_empty())
        {
            return Err(anyhow!("gate.advisory_command must start with a program"));
        }
        if self.gate.command_timeout_secs == 0 {
            return Err(anyhow!("gate.command_timeout_secs must be > 0"));
        }
        if self.gate.output_limit_bytes == 0 {
            return Err(anyhow!("gate.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load `path`, falling back to defaults when the file does not exist.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let config: PipelineConfig = match fs::read_to_string(path) {
        Ok(text) => toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound => PipelineConfig::default(),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}
