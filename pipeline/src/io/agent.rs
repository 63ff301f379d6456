//! Agent runtime abstraction.
//!
//! The [`AgentRuntime`] trait is the pipeline's only dependency on the code
//! generation backend (currently the `claude` CLI in print mode). Tests use
//! scripted runtimes that return predetermined transcripts without spawning
//! processes.

use std::path::PathBuf;
use std::process::Command;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::engine::excerpt;
use crate::core::types::{Phase, SessionRef};
use crate::error::AdapterFailed;
use crate::io::config::PermissionMode;
use crate::io::process::{LineTee, Limits, run_teed};

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub phase: Phase,
    pub prompt: String,
    /// Phase rules appended to the runtime's own system prompt.
    pub system_prompt: Option<String>,
    /// Tool allowlist.
    pub allowed_capabilities: Vec<String>,
    pub permission_mode: PermissionMode,
    /// Interaction rounds, not wall-clock time.
    pub turn_budget: u32,
    pub workdir: PathBuf,
    /// Resume this session instead of starting a fresh context.
    pub prior_session: Option<SessionRef>,
    /// Where to tee the raw event stream, one JSON object per line.
    pub stream_path: Option<PathBuf>,
}

/// Terminal event of an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResult {
    pub text: String,
    pub session: Option<SessionRef>,
    /// The runtime stopped because the turn budget ran out.
    pub exhausted: bool,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    Text(String),
    ToolInvocation(String),
    Result(AgentResult),
}

/// Ordered events of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentTranscript {
    pub events: Vec<AgentEvent>,
}

impl AgentTranscript {
    /// The last terminal result, if the runtime emitted one.
    pub fn result(&self) -> Option<&AgentResult> {
        self.events.iter().rev().find_map(|event| match event {
            AgentEvent::Result(result) => Some(result),
            _ => None,
        })
    }
}

pub trait AgentRuntime {
    /// Run the agent to completion. `on_event` sees each event as it arrives.
    fn invoke(
        &self,
        request: &AgentRequest,
        on_event: &(dyn Fn(&AgentEvent) + Sync),
    ) -> Result<AgentTranscript>;
}

/// Runtime that spawns `claude -p --output-format stream-json`.
#[derive(Debug, Clone)]
pub struct ClaudeCliRuntime {
    pub binary: String,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl ClaudeCliRuntime {
    fn command(&self, request: &AgentRequest) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("stream-json")
            // stream-json in print mode requires verbose output.
            .arg("--verbose")
            .arg("--permission-mode")
            .arg(request.permission_mode.as_cli_arg())
            .arg("--max-turns")
            .arg(request.turn_budget.to_string());
        if !request.allowed_capabilities.is_empty() {
            cmd.arg("--allowedTools")
                .arg(request.allowed_capabilities.join(","));
        }
        if let Some(session) = &request.prior_session {
            cmd.arg("--resume").arg(session.as_str());
        }
        if let Some(system_prompt) = &request.system_prompt {
            cmd.arg("--append-system-prompt").arg(system_prompt);
        }
        cmd.current_dir(&request.workdir);
        cmd
    }
}

impl AgentRuntime for ClaudeCliRuntime {
    #[instrument(skip_all, fields(phase = %request.phase, turn_budget = request.turn_budget, resume = request.prior_session.is_some()))]
    fn invoke(
        &self,
        request: &AgentRequest,
        on_event: &(dyn Fn(&AgentEvent) + Sync),
    ) -> Result<AgentTranscript> {
        info!(workdir = %request.workdir.display(), "starting agent");
        let events = Mutex::new(Vec::new());
        let on_line = |line: &str| {
            for event in parse_stream_line(line) {
                on_event(&event);
                if let Ok(mut events) = events.lock() {
                    events.push(event);
                }
            }
        };

        let output = run_teed(
            self.command(request),
            Some(request.prompt.as_bytes()),
            Limits {
                timeout: self.timeout,
                output_bytes: self.output_limit_bytes,
            },
            LineTee {
                file: request.stream_path.as_deref(),
                on_line: Some(&on_line),
            },
        )
        .with_context(|| format!("run {}", self.binary))?;

        let transcript = AgentTranscript {
            events: events.into_inner().unwrap_or_else(PoisonError::into_inner),
        };

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent timed out");
            return Err(AdapterFailed {
                phase: request.phase,
                detail: format!("timed out after {}s", self.timeout.as_secs()),
            }
            .into());
        }
        if transcript.result().is_none() && !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed without a result");
            let stderr = output.stderr.text();
            return Err(AdapterFailed {
                phase: request.phase,
                detail: format!(
                    "exit code {:?}: {}",
                    output.status.code(),
                    excerpt(&stderr, 5)
                ),
            }
            .into());
        }

        debug!(events = transcript.events.len(), "agent finished");
        Ok(transcript)
    }
}

/// Map one stream-json line onto zero or more events. Unknown lines map to none.
pub fn parse_stream_line(line: &str) -> Vec<AgentEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            debug!(err = %err, "skipping non-json stream line");
            return Vec::new();
        }
    };
    match value.get("type").and_then(Value::as_str) {
        Some("assistant") => value
            .pointer("/message/content")
            .and_then(Value::as_array)
            .map(|blocks| blocks.iter().filter_map(content_event).collect())
            .unwrap_or_default(),
        Some("result") => {
            let subtype = value.get("subtype").and_then(Value::as_str).unwrap_or("");
            vec![AgentEvent::Result(AgentResult {
                text: value
                    .get("result")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                session: value
                    .get("session_id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(|id| SessionRef(id.to_string())),
                exhausted: subtype == "error_max_turns",
                is_error: value
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(subtype.starts_with("error")),
            })]
        }
        _ => Vec::new(),
    }
}

fn content_event(block: &Value) -> Option<AgentEvent> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => {
            let text = block.get("text").and_then(Value::as_str)?.trim();
            (!text.is_empty()).then(|| AgentEvent::Text(text.to_string()))
        }
        "tool_use" => block
            .get("name")
            .and_then(Value::as_str)
            .map(|name| AgentEvent::ToolInvocation(name.to_string())),
        _ => None,
    }
}
