//! Pipeline run state machine.
//!
//! `Pending -> Implementing -> Validating -> {RetryPending -> Implementing, Passed, Failed}`.
//! Transitions are pure and reject out-of-order calls; the orchestrator owns
//! the side effects between them.

use serde::{Deserialize, Serialize};

use crate::core::contract::TaskContract;
use crate::core::types::{OverallStatus, SessionRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Implementing,
    Validating,
    RetryPending,
    Passed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Passed | RunStatus::Failed)
    }
}

/// One pipeline invocation for one contract.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    contract: TaskContract,
    max_retries: u32,
    attempt: u32,
    session_ref: Option<SessionRef>,
    status: RunStatus,
    /// Rendered Re-Run Appendix of the last failed gate, fed to the next attempt.
    last_appendix: Option<String>,
}

impl PipelineRun {
    pub fn new(contract: TaskContract, max_retries: u32) -> Self {
        PipelineRun {
            contract,
            max_retries,
            attempt: 0,
            session_ref: None,
            status: RunStatus::Pending,
            last_appendix: None,
        }
    }

    pub fn contract(&self) -> &TaskContract {
        &self.contract
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn session_ref(&self) -> Option<&SessionRef> {
        self.session_ref.as_ref()
    }

    /// Appendix text the current implementation attempt must address.
    pub fn feedback(&self) -> Option<&str> {
        self.last_appendix.as_deref()
    }

    /// `Pending | RetryPending -> Implementing`. A retry advances the attempt counter.
    pub fn begin_implementation(&mut self) -> Result<(), String> {
        match self.status {
            RunStatus::Pending => {}
            RunStatus::RetryPending => self.attempt += 1,
            other => return Err(format!("cannot start implementation from {other:?}")),
        }
        self.status = RunStatus::Implementing;
        Ok(())
    }

    /// `Implementing -> Validating`, unconditionally. A new session handle
    /// replaces the old one; without one the previous handle carries forward.
    pub fn finish_implementation(&mut self, session: Option<SessionRef>) -> Result<(), String> {
        if self.status != RunStatus::Implementing {
            return Err(format!("cannot finish implementation from {:?}", self.status));
        }
        if session.is_some() {
            self.session_ref = session;
        }
        self.status = RunStatus::Validating;
        Ok(())
    }

    /// `Validating -> Passed | RetryPending | Failed` from the structured gate status.
    pub fn record_gate(
        &mut self,
        status: OverallStatus,
        appendix: Option<String>,
    ) -> Result<RunStatus, String> {
        if self.status != RunStatus::Validating {
            return Err(format!("cannot record a gate result from {:?}", self.status));
        }
        self.status = if status.is_passing() {
            RunStatus::Passed
        } else if self.attempt < self.max_retries {
            self.last_appendix = appendix;
            RunStatus::RetryPending
        } else {
            RunStatus::Failed
        };
        Ok(self.status)
    }
}
