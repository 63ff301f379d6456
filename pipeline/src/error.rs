//! Run-level failures.
//!
//! These abort a run instead of feeding the retry policy. They travel inside
//! `anyhow::Error` and are recovered with `downcast_ref` at the CLI boundary.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::Phase;

#[derive(Debug, Error)]
#[error("contract unreadable: {}", path.display())]
pub struct ContractUnreadable {
    pub path: PathBuf,
}

/// The agent runtime used its turn budget without a terminal result.
#[derive(Debug, Error)]
#[error("{phase} phase exhausted its turn budget of {turn_budget}")]
pub struct AdapterExhausted {
    pub phase: Phase,
    pub turn_budget: u32,
}

/// The agent runtime failed for a reason other than turn exhaustion.
#[derive(Debug, Error)]
#[error("{phase} phase agent invocation failed: {detail}")]
pub struct AdapterFailed {
    pub phase: Phase,
    pub detail: String,
}

/// A gate report could not be durably recorded; the attempt cannot count as passed.
#[derive(Debug, Error)]
#[error("failed to write gate report {}", path.display())]
pub struct ReportWriteFailure {
    pub path: PathBuf,
}
