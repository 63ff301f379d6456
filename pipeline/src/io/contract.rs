//! Load a task contract from disk.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::contract::TaskContract;
use crate::core::identity::resolve_identity;
use crate::error::ContractUnreadable;

/// Read and parse the contract at `path`.
///
/// Any failure to read is a [`ContractUnreadable`] error; nothing else runs.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_contract(path: &Path) -> Result<TaskContract> {
    let unreadable = || ContractUnreadable {
        path: path.to_path_buf(),
    };
    let absolute = fs::canonicalize(path).with_context(unreadable)?;
    let text = fs::read_to_string(&absolute).with_context(unreadable)?;
    if text.trim().is_empty() {
        return Err(anyhow!("contract is empty")).with_context(unreadable);
    }
    let contract = TaskContract::from_text(resolve_identity(&absolute), absolute, text);
    debug!(
        id = %contract.id,
        sprint_phase = %contract.sprint_phase,
        produces = contract.produces.len(),
        "loaded contract"
    );
    Ok(contract)
}
