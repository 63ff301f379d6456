//! Contract identity resolution from a contract file name.
//!
//! `S3-003-documents-list.md` resolves to task id `S3-003` in sprint phase
//! `s3`. Names without a leading `S<n>-<n>` keep their stem as the id and
//! fall back to sprint phase `s0`.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

static TASK_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(S\d+-\d+)").expect("task id regex"));
static SPRINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^S(\d+)").expect("sprint regex"));

/// Task identifier plus its sprint grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractIdentity {
    pub id: String,
    pub sprint_phase: String,
}

/// Resolve identity from a contract path. Total over any input.
pub fn resolve_identity(path: &Path) -> ContractIdentity {
    let stem = file_stem(path);
    let id = match TASK_ID_RE.captures(&stem) {
        Some(caps) => caps[1].to_uppercase(),
        None => stem,
    };
    let sprint_phase = match SPRINT_RE.captures(&id) {
        Some(caps) => format!("s{}", &caps[1]),
        None => "s0".to_string(),
    };
    ContractIdentity { id, sprint_phase }
}

fn file_stem(path: &Path) -> String {
    if let Some(stem) = path.file_stem() {
        return stem.to_string_lossy().into_owned();
    }
    path.to_string_lossy().into_owned()
}
