//! Gate report persistence.
//!
//! The Markdown report lives at the contract's fixed report path and is
//! replaced on every validation phase. The JSON sidecar is schema-checked and
//! written once per attempt, so earlier attempts are never touched.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::render::render_report;
use crate::core::report::GateReport;
use crate::error::ReportWriteFailure;

const GATE_REPORT_SCHEMA: &str = include_str!("../../schemas/gate_report.v1.schema.json");

static VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(GATE_REPORT_SCHEMA).expect("gate report schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("gate report schema should compile")
});

/// Where one attempt's report landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredReport {
    pub markdown_path: PathBuf,
    pub json_path: PathBuf,
}

/// Write the rendered report and its JSON sidecar.
///
/// Any failure surfaces as [`ReportWriteFailure`] for the Markdown path.
#[instrument(skip_all, fields(task_id = %report.task_id, attempt = report.attempt))]
pub fn store_report(
    repo_root: &Path,
    markdown_relpath: &Path,
    json_path: &Path,
    report: &GateReport,
) -> Result<StoredReport> {
    let markdown_path = repo_root.join(markdown_relpath);
    let failure = || ReportWriteFailure {
        path: markdown_path.clone(),
    };

    let json = report_json(report).with_context(failure)?;
    write_new(json_path, &json).with_context(failure)?;
    write_atomic(&markdown_path, &render_report(report)).with_context(failure)?;

    debug!(markdown = %markdown_path.display(), json = %json_path.display(), "stored gate report");
    Ok(StoredReport {
        markdown_path,
        json_path: json_path.to_path_buf(),
    })
}

/// Serialize and validate against the v1 schema.
pub fn report_json(report: &GateReport) -> Result<String> {
    let value = serde_json::to_value(report).context("serialize gate report")?;
    let messages: Vec<String> = VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("gate report schema validation failed:\n- {}", messages.join("\n- "));
    }
    let mut buf = serde_json::to_string_pretty(&value).context("serialize gate report")?;
    buf.push('\n');
    Ok(buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("report path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("md.tmp");
    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Write a file that must not exist yet.
fn write_new(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("create {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync {}", path.display()))?;
    Ok(())
}
