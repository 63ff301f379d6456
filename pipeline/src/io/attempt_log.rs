//! Per-attempt logs under `.pipeline/runs/<task>/<run>/attempt-<n>/`.
//!
//! Product artifacts, written regardless of `RUST_LOG`. Each attempt gets its
//! own directory; a later attempt never rewrites an earlier one.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::types::{OverallStatus, SessionRef};

#[derive(Debug, Clone, Serialize)]
pub struct AttemptMeta {
    pub task_id: String,
    pub run_stamp: String,
    pub attempt: u32,
    pub base_rev: String,
    pub session_ref: Option<SessionRef>,
    /// `None` when the attempt aborted before a report was stored.
    pub overall_status: Option<OverallStatus>,
    pub report_path: Option<String>,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub implement_prompt_path: PathBuf,
    pub implement_stream_path: PathBuf,
    pub validate_prompt_path: PathBuf,
    pub validate_stream_path: PathBuf,
    /// Draft written by the validator agent, if it runs.
    pub validator_report_path: PathBuf,
    pub report_json_path: PathBuf,
}

impl AttemptPaths {
    pub fn new(run_dir: &Path, attempt: u32) -> Self {
        let dir = run_dir.join(format!("attempt-{attempt}"));
        Self {
            meta_path: dir.join("meta.json"),
            implement_prompt_path: dir.join("implement.prompt.md"),
            implement_stream_path: dir.join("implement.stream.jsonl"),
            validate_prompt_path: dir.join("validate.prompt.md"),
            validate_stream_path: dir.join("validate.stream.jsonl"),
            validator_report_path: dir.join("validator-report.md"),
            report_json_path: dir.join("report.json"),
            dir,
        }
    }
}

/// `<root>/.pipeline/runs/<task_id>/<run_stamp>`.
pub fn run_dir(root: &Path, task_id: &str, run_stamp: &str) -> PathBuf {
    root.join(".pipeline").join("runs").join(task_id).join(run_stamp)
}

/// Sortable, path-safe run identifier.
pub fn run_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%S%.3fZ").to_string()
}

pub fn write_prompt(path: &Path, prompt: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create attempt dir {}", parent.display()))?;
    }
    write_text(path, prompt)
}

pub fn write_meta(paths: &AttemptPaths, meta: &AttemptMeta) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;
    write_json(&paths.meta_path, meta)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn attempt_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = run_dir(temp.path(), "S1-001", "20260101T000000.000Z");
        let paths = AttemptPaths::new(&run, 2);

        assert!(paths.dir.ends_with(Path::new(
            ".pipeline/runs/S1-001/20260101T000000.000Z/attempt-2"
        )));
        assert!(paths.meta_path.ends_with("meta.json"));
        assert!(paths.implement_prompt_path.ends_with("implement.prompt.md"));
        assert!(paths.implement_stream_path.ends_with("implement.stream.jsonl"));
        assert!(paths.validate_prompt_path.ends_with("validate.prompt.md"));
        assert!(paths.validate_stream_path.ends_with("validate.stream.jsonl"));
        assert!(paths.report_json_path.ends_with("report.json"));
    }

    #[test]
    fn run_stamp_sorts_chronologically() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("time");
        let later = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 6).single().expect("time");
        assert_eq!(run_stamp(earlier), "20260102T030405.000Z");
        assert!(run_stamp(earlier) < run_stamp(later));
    }

    #[test]
    fn writes_prompt_and_meta() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = AttemptPaths::new(&run_dir(temp.path(), "S1-001", "r"), 0);
        write_prompt(&paths.implement_prompt_path, "prompt").expect("prompt");
        write_meta(
            &paths,
            &AttemptMeta {
                task_id: "S1-001".to_string(),
                run_stamp: "r".to_string(),
                attempt: 0,
                base_rev: "abc".to_string(),
                session_ref: Some(SessionRef("sess".to_string())),
                overall_status: Some(OverallStatus::PassWithNotes),
                report_path: None,
                started_at: "t0".to_string(),
                ended_at: "t1".to_string(),
                duration_ms: 5,
            },
        )
        .expect("meta");

        let meta = fs::read_to_string(&paths.meta_path).expect("read");
        assert!(meta.contains("\"overall_status\": \"PASS_WITH_NOTES\""));
        assert!(meta.contains("\"session_ref\": \"sess\""));
        assert!(meta.ends_with("}\n"));
    }
}
