//! Gate rule engine: inputs, per-rule outcomes, and evaluation.
//!
//! The engine is pure. External commands (compile, advisory scan) are run by
//! the caller and handed in as [`CommandOutcome`] values, so every rule can be
//! exercised in unit tests with literal inputs.

use serde::{Deserialize, Serialize};

use crate::core::checks;
use crate::core::constitution;
use crate::core::contract::TaskContract;
use crate::core::layers::normalize;
use crate::core::review;
use crate::core::types::{CheckId, RuleId, Verdict};

/// Contents of one produced file as seen by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContents {
    Text(String),
    /// Removed by the implementation; counts for scope, skipped by scans.
    Deleted,
    /// Present but could not be read; scans mark themselves for review.
    Unreadable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedFile {
    pub path: String,
    pub contents: FileContents,
}

impl ProducedFile {
    pub fn text(path: &str, contents: &str) -> Self {
        ProducedFile {
            path: normalize(path),
            contents: FileContents::Text(contents.to_string()),
        }
    }

    pub fn contents_text(&self) -> Option<&str> {
        match &self.contents {
            FileContents::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Result of an external command run on the gate's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command: String,
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr, possibly truncated.
    pub output: String,
    pub timed_out: bool,
    /// Spawn or wait failure; the command never produced an exit code.
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && !self.timed_out && self.exit_code == Some(0)
    }

    /// Why the command could not be judged, if it could not.
    pub fn inconclusive(&self) -> Option<String> {
        if let Some(err) = &self.error {
            return Some(format!("could not run `{}`: {err}", self.command));
        }
        if self.timed_out {
            return Some(format!("`{}` timed out", self.command));
        }
        None
    }
}

/// Project-specific rule parameters (`[gate.rules]` in config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleParams {
    /// The one file allowed to declare the edge runtime.
    pub edge_entry_file: String,
    /// The one file allowed to hold inline validation schemas.
    pub shared_schema_file: String,
    pub route_factory: String,
    pub privileged_token: String,
    pub sensitive_prefixes: Vec<String>,
    /// Files allowed to use `any` (generated types).
    pub any_allowed_paths: Vec<String>,
    pub allowed_packages: Vec<String>,
    pub allowed_regions: Vec<String>,
}

impl Default for RuleParams {
    fn default() -> Self {
        Self {
            edge_entry_file: "middleware.ts".to_string(),
            shared_schema_file: "lib/types/shared.ts".to_string(),
            route_factory: "createApiRoute".to_string(),
            privileged_token: "SERVICE_ROLE".to_string(),
            sensitive_prefixes: vec!["app/".to_string(), "lib/".to_string()],
            any_allowed_paths: vec!["lib/types/database.types.ts".to_string()],
            allowed_packages: ["react", "react-dom", "next", "zod", "@supabase/supabase-js", "@supabase/ssr"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            allowed_regions: vec!["ca-central-1".to_string(), "ca-west-1".to_string()],
        }
    }
}

/// Everything the engine needs for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub contract: &'a TaskContract,
    pub files: &'a [ProducedFile],
    /// `None` when no compile command is configured.
    pub compile: Option<&'a CommandOutcome>,
    /// `None` when no advisory command is configured or it was not run.
    pub advisory: Option<&'a CommandOutcome>,
    pub rules: &'a RuleParams,
}

impl<'a> GateInput<'a> {
    /// Produced files with readable text, in path order.
    pub fn text_files(self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.files
            .iter()
            .filter_map(|file| file.contents_text().map(|text| (file.path.as_str(), text)))
    }

    pub fn unreadable_files(self) -> Vec<&'a str> {
        self.files
            .iter()
            .filter(|file| matches!(file.contents, FileContents::Unreadable(_)))
            .map(|file| file.path.as_str())
            .collect()
    }
}

/// One concrete violation: where, what was expected, what was found, and how to fix it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub file: Option<String>,
    pub expected: String,
    pub found: String,
    pub fix: String,
}

impl Finding {
    pub fn new(
        file: Option<&str>,
        expected: impl Into<String>,
        found: impl Into<String>,
        fix: impl Into<String>,
    ) -> Self {
        Finding {
            file: file.map(str::to_string),
            expected: expected.into(),
            found: found.into(),
            fix: fix.into(),
        }
    }
}

/// Verdict plus supporting detail for one check or rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub verdict: Verdict,
    /// Set when the evaluator could not decide; always paired with `Fail`.
    pub review_required: bool,
    pub detail: String,
    pub findings: Vec<Finding>,
}

impl Outcome {
    pub fn pass(detail: impl Into<String>) -> Self {
        Outcome {
            verdict: Verdict::Pass,
            review_required: false,
            detail: detail.into(),
            findings: Vec::new(),
        }
    }

    pub fn not_applicable(detail: impl Into<String>) -> Self {
        Outcome {
            verdict: Verdict::NotApplicable,
            review_required: false,
            detail: detail.into(),
            findings: Vec::new(),
        }
    }

    pub fn fail(detail: impl Into<String>, findings: Vec<Finding>) -> Self {
        Outcome {
            verdict: Verdict::Fail,
            review_required: false,
            detail: detail.into(),
            findings,
        }
    }

    /// Ambiguous result: recorded as a failure the next attempt must resolve.
    pub fn review(detail: impl Into<String>, findings: Vec<Finding>) -> Self {
        Outcome {
            verdict: Verdict::Fail,
            review_required: true,
            detail: detail.into(),
            findings,
        }
    }

    /// Fold violations and unresolved items into one outcome.
    pub fn from_findings(
        pass_detail: impl Into<String>,
        violations: Vec<Finding>,
        unresolved: Vec<Finding>,
    ) -> Self {
        match (violations.is_empty(), unresolved.is_empty()) {
            (true, true) => Outcome::pass(pass_detail),
            (false, true) => {
                let detail = summarize(&violations);
                Outcome::fail(detail, violations)
            }
            (true, false) => {
                let detail = format!("REVIEW_REQUIRED: {}", summarize(&unresolved));
                Outcome::review(detail, unresolved)
            }
            (false, false) => {
                let detail = format!("{}; REVIEW_REQUIRED: {}", summarize(&violations), summarize(&unresolved));
                let mut findings = violations;
                findings.extend(unresolved);
                Outcome::review(detail, findings)
            }
        }
    }

    pub fn is_fail(&self) -> bool {
        self.verdict == Verdict::Fail
    }
}

fn summarize(findings: &[Finding]) -> String {
    let first = findings
        .first()
        .map(|finding| match &finding.file {
            Some(file) => format!("{file}: {}", finding.found),
            None => finding.found.clone(),
        })
        .unwrap_or_default();
    if findings.len() > 1 {
        format!("{first} (+{} more)", findings.len() - 1)
    } else {
        first
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: CheckId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    pub id: RuleId,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Declared vs. received file sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileScope {
    pub expected: Vec<String>,
    pub received: Vec<String>,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
}

impl FileScope {
    /// Set comparison. A declared entry ending in `/` covers everything below it.
    pub fn compute(produces: &[String], files: &[ProducedFile]) -> Self {
        let covers = |entry: &str, path: &str| {
            let entry = normalize(entry);
            path == entry || (entry.ends_with('/') && path.starts_with(&entry))
        };
        let mut received: Vec<String> = files.iter().map(|file| normalize(&file.path)).collect();
        received.sort();
        received.dedup();
        let missing = produces
            .iter()
            .filter(|entry| !received.iter().any(|path| covers(entry, path)))
            .cloned()
            .collect();
        let extra = received
            .iter()
            .filter(|path| !produces.iter().any(|entry| covers(entry, path)))
            .cloned()
            .collect();
        FileScope {
            expected: produces.to_vec(),
            received,
            missing,
            extra,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }

    pub fn in_scope(&self, path: &str) -> bool {
        !self.extra.iter().any(|extra| extra == path)
    }
}

/// Everything the engine decided for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub file_scope: FileScope,
    pub checks: Vec<CheckResult>,
    pub constitution: Vec<RuleResult>,
    pub review_flags: Vec<String>,
}

impl Evaluation {
    pub fn has_failure(&self) -> bool {
        self.checks.iter().any(|check| check.outcome.is_fail())
            || self.constitution.iter().any(|rule| rule.outcome.is_fail())
    }
}

/// Run every automated check and constitution rule. Each rule is independent.
pub fn evaluate(input: &GateInput<'_>) -> Evaluation {
    let file_scope = FileScope::compute(&input.contract.produces, input.files);
    let checks: Vec<CheckResult> = checks::CHECKS
        .iter()
        .map(|(id, check)| CheckResult {
            id: *id,
            outcome: check(input),
        })
        .collect();
    let constitution: Vec<RuleResult> = constitution::RULES
        .iter()
        .map(|(id, rule)| RuleResult {
            id: *id,
            outcome: rule(input, &file_scope),
        })
        .collect();
    Evaluation {
        file_scope,
        checks,
        constitution,
        review_flags: review::flags(input),
    }
}

/// Where an import points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    /// Repository-relative path (extension may be missing).
    Internal(String),
    Package(String),
    Builtin,
}

const NODE_BUILTINS: &[&str] = &[
    "assert", "buffer", "child_process", "crypto", "events", "fs", "http", "https", "os", "path",
    "process", "stream", "url", "util", "zlib",
];

/// Resolve an import specifier relative to the importing file.
pub fn resolve_import(importer: &str, specifier: &str) -> ImportTarget {
    if let Some(rest) = specifier.strip_prefix("@/") {
        return ImportTarget::Internal(normalize(rest));
    }
    if specifier.starts_with("./") || specifier.starts_with("../") {
        let importer = normalize(importer);
        let dir = importer.rsplit_once('/').map_or("", |(dir, _)| dir);
        let mut parts: Vec<&str> = dir.split('/').filter(|part| !part.is_empty()).collect();
        for part in specifier.split('/') {
            match part {
                "." | "" => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        return ImportTarget::Internal(parts.join("/"));
    }
    if specifier.starts_with("node:") || NODE_BUILTINS.contains(&specifier) {
        return ImportTarget::Builtin;
    }
    let bare = specifier
        .strip_prefix("npm:")
        .or_else(|| specifier.strip_prefix("jsr:"))
        .unwrap_or(specifier);
    let bare = match bare.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or(rest, |(_, path)| path),
        None => bare,
    };
    ImportTarget::Package(crate::core::contract::package_name(bare).to_string())
}

pub fn is_script(path: &str) -> bool {
    [".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

/// First `max_lines` non-empty lines of command output.
pub fn excerpt(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();
    let mut text = lines.iter().take(max_lines).copied().collect::<Vec<_>>().join("\n");
    if lines.len() > max_lines {
        text.push_str(&format!("\n... ({} more lines)", lines.len() - max_lines));
    }
    text
}
