//! Architect review flags: observations that never fail the gate.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::engine::{GateInput, is_script};

static SECRET_ASSIGNMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b[\w$]*(?:api[_-]?key|secret|token|password|passwd)[\w$]*\s*[:=]\s*['"`][^'"`\s]{12,}['"`]"#)
        .expect("secret assignment regex")
});
static SECRET_SHAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:sk_live_[0-9A-Za-z]{10,}|AKIA[0-9A-Z]{16}|eyJ[A-Za-z0-9_-]{20,}\.[A-Za-z0-9_-]{20,}\.[A-Za-z0-9_-]+)")
        .expect("secret shape regex")
});
static REGION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:us|eu|ap|sa|me|af|ca|il|mx)-(?:north|south|east|west|central|northeast|southeast|northwest|southwest)-\d\b",
    )
    .expect("region regex")
});

/// Collect review flags for the produced files.
pub fn flags(input: &GateInput<'_>) -> Vec<String> {
    let mut flags = Vec::new();
    for (path, text) in input.text_files() {
        if !is_script(path) && !path.ends_with(".sql") {
            continue;
        }
        for (idx, line) in text.lines().enumerate() {
            if SECRET_ASSIGNMENT_RE.is_match(line) || SECRET_SHAPE_RE.is_match(line) {
                flags.push(format!(
                    "Hardcoded secret: `{path}` line {} looks like a literal credential; load it from configuration.",
                    idx + 1
                ));
            }
            for region in REGION_RE.find_iter(line) {
                let region = region.as_str();
                if input.rules.allowed_regions.iter().any(|allowed| allowed == region) {
                    continue;
                }
                flags.push(format!(
                    "Sovereignty risk: `{path}` line {} references region `{region}` outside the allowed regions ({}).",
                    idx + 1,
                    input.rules.allowed_regions.join(", ")
                ));
            }
        }
    }

    flags
}

/// Flag a validator agent whose free-text verdict contradicts the gate.
///
/// `gate_passed` must already account for verification commands.
pub fn disagreement(agent_passed: bool, gate_passed: bool) -> Option<String> {
    (agent_passed != gate_passed).then(|| {
        format!(
            "Validator disagreement: the validator agent summary reads {} but the structured gate result is {}.",
            pass_fail(agent_passed),
            pass_fail(gate_passed)
        )
    })
}

fn pass_fail(passed: bool) -> &'static str {
    if passed { "PASS" } else { "FAIL" }
}

/// Free-text verdict heuristic: mentions `PASS` and never `FAIL`.
///
/// Only ever used as an advisory signal next to the structured report.
pub fn text_verdict(text: &str) -> bool {
    text.contains("PASS") && !text.contains("FAIL")
}
