//! Markdown rendering for gate reports.
//!
//! Rendering is a pure function of the report value: the same report always
//! renders to the same bytes. The appendix renderer is shared with the retry
//! prompt so the next attempt sees exactly what the report says.

use crate::core::engine::{FileScope, Outcome};
use crate::core::report::{GateReport, ReRunAppendix};
use crate::core::types::{OverallStatus, Verdict};

pub fn render_report(report: &GateReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Merge Gate Report: {}\n", report.task_id));
    out.push('\n');
    out.push_str(&format!("**Date:** {}\n", report.generated_at));
    out.push_str(&format!("**Sprint Phase:** {}\n", report.sprint_phase));
    out.push_str(&format!("**Contract:** {}\n", report.contract_path));
    out.push_str(&format!("**Attempt:** {}\n", report.attempt + 1));
    out.push_str(&format!("**Status:** {}\n", report.overall_status));
    out.push_str("\n---\n\n");

    render_file_scope(&mut out, &report.file_scope);
    render_checks(&mut out, report);
    render_constitution(&mut out, report);
    render_flags(&mut out, &report.review_flags);
    render_verification(&mut out, report);

    out.push_str("## 6. Disposition\n\n");
    out.push_str(&format!("**Overall Status:** {}\n", report.overall_status));
    out.push_str(&format!("**Recommendation:** {}\n", report.overall_status.recommendation()));

    if let Some(appendix) = &report.re_run_appendix {
        out.push('\n');
        out.push_str(&render_appendix(appendix));
    }
    out
}

fn render_file_scope(out: &mut String, scope: &FileScope) {
    out.push_str("## 1. File Scope Validation\n\n");
    out.push_str("**Expected files (from contract):**\n");
    render_list(out, &scope.expected);
    out.push_str("\n**Received files (from agent):**\n");
    render_list(out, &scope.received);
    out.push('\n');
    out.push_str("| Check | Result |\n|-------|--------|\n");
    let missing = if scope.missing.is_empty() {
        "PASS — none missing".to_string()
    } else {
        format!("FAIL — {}", code_list(&scope.missing))
    };
    let extra = if scope.extra.is_empty() {
        "PASS — none extra".to_string()
    } else {
        format!("FAIL — {}", code_list(&scope.extra))
    };
    out.push_str(&format!("| Missing files | {} |\n", cell(&missing)));
    out.push_str(&format!("| Extra files | {} |\n", cell(&extra)));
    out.push('\n');
}

fn render_list(out: &mut String, items: &[String]) {
    if items.is_empty() {
        out.push_str("- (none)\n");
        return;
    }
    for item in items {
        out.push_str(&format!("- `{item}`\n"));
    }
}

fn code_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("`{item}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_checks(out: &mut String, report: &GateReport) {
    out.push_str("## 2. Automated Checks\n\n");
    out.push_str("| # | Check | Result | Details |\n|----|-------|--------|---------|\n");
    for check in &report.automated_checks {
        out.push_str(&format!(
            "| {:02} | {} | {} | {} |\n",
            check.id.number(),
            check.id.title(),
            verdict_cell(&check.outcome),
            cell(&check.outcome.detail)
        ));
    }
    let failed = report.failed_checks();
    out.push('\n');
    if failed == 0 {
        out.push_str("**Automated Result:** ALL PASS\n\n");
    } else {
        out.push_str(&format!(
            "**Automated Result:** {failed} of {} FAILED\n\n",
            report.automated_checks.len()
        ));
    }
}

fn render_constitution(out: &mut String, report: &GateReport) {
    out.push_str("## 3. Constitution Compliance\n\n");
    out.push_str("| Rule | Result | Details |\n|------|--------|---------|\n");
    for rule in &report.constitution {
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            rule.id.title(),
            verdict_cell(&rule.outcome),
            cell(&rule.outcome.detail)
        ));
    }
    out.push('\n');
}

fn render_flags(out: &mut String, flags: &[String]) {
    out.push_str("## 4. Architect Review Flags\n\n");
    if flags.is_empty() {
        out.push_str("No flags raised.\n\n");
        return;
    }
    for flag in flags {
        out.push_str(&format!("- {flag}\n"));
    }
    out.push('\n');
}

fn render_verification(out: &mut String, report: &GateReport) {
    out.push_str("## 5. Contract Verification Commands\n\n");
    if report.verification.is_empty() {
        out.push_str("No verification commands declared.\n\n");
        return;
    }
    out.push_str("| Command | Result | Output |\n|---------|--------|--------|\n");
    for result in &report.verification {
        out.push_str(&format!(
            "| `{}` | {} | {} |\n",
            cell(&result.command),
            result.verdict.as_str(),
            cell(&result.output)
        ));
    }
    out.push('\n');
}

/// Subject of the commit recording a gate report.
pub fn commit_message(report: &GateReport) -> String {
    format!("[{}] Gate: {}", report.task_id, report.overall_status)
}

/// The Re-Run Appendix section, also embedded verbatim in the retry prompt.
pub fn render_appendix(appendix: &ReRunAppendix) -> String {
    let mut out = String::new();
    out.push_str("## Re-Run Appendix\n\n");
    out.push_str(&format!("**Previous Attempt:** {}\n", appendix.previous_attempt));
    out.push_str(&format!("**Gate Result:** {}\n", OverallStatus::Fail));
    out.push_str("\n### Violations to Correct\n");
    for (idx, violation) in appendix.violations.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{}] — {}\n",
            idx + 1,
            violation.check_ref,
            violation.description
        ));
        if let Some(file) = &violation.file_path {
            out.push_str(&format!("   - File: {file}\n"));
        }
        out.push_str(&format!("   - Expected: {}\n", one_line(&violation.expected)));
        out.push_str(&format!("   - Found: {}\n", one_line(&violation.found)));
        out.push_str(&format!("   - Fix: {}\n", one_line(&violation.fix_directive)));
    }
    out.push_str("\n### Constraints Reinforced\n");
    if appendix.constraints.is_empty() {
        out.push_str("- No constitution rule was violated; satisfy every item above.\n");
    } else {
        for constraint in &appendix.constraints {
            out.push_str(&format!("- {constraint}\n"));
        }
    }
    out
}

fn verdict_cell(outcome: &Outcome) -> String {
    if outcome.verdict == Verdict::Fail && outcome.review_required {
        "FAIL (REVIEW_REQUIRED)".to_string()
    } else {
        outcome.verdict.as_str().to_string()
    }
}

/// Escape a value for a single Markdown table cell.
fn cell(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "-".to_string();
    }
    text.replace('|', "\\|").replace('\n', "<br>")
}

fn one_line(text: &str) -> String {
    text.trim().replace('\n', " / ")
}
