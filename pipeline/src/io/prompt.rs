//! Phase directives for the agent runtime.
//!
//! Both directives are pure: the same inputs always render the same text.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::engine::RuleParams;
use crate::core::types::Phase;

const IMPLEMENTATION_TEMPLATE: &str = include_str!("prompts/implementation.md");
const VALIDATION_TEMPLATE: &str = include_str!("prompts/validation.md");

static ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("implementation", IMPLEMENTATION_TEMPLATE)
        .expect("implementation template should be valid");
    env.add_template("validation", VALIDATION_TEMPLATE)
        .expect("validation template should be valid");
    env
});

/// Slots of the validation directive.
#[derive(Debug, Clone, Copy)]
pub struct ValidationSlots<'a> {
    pub task_id: &'a str,
    pub contract_path: &'a str,
    pub sprint_phase: &'a str,
    /// Where the validator agent writes its draft report.
    pub report_path: &'a str,
}

/// Rule block followed by the raw contract text, then the previous attempt's
/// Re-Run Appendix verbatim when retrying.
pub fn implementation_prompt(
    rules: &RuleParams,
    contract_text: &str,
    feedback: Option<&str>,
) -> Result<String> {
    let template = ENV.get_template("implementation")?;
    template
        .render(context! {
            rules => rules,
            contract_text => contract_text.trim_end(),
            feedback => feedback.map(str::trim_end).filter(|text| !text.is_empty()),
        })
        .context("render implementation prompt")
}

pub fn validation_prompt(slots: ValidationSlots<'_>) -> Result<String> {
    let template = ENV.get_template("validation")?;
    template
        .render(context! {
            task_id => slots.task_id,
            contract_path => slots.contract_path,
            sprint_phase => slots.sprint_phase,
            report_path => slots.report_path,
        })
        .context("render validation prompt")
}

/// Short role statement appended to the runtime's system prompt.
pub fn system_prompt(phase: Phase, repo_root: &Path) -> String {
    match phase {
        Phase::Implement => format!(
            "You are a contract-bound implementation agent. You execute exactly one task contract and have no architectural authority. Repository root: {}.",
            repo_root.display()
        ),
        Phase::Validate => format!(
            "You are a merge gate validator. You assess an implementation against its task contract and never modify code. Repository root: {}.",
            repo_root.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "# S1-001\n\n## Produces\n- `lib/a.ts`\n";

    #[test]
    fn first_attempt_embeds_contract_without_feedback() {
        let prompt = implementation_prompt(&RuleParams::default(), CONTRACT, None).expect("render");
        assert!(prompt.contains("# Task contract\n\n# S1-001\n\n## Produces\n- `lib/a.ts`"));
        assert!(prompt.contains("`createApiRoute()`"));
        assert!(prompt.contains("`lib/types/shared.ts`"));
        assert!(prompt.contains("in app/, lib/ code"));
        assert!(!prompt.contains("Previous attempt"));
    }

    #[test]
    fn retry_appends_appendix_verbatim_after_contract() {
        let appendix = "## Re-Run Appendix\n\n### Violations to Correct\n1. [Check #02] — Extra file\n   - File: c.ts\n";
        let prompt =
            implementation_prompt(&RuleParams::default(), CONTRACT, Some(appendix)).expect("render");
        let contract_pos = prompt.find("# Task contract").expect("contract");
        let appendix_pos = prompt.find(appendix.trim_end()).expect("appendix verbatim");
        assert!(contract_pos < appendix_pos);
    }

    #[test]
    fn validation_prompt_is_deterministic_and_fills_slots() {
        let slots = ValidationSlots {
            task_id: "S3-007",
            contract_path: "/repo/tasks/S3-007.md",
            sprint_phase: "s3",
            report_path: ".pipeline/runs/S3-007/r/attempt-0/validator-report.md",
        };
        let first = validation_prompt(slots).expect("render");
        assert_eq!(first, validation_prompt(slots).expect("render"));
        assert_eq!(first, RENDERED_VALIDATION);
    }

    const RENDERED_VALIDATION: &str = r##"You are a merge gate validator. You validate one implementation against its
task contract. You have no authority to modify, improve, or extend the code.
You only assess compliance.

TASK_ID: S3-007
CONTRACT_PATH: /repo/tasks/S3-007.md
SPRINT_PHASE: s3

## Role and boundaries
- You do not make merge decisions and you do not fix code.
- If a check is ambiguous, mark it REVIEW_REQUIRED. Never assume PASS.
- Do not modify any repository file. Your only output file is the draft report below.

## Validation sequence
Execute these steps in order. Stop early only if step 1 fails.

1. Contract retrieval. Read `/repo/tasks/S3-007.md` and extract Produces, Consumes,
   Forbidden, Layer, Interface Contract, and Verification Commands. If it is
   missing or unreadable, report FAIL and stop.
2. File scope. Compare the changed files against Produces. Flag missing files
   as MISSING_FILE and unlisted files as UNAUTHORIZED_FILE.
3. Automated checks, each independent:
   01 compiles, 02 file scope, 03 import boundaries, 04 no `any`,
   05 no edge runtime, 06 no privileged key in app/ or lib/,
   07 function line counts, 08 interface conformance,
   09 schemas in the shared file, 10 security advisory (Database or Migration layers only).
4. Constitution compliance: route factory, SQL naming, TypeScript naming,
   SECURITY DEFINER search_path, no unrequested abstractions, no unapproved packages.
5. Architect review flags: invented abstractions, over-engineering, naming drift,
   state leakage, hardcoded secrets, data-residency risk.
6. Run every contract verification command exactly as written.

## Output file
Write your draft report to:
  .pipeline/runs/S3-007/r/attempt-0/validator-report.md

The pipeline writes the authoritative report to
  tasks/sprint-s3/gate-reports/S3-007-gate.md
Do not write that file yourself.

## Git operations
After the gate runs, the pipeline commits the authoritative report and nothing else:
  git add tasks/sprint-s3/gate-reports/S3-007-gate.md
  git commit -m "[S3-007] Gate: <STATUS>"
Do not run git add, git commit, or any other command that changes the repository.

## Final line
End your reply with exactly one line in this form:
  [S3-007] Gate: PASS | FAIL | PASS WITH NOTES"##;
}
