//! Gate report assembly and status derivation.

use serde::{Deserialize, Serialize};

use crate::core::contract::TaskContract;
use crate::core::engine::{
    CheckResult, CommandOutcome, Evaluation, FileScope, Outcome, RuleResult, excerpt,
};
use crate::core::review::disagreement;
use crate::core::types::{OverallStatus, Verdict};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Outcome of one contract verification command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub command: String,
    pub verdict: Verdict,
    pub exit_code: Option<i32>,
    pub output: String,
}

impl VerificationResult {
    pub fn from_outcome(outcome: &CommandOutcome) -> Self {
        let output = match outcome.inconclusive() {
            Some(reason) => reason,
            None => excerpt(&outcome.output, 3),
        };
        VerificationResult {
            command: outcome.command.clone(),
            verdict: if outcome.succeeded() { Verdict::Pass } else { Verdict::Fail },
            exit_code: outcome.exit_code,
            output,
        }
    }
}

/// One entry of the Re-Run Appendix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// `Check #02`, `Constitution: ...`, or `Verification: ...`.
    pub check_ref: String,
    pub description: String,
    pub file_path: Option<String>,
    pub expected: String,
    pub found: String,
    pub fix_directive: String,
}

/// Failure feedback consumed verbatim by the next implementation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReRunAppendix {
    pub previous_attempt: String,
    pub violations: Vec<Violation>,
    /// Verbatim constitution text for every failed rule.
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    pub schema_version: u32,
    pub task_id: String,
    pub sprint_phase: String,
    pub contract_path: String,
    pub generated_at: String,
    /// 0-based attempt this report judged.
    pub attempt: u32,
    pub overall_status: OverallStatus,
    pub file_scope: FileScope,
    pub automated_checks: Vec<CheckResult>,
    pub constitution: Vec<RuleResult>,
    pub review_flags: Vec<String>,
    pub verification: Vec<VerificationResult>,
    pub re_run_appendix: Option<ReRunAppendix>,
}

impl GateReport {
    /// Build the report for one attempt. Status: FAIL beats notes beats PASS.
    ///
    /// `agent_verdict` is the validator agent's free-text reading; it only
    /// ever adds a review flag.
    pub fn assemble(
        contract: &TaskContract,
        mut evaluation: Evaluation,
        verification: Vec<VerificationResult>,
        agent_verdict: Option<bool>,
        attempt: u32,
        generated_at: String,
    ) -> Self {
        let verification_failed = verification
            .iter()
            .any(|result| result.verdict == Verdict::Fail);
        let failed = evaluation.has_failure() || verification_failed;
        if let Some(flag) =
            agent_verdict.and_then(|agent_passed| disagreement(agent_passed, !failed))
        {
            evaluation.review_flags.push(flag);
        }
        let overall_status = if failed {
            OverallStatus::Fail
        } else if !evaluation.review_flags.is_empty() {
            OverallStatus::PassWithNotes
        } else {
            OverallStatus::Pass
        };

        let re_run_appendix = (overall_status == OverallStatus::Fail).then(|| ReRunAppendix {
            previous_attempt: generated_at.clone(),
            violations: violations(&evaluation, &verification),
            constraints: evaluation
                .constitution
                .iter()
                .filter(|rule| rule.outcome.is_fail())
                .map(|rule| rule.id.constraint().to_string())
                .collect(),
        });

        GateReport {
            schema_version: REPORT_SCHEMA_VERSION,
            task_id: contract.id.clone(),
            sprint_phase: contract.sprint_phase.clone(),
            contract_path: contract.path.display().to_string(),
            generated_at,
            attempt,
            overall_status,
            file_scope: evaluation.file_scope,
            automated_checks: evaluation.checks,
            constitution: evaluation.constitution,
            review_flags: evaluation.review_flags,
            verification,
            re_run_appendix,
        }
    }

    /// Number of automated checks with a FAIL verdict.
    pub fn failed_checks(&self) -> usize {
        self.automated_checks
            .iter()
            .filter(|check| check.outcome.is_fail())
            .count()
    }
}

fn violations(evaluation: &Evaluation, verification: &[VerificationResult]) -> Vec<Violation> {
    let mut out = Vec::new();
    for check in &evaluation.checks {
        push_outcome(&mut out, check.id.label(), check.id.title(), &check.outcome);
    }
    for rule in &evaluation.constitution {
        push_outcome(&mut out, rule.id.label(), rule.id.title(), &rule.outcome);
    }
    for result in verification.iter().filter(|result| result.verdict == Verdict::Fail) {
        let found = match result.exit_code {
            Some(code) if result.output.is_empty() => format!("exit code {code}"),
            Some(code) => format!("exit code {code}: {}", result.output),
            None => result.output.clone(),
        };
        out.push(Violation {
            check_ref: format!("Verification: `{}`", result.command),
            description: "Contract verification command failed".to_string(),
            file_path: None,
            expected: "command exits 0".to_string(),
            found,
            fix_directive: format!("Make `{}` pass without modifying the command.", result.command),
        });
    }
    out
}

fn push_outcome(out: &mut Vec<Violation>, check_ref: String, title: &str, outcome: &Outcome) {
    if !outcome.is_fail() {
        return;
    }
    let description = if outcome.review_required {
        format!("{title} (REVIEW_REQUIRED)")
    } else {
        title.to_string()
    };
    if outcome.findings.is_empty() {
        out.push(Violation {
            check_ref,
            description,
            file_path: None,
            expected: format!("{title}: PASS"),
            found: outcome.detail.clone(),
            fix_directive: format!("Resolve: {}", outcome.detail),
        });
        return;
    }
    for finding in &outcome.findings {
        out.push(Violation {
            check_ref: check_ref.clone(),
            description: description.clone(),
            file_path: finding.file.clone(),
            expected: finding.expected.clone(),
            found: finding.found.clone(),
            fix_directive: finding.fix.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::engine::{Finding, GateInput, ProducedFile, RuleParams, evaluate};
    use crate::core::identity::ContractIdentity;
    use crate::core::types::{CheckId, RuleId};

    fn contract(text: &str) -> TaskContract {
        TaskContract::from_text(
            ContractIdentity {
                id: "S1-003".to_string(),
                sprint_phase: "s1".to_string(),
            },
            PathBuf::from("tasks/S1-003.md"),
            text.to_string(),
        )
    }

    fn evaluation(checks: Vec<Outcome>, rules: Vec<Outcome>, flags: Vec<String>) -> Evaluation {
        Evaluation {
            file_scope: FileScope::default(),
            checks: CheckId::ALL
                .iter()
                .zip(checks)
                .map(|(id, outcome)| CheckResult { id: *id, outcome })
                .collect(),
            constitution: RuleId::ALL
                .iter()
                .zip(rules)
                .map(|(id, outcome)| RuleResult { id: *id, outcome })
                .collect(),
            review_flags: flags,
        }
    }

    fn passing(n: usize) -> Vec<Outcome> {
        (0..n).map(|_| Outcome::pass("ok")).collect()
    }

    #[test]
    fn all_pass_or_na_is_pass() {
        let mut checks = passing(10);
        checks[9] = Outcome::not_applicable("layer is Presentation");
        let report = GateReport::assemble(
            &contract(""),
            evaluation(checks, passing(6), Vec::new()),
            Vec::new(),
            None,
            0,
            "t".into(),
        );
        assert_eq!(report.overall_status, OverallStatus::Pass);
        assert!(report.re_run_appendix.is_none());
    }

    #[test]
    fn flags_only_turn_pass_into_notes() {
        let report = GateReport::assemble(
            &contract(""),
            evaluation(passing(10), passing(6), vec!["note".to_string()]),
            Vec::new(),
            None,
            0,
            "t".into(),
        );
        assert_eq!(report.overall_status, OverallStatus::PassWithNotes);
        assert!(report.re_run_appendix.is_none());
    }

    #[test]
    fn any_failure_forces_fail_with_appendix() {
        let mut rules = passing(6);
        rules[4] = Outcome::fail(
            "undeclared export",
            vec![Finding::new(Some("lib/a.ts"), "declared exports only", "undeclared export `x`", "Remove `x`.")],
        );
        let report = GateReport::assemble(
            &contract(""),
            evaluation(passing(10), rules, vec!["note".to_string()]),
            Vec::new(),
            None,
            1,
            "t".into(),
        );
        assert_eq!(report.overall_status, OverallStatus::Fail);
        let appendix = report.re_run_appendix.expect("appendix");
        assert_eq!(appendix.violations.len(), 1);
        assert_eq!(appendix.violations[0].check_ref, "Constitution: No unauthorized abstractions");
        assert_eq!(appendix.constraints, vec![RuleId::NoUnrequestedAbstractions.constraint()]);
    }

    #[test]
    fn failed_verification_command_fails_the_gate() {
        let failed = VerificationResult::from_outcome(&CommandOutcome {
            command: "npm test".to_string(),
            exit_code: Some(1),
            output: "1 failing\n".to_string(),
            timed_out: false,
            error: None,
        });
        let report = GateReport::assemble(
            &contract(""),
            evaluation(passing(10), passing(6), Vec::new()),
            vec![failed],
            None,
            0,
            "t".into(),
        );
        assert_eq!(report.overall_status, OverallStatus::Fail);
        let appendix = report.re_run_appendix.expect("appendix");
        assert_eq!(appendix.violations[0].check_ref, "Verification: `npm test`");
        assert_eq!(appendix.violations[0].found, "exit code 1: 1 failing");
    }

    #[test]
    fn extra_file_yields_single_check_two_violation() {
        let contract = contract("## Produces\n- a.ts\n");
        let files = vec![ProducedFile::text("a.ts", ""), ProducedFile::text("c.ts", "")];
        let rules = RuleParams::default();
        let compile = CommandOutcome {
            command: "tsc".to_string(),
            exit_code: Some(0),
            output: String::new(),
            timed_out: false,
            error: None,
        };
        let input = GateInput {
            contract: &contract,
            files: &files,
            compile: Some(&compile),
            advisory: None,
            rules: &rules,
        };
        let report =
            GateReport::assemble(&contract, evaluate(&input), Vec::new(), None, 0, "t".into());
        assert_eq!(report.overall_status, OverallStatus::Fail);
        assert_eq!(report.file_scope.extra, vec!["c.ts"]);
        let appendix = report.re_run_appendix.expect("appendix");
        assert_eq!(appendix.violations.len(), 1);
        assert_eq!(appendix.violations[0].check_ref, "Check #02");
        assert_eq!(appendix.violations[0].file_path.as_deref(), Some("c.ts"));
    }
}
