//! Shared deterministic types for pipeline core logic.
//!
//! These types define stable contracts between the gate engine, the report
//! builder, and the orchestrator. They carry no I/O and serialize to a stable
//! shape for the per-attempt JSON artifacts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Verdict for a single automated check or constitution rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
    NotApplicable,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::NotApplicable => "N/A",
        }
    }
}

/// Overall disposition of a gate report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Pass,
    Fail,
    PassWithNotes,
}

impl OverallStatus {
    /// True for the two statuses that end a run as passed.
    pub fn is_passing(self) -> bool {
        matches!(self, OverallStatus::Pass | OverallStatus::PassWithNotes)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OverallStatus::Pass => "PASS",
            OverallStatus::Fail => "FAIL",
            OverallStatus::PassWithNotes => "PASS WITH NOTES",
        }
    }

    pub fn recommendation(self) -> &'static str {
        match self {
            OverallStatus::Pass => "MERGE",
            OverallStatus::Fail => "REJECT",
            OverallStatus::PassWithNotes => "MERGE WITH MODIFICATIONS",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ten automated checks, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckId {
    Compiles,
    FileScope,
    ImportBoundaries,
    NoTypeEscapes,
    NoEdgeRuntime,
    NoPrivilegedKey,
    FunctionLineCounts,
    InterfaceConformance,
    SharedSchemas,
    MigrationAdvisory,
}

impl CheckId {
    pub const ALL: [CheckId; 10] = [
        CheckId::Compiles,
        CheckId::FileScope,
        CheckId::ImportBoundaries,
        CheckId::NoTypeEscapes,
        CheckId::NoEdgeRuntime,
        CheckId::NoPrivilegedKey,
        CheckId::FunctionLineCounts,
        CheckId::InterfaceConformance,
        CheckId::SharedSchemas,
        CheckId::MigrationAdvisory,
    ];

    /// 1-based position in the automated check table.
    pub fn number(self) -> usize {
        CheckId::ALL
            .iter()
            .position(|id| *id == self)
            .map_or(0, |idx| idx + 1)
    }

    pub fn title(self) -> &'static str {
        match self {
            CheckId::Compiles => "Type check compiles",
            CheckId::FileScope => "File scope validated",
            CheckId::ImportBoundaries => "Import boundaries clean",
            CheckId::NoTypeEscapes => "No `any` types",
            CheckId::NoEdgeRuntime => "No Edge Runtime",
            CheckId::NoPrivilegedKey => "No service_role leak",
            CheckId::FunctionLineCounts => "Function line counts",
            CheckId::InterfaceConformance => "Interface conformance",
            CheckId::SharedSchemas => "Schemas in shared file",
            CheckId::MigrationAdvisory => "Migration advisory clean",
        }
    }

    /// Label used in Re-Run Appendix entries, e.g. `Check #02`.
    pub fn label(self) -> String {
        format!("Check #{:02}", self.number())
    }
}

/// Constitution rules, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    RouteFactory,
    SqlNaming,
    TypeNaming,
    SecurityDefiner,
    NoUnrequestedAbstractions,
    NoUnapprovedPackages,
}

impl RuleId {
    pub const ALL: [RuleId; 6] = [
        RuleId::RouteFactory,
        RuleId::SqlNaming,
        RuleId::TypeNaming,
        RuleId::SecurityDefiner,
        RuleId::NoUnrequestedAbstractions,
        RuleId::NoUnapprovedPackages,
    ];

    pub fn title(self) -> &'static str {
        match self {
            RuleId::RouteFactory => "API routes use the route factory",
            RuleId::SqlNaming => "SQL naming: snake_case, plural",
            RuleId::TypeNaming => "TypeScript naming: PascalCase",
            RuleId::SecurityDefiner => "SECURITY DEFINER: search_path = ''",
            RuleId::NoUnrequestedAbstractions => "No unauthorized abstractions",
            RuleId::NoUnapprovedPackages => "No unauthorized packages",
        }
    }

    /// Constitution text restated verbatim in the Re-Run Appendix.
    pub fn constraint(self) -> &'static str {
        match self {
            RuleId::RouteFactory => {
                "EVERY API route MUST use the route factory. No raw handler exports."
            }
            RuleId::SqlNaming => "All SQL tables use snake_case, plural names.",
            RuleId::TypeNaming => "TypeScript types and interfaces use PascalCase.",
            RuleId::SecurityDefiner => {
                "All SECURITY DEFINER functions use SET search_path = ''."
            }
            RuleId::NoUnrequestedAbstractions => {
                "Do NOT create utility functions, helper files, or abstractions beyond what the contract specifies."
            }
            RuleId::NoUnapprovedPackages => {
                "Do NOT install packages unless explicitly listed in your contract."
            }
        }
    }

    pub fn label(self) -> String {
        format!("Constitution: {}", self.title())
    }
}

/// The two phase kinds the pipeline drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Implement,
    Validate,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Implement => "implement",
            Phase::Validate => "validate",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque session-continuity handle returned by the agent runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionRef(pub String);

impl SessionRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
