//! Constitution rules: project-wide conventions checked after the automated gates.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::engine::{FileScope, Finding, GateInput, ImportTarget, Outcome, is_script, resolve_import};
use crate::core::layers::{FileLayer, path_matches};
use crate::core::source;
use crate::core::types::RuleId;

pub type RuleFn = fn(&GateInput<'_>, &FileScope) -> Outcome;

/// Rule table in report order.
pub const RULES: [(RuleId, RuleFn); 6] = [
    (RuleId::RouteFactory, route_factory),
    (RuleId::SqlNaming, sql_naming),
    (RuleId::TypeNaming, type_naming),
    (RuleId::SecurityDefiner, security_definer),
    (RuleId::NoUnrequestedAbstractions, no_unrequested_abstractions),
    (RuleId::NoUnapprovedPackages, no_unapproved_packages),
];

static RAW_HANDLER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bexport\s+(?:async\s+function\s+|function\s+|const\s+)(GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS)\b\s*(=\s*(?:async\s*)?(?:\(|[A-Za-z_$][\w$]*\s*=>)|\()",
    )
    .expect("raw handler regex")
});
static CREATE_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bcreate\s+table\s+(?:if\s+not\s+exists\s+)?(?:"?\w+"?\.)?"?(\w+)"?"#)
        .expect("create table regex")
});
static CREATE_FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bcreate\s+(?:or\s+replace\s+)?function\s+(?:"?\w+"?\.)?"?(\w+)"?"#)
        .expect("create function regex")
});
static SECURITY_DEFINER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bsecurity\s+definer\b").expect("security definer regex"));
static EMPTY_SEARCH_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bset\s+search_path\s*(?:=|\bto\b)\s*(?:''|"")"#).expect("search path regex")
});
static SNAKE_CASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]*(?:_[a-z0-9]+)*$").expect("snake case regex"));
static PASCAL_CASE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").expect("pascal case regex"));
static DEFAULT_EXPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bexport\s+default\s+(?:async\s+)?(?:function|class)\s*\*?\s*([A-Za-z_$][\w$]*)")
        .expect("default export regex")
});
static ABSTRACTION_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(helper|helpers|util|utils|factory|manager|wrapper)$").expect("abstraction regex")
});

/// Plural table names that do not end in `s`.
const IRREGULAR_PLURALS: &[&str] = &["people", "children", "data", "media", "metadata", "criteria", "feedback"];

/// Framework conventions a route or page file may export without a contract entry.
const FRAMEWORK_EXPORTS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "metadata", "generateMetadata",
    "generateStaticParams", "dynamic", "revalidate", "runtime", "config", "viewport",
];

fn route_factory(input: &GateInput<'_>, _scope: &FileScope) -> Outcome {
    let factory = &input.rules.route_factory;
    let routes: Vec<(&str, &str)> = input
        .text_files()
        .filter(|(path, _)| is_route_file(path))
        .collect();
    if routes.is_empty() {
        return Outcome::not_applicable("no API route files produced");
    }
    let mut violations = Vec::new();
    for (path, text) in routes {
        let code = source::strip_comments(text);
        for caps in RAW_HANDLER_RE.captures_iter(&code) {
            let Some(whole) = caps.get(0) else { continue };
            violations.push(Finding::new(
                Some(path),
                format!("handlers are built with `{factory}()`"),
                format!("line {}: raw `{}` handler export", source::line_of(&code, whole.start()), &caps[1]),
                format!("Wrap the `{}` handler in `{factory}()`; no raw handler exports.", &caps[1]),
            ));
        }
        if !code.contains(factory.as_str()) {
            violations.push(Finding::new(
                Some(path),
                format!("route uses `{factory}()`"),
                format!("no `{factory}` call"),
                format!("Export every handler from `{factory}()`."),
            ));
        }
    }
    Outcome::from_findings(format!("all routes use `{factory}()`"), violations, Vec::new())
}

fn is_route_file(path: &str) -> bool {
    FileLayer::of(path) == FileLayer::Api
        && path.starts_with("app/api/")
        && path
            .rsplit('/')
            .next()
            .is_some_and(|name| name.starts_with("route."))
}

fn sql_files<'a>(input: &GateInput<'a>) -> Vec<(&'a str, &'a str)> {
    input
        .text_files()
        .filter(|(path, _)| path.ends_with(".sql"))
        .collect()
}

fn sql_naming(input: &GateInput<'_>, _scope: &FileScope) -> Outcome {
    let mut tables = 0;
    let mut violations = Vec::new();
    for (path, text) in sql_files(input) {
        let code = strip_sql_comments(text);
        for caps in CREATE_TABLE_RE.captures_iter(&code) {
            tables += 1;
            let name = &caps[1];
            let line = caps.get(0).map_or(1, |m| source::line_of(&code, m.start()));
            let snake = SNAKE_CASE_RE.is_match(name);
            let plural = name.ends_with('s')
                || IRREGULAR_PLURALS
                    .iter()
                    .any(|word| name == *word || name.ends_with(&format!("_{word}")));
            if !(snake && plural) {
                let problem = match (snake, plural) {
                    (false, false) => "not snake_case and not plural",
                    (false, true) => "not snake_case",
                    _ => "not plural",
                };
                violations.push(Finding::new(
                    Some(path),
                    "tables use snake_case, plural names",
                    format!("line {line}: table `{name}` is {problem}"),
                    format!("Rename table `{name}` to a snake_case plural name."),
                ));
            }
        }
    }
    if tables == 0 {
        return Outcome::not_applicable("no tables created");
    }
    Outcome::from_findings(format!("{tables} tables named correctly"), violations, Vec::new())
}

fn type_naming(input: &GateInput<'_>, _scope: &FileScope) -> Outcome {
    let mut declarations = 0;
    let mut violations = Vec::new();
    for (path, text) in input.text_files().filter(|(path, _)| is_script(path)) {
        for (line, kind, name) in source::type_declarations(text) {
            declarations += 1;
            if !PASCAL_CASE_RE.is_match(&name) {
                violations.push(Finding::new(
                    Some(path),
                    "types and interfaces use PascalCase",
                    format!("line {line}: {kind} `{name}`"),
                    format!("Rename {kind} `{name}` to PascalCase."),
                ));
            }
        }
    }
    if declarations == 0 {
        return Outcome::not_applicable("no type declarations");
    }
    Outcome::from_findings(format!("{declarations} declarations in PascalCase"), violations, Vec::new())
}

fn security_definer(input: &GateInput<'_>, _scope: &FileScope) -> Outcome {
    let mut definers = 0;
    let mut violations = Vec::new();
    for (path, text) in sql_files(input) {
        let code = strip_sql_comments(text);
        let starts: Vec<(usize, String)> = CREATE_FUNCTION_RE
            .captures_iter(&code)
            .filter_map(|caps| Some((caps.get(0)?.start(), caps[1].to_string())))
            .collect();
        for (idx, (start, name)) in starts.iter().enumerate() {
            let end = starts.get(idx + 1).map_or(code.len(), |(next, _)| *next);
            let body = &code[*start..end];
            if !SECURITY_DEFINER_RE.is_match(body) {
                continue;
            }
            definers += 1;
            if !EMPTY_SEARCH_PATH_RE.is_match(body) {
                violations.push(Finding::new(
                    Some(path),
                    "SECURITY DEFINER functions set `search_path = ''`",
                    format!(
                        "line {}: function `{name}` is SECURITY DEFINER without an empty search_path",
                        source::line_of(&code, *start)
                    ),
                    format!("Add `SET search_path = ''` to function `{name}` and schema-qualify every reference."),
                ));
            }
        }
    }
    if definers == 0 {
        return Outcome::not_applicable("no SECURITY DEFINER functions");
    }
    Outcome::from_findings(format!("{definers} SECURITY DEFINER functions pin search_path"), violations, Vec::new())
}

fn strip_sql_comments(text: &str) -> String {
    text.lines()
        .map(|line| match line.find("--") {
            Some(idx) => &line[..idx],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn no_unrequested_abstractions(input: &GateInput<'_>, scope: &FileScope) -> Outcome {
    let interface = &input.contract.interface;
    let mut violations = Vec::new();
    for (path, text) in input
        .text_files()
        .filter(|(path, _)| is_script(path) && scope.in_scope(path))
    {
        let declared_here: BTreeSet<&str> = interface
            .iter()
            .filter(|entry| entry.file.as_deref().is_none_or(|file| path_matches(path, file)))
            .map(|entry| entry.signature.name.as_str())
            .collect();
        let scoped = interface
            .iter()
            .any(|entry| entry.file.as_deref().is_some_and(|file| path_matches(path, file)));
        let code = source::strip_comments(text);
        let defaults: BTreeSet<String> = DEFAULT_EXPORT_RE
            .captures_iter(&code)
            .map(|caps| caps[1].to_string())
            .collect();

        for export in source::exports(text) {
            let name = export.name.as_str();
            if declared_here.contains(name)
                || defaults.contains(name)
                || FRAMEWORK_EXPORTS.contains(&name)
            {
                continue;
            }
            if scoped {
                violations.push(Finding::new(
                    Some(path),
                    "only the exports declared in the Interface Contract",
                    format!("undeclared export `{name}`"),
                    format!("Remove `{name}` or make it module-private; the contract does not request it."),
                ));
            } else if ABSTRACTION_NAME_RE.is_match(name) {
                violations.push(Finding::new(
                    Some(path),
                    "no helpers, utilities, or factories beyond the contract",
                    format!("exported abstraction `{name}`"),
                    format!("Inline `{name}` at its call site; the contract does not request it."),
                ));
            }
        }
    }
    Outcome::from_findings("no abstractions beyond contract scope", violations, Vec::new())
}

fn no_unapproved_packages(input: &GateInput<'_>, _scope: &FileScope) -> Outcome {
    let contract = input.contract;
    let mut violations = Vec::new();
    let mut seen = BTreeSet::new();
    for (path, text) in input.text_files().filter(|(path, _)| is_script(path)) {
        for import in source::imports(text) {
            let ImportTarget::Package(name) = resolve_import(path, &import.specifier) else {
                continue;
            };
            let approved = contract.dependencies.iter().any(|dep| *dep == name)
                || input.rules.allowed_packages.iter().any(|allowed| *allowed == name);
            if approved || !seen.insert((path.to_string(), name.clone())) {
                continue;
            }
            violations.push(Finding::new(
                Some(path),
                "only packages listed in the contract or the project allowlist",
                format!("line {}: imports unapproved package `{name}`", import.line),
                format!("Remove the dependency on `{name}`; do NOT install packages unless the contract lists them."),
            ));
        }
    }
    Outcome::from_findings("no packages beyond the allowlist", violations, Vec::new())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::core::contract::TaskContract;
    use crate::core::engine::{ProducedFile, RuleParams};
    use crate::core::identity::ContractIdentity;
    use crate::core::types::Verdict;

    fn contract(text: &str) -> TaskContract {
        TaskContract::from_text(
            ContractIdentity {
                id: "S2-004".to_string(),
                sprint_phase: "s2".to_string(),
            },
            PathBuf::from("tasks/S2-004.md"),
            text.to_string(),
        )
    }

    fn run(rule: RuleFn, contract: &TaskContract, files: &[ProducedFile]) -> Outcome {
        let rules = RuleParams::default();
        let input = GateInput {
            contract,
            files,
            compile: None,
            advisory: None,
            rules: &rules,
        };
        let scope = FileScope::compute(&contract.produces, files);
        rule(&input, &scope)
    }

    #[test]
    fn raw_route_handlers_fail() {
        let contract = contract("");
        let files = vec![
            ProducedFile::text(
                "app/api/leads/route.ts",
                "export async function GET(req: Request) {\n  return Response.json([]);\n}\n",
            ),
            ProducedFile::text(
                "app/api/docs/route.ts",
                "export const GET = createApiRoute({ handler: async () => [] });\n",
            ),
        ];
        let outcome = run(route_factory, &contract, &files);
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(outcome.findings.len(), 2);
        assert!(outcome.findings.iter().all(|f| f.file.as_deref() == Some("app/api/leads/route.ts")));
    }

    #[test]
    fn route_rule_not_applicable_without_routes() {
        let outcome = run(route_factory, &contract(""), &[ProducedFile::text("lib/a.ts", "")]);
        assert_eq!(outcome.verdict, Verdict::NotApplicable);
    }

    #[test]
    fn table_names_must_be_snake_plural() {
        let files = vec![ProducedFile::text(
            "supabase/migrations/001.sql",
            "create table public.documents (id uuid);\nCREATE TABLE IF NOT EXISTS \"UserProfile\" (id uuid);\ncreate table lead_source (id uuid);\n-- create table ignored (id uuid);\n",
        )];
        let outcome = run(sql_naming, &contract(""), &files);
        assert_eq!(outcome.findings.len(), 2);
        assert!(outcome.findings[0].found.contains("UserProfile"));
        assert!(outcome.findings[0].found.contains("not snake_case"));
        assert!(outcome.findings[1].found.contains("`lead_source` is not plural"));
    }

    #[test]
    fn type_names_must_be_pascal_case() {
        let files = vec![ProducedFile::text(
            "lib/types/shared.ts",
            "export interface Lead {}\nexport type leadRow = {};\n",
        )];
        let outcome = run(type_naming, &contract(""), &files);
        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].found, "line 2: type `leadRow`");
    }

    #[test]
    fn security_definer_requires_empty_search_path() {
        let sql = "create or replace function public.good() returns void\nlanguage sql security definer set search_path = ''\nas $$ select 1 $$;\n\ncreate function bad() returns void language plpgsql security definer as $$ begin end $$;\n\ncreate function plain() returns int as $$ select 1 $$;\n";
        let files = vec![ProducedFile::text("supabase/migrations/002.sql", sql)];
        let outcome = run(security_definer, &contract(""), &files);
        assert_eq!(outcome.findings.len(), 1);
        assert!(outcome.findings[0].found.contains("`bad`"));
    }

    #[test]
    fn undeclared_exports_in_scoped_files_fail() {
        let contract = contract(
            "## Produces\n- lib/docs.ts\n## Interface Contract\n`lib/docs.ts`\n```ts\nexport function getDocs(): Promise<Doc[]>\n```\n",
        );
        let files = vec![ProducedFile::text(
            "lib/docs.ts",
            "export async function getDocs(): Promise<Doc[]> {\n  return mapRows([]);\n}\nexport function mapRows(rows: Row[]): Doc[] {\n  return [];\n}\n",
        )];
        let outcome = run(no_unrequested_abstractions, &contract, &files);
        assert_eq!(outcome.findings.len(), 1);
        assert!(outcome.findings[0].found.contains("mapRows"));
    }

    #[test]
    fn helper_names_fail_without_interface() {
        let contract = contract("## Produces\n- components/Card.tsx\n");
        let files = vec![ProducedFile::text(
            "components/Card.tsx",
            "export default function Card() {\n  return null;\n}\nexport const formatHelper = (s: string) => s;\n",
        )];
        let outcome = run(no_unrequested_abstractions, &contract, &files);
        assert_eq!(outcome.findings.len(), 1);
        assert!(outcome.findings[0].found.contains("formatHelper"));
    }

    #[test]
    fn packages_must_be_listed_or_allowed() {
        let contract = contract("## Dependencies\n- date-fns\n");
        let files = vec![ProducedFile::text(
            "lib/a.ts",
            "import { z } from 'zod';\nimport { format } from 'date-fns';\nimport _ from 'lodash/fp';\nimport fs from 'node:fs';\nimport { x } from './x';\n",
        )];
        let outcome = run(no_unapproved_packages, &contract, &files);
        assert_eq!(outcome.findings.len(), 1);
        assert!(outcome.findings[0].found.contains("`lodash`"));
    }
}
