//! The ten automated checks, as an ordered table of pure predicates.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::contract::InterfaceEntry;
use crate::core::engine::{
    CommandOutcome, Finding, GateInput, ImportTarget, Outcome, excerpt, is_script, resolve_import,
};
use crate::core::layers::{FileLayer, LineLimit, path_matches};
use crate::core::source::{self, Signature, SymbolKind};
use crate::core::types::CheckId;

pub type CheckFn = fn(&GateInput<'_>) -> Outcome;

/// Check table in report order.
pub const CHECKS: [(CheckId, CheckFn); 10] = [
    (CheckId::Compiles, compiles),
    (CheckId::FileScope, file_scope),
    (CheckId::ImportBoundaries, import_boundaries),
    (CheckId::NoTypeEscapes, no_type_escapes),
    (CheckId::NoEdgeRuntime, no_edge_runtime),
    (CheckId::NoPrivilegedKey, no_privileged_key),
    (CheckId::FunctionLineCounts, function_line_counts),
    (CheckId::InterfaceConformance, interface_conformance),
    (CheckId::SharedSchemas, shared_schemas),
    (CheckId::MigrationAdvisory, migration_advisory),
];

static ANY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\s*any\b|\bas\s+any\b").expect("any regex"));
static EDGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"runtime.*edge").expect("edge runtime regex"));
static INLINE_SCHEMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"z\.object|z\.string|z\.enum").expect("inline schema regex"));

const OUTPUT_LINES: usize = 5;

fn compiles(input: &GateInput<'_>) -> Outcome {
    let Some(outcome) = input.compile else {
        return Outcome::review(
            "REVIEW_REQUIRED: no compile command configured",
            vec![Finding::new(
                None,
                "a type check command runs and exits 0",
                "no compile command configured",
                "Configure `gate.compile_command` so the type check can run.",
            )],
        );
    };
    if let Some(reason) = outcome.inconclusive() {
        return Outcome::review(
            format!("REVIEW_REQUIRED: {reason}"),
            vec![Finding::new(
                None,
                format!("`{}` exits 0", outcome.command),
                reason,
                "Make sure the type check can run to completion in the repository.",
            )],
        );
    }
    if outcome.succeeded() {
        return Outcome::pass(format!("`{}` exited 0", outcome.command));
    }
    let errors = excerpt(&outcome.output, OUTPUT_LINES);
    Outcome::fail(
        exit_detail(outcome),
        vec![Finding::new(
            None,
            format!("`{}` exits 0", outcome.command),
            if errors.is_empty() { exit_detail(outcome) } else { errors },
            format!("Fix every error reported by `{}`.", outcome.command),
        )],
    )
}

fn exit_detail(outcome: &CommandOutcome) -> String {
    match outcome.exit_code {
        Some(code) => format!("`{}` exited {code}", outcome.command),
        None => format!("`{}` was terminated by a signal", outcome.command),
    }
}

fn file_scope(input: &GateInput<'_>) -> Outcome {
    let scope = crate::core::engine::FileScope::compute(&input.contract.produces, input.files);
    let mut violations = Vec::new();
    for missing in &scope.missing {
        violations.push(Finding::new(
            Some(missing),
            "file listed in Produces is created",
            "MISSING_FILE: not produced",
            format!("Create `{missing}` as declared in the contract's Produces section."),
        ));
    }
    for extra in &scope.extra {
        violations.push(Finding::new(
            Some(extra),
            "only files listed in Produces are changed",
            "UNAUTHORIZED_FILE: not listed in Produces",
            format!("Remove `{extra}` and keep all changes inside the Produces list."),
        ));
    }
    Outcome::from_findings(
        format!("{} of {} declared files produced, no extras", scope.received.len(), scope.expected.len()),
        violations,
        Vec::new(),
    )
}

fn unreadable(input: &GateInput<'_>) -> Vec<Finding> {
    input
        .unreadable_files()
        .into_iter()
        .map(|path| {
            Finding::new(
                Some(path),
                "file contents can be read",
                "file could not be read",
                "Make sure the file is a readable UTF-8 text file.",
            )
        })
        .collect()
}

fn import_boundaries(input: &GateInput<'_>) -> Outcome {
    let contract = input.contract;
    let mut violations = Vec::new();
    for (path, text) in input.text_files().filter(|(path, _)| is_script(path)) {
        let layer = FileLayer::of(path);
        for import in source::imports(text) {
            let spec = &import.specifier;
            let target = resolve_import(path, spec);
            let forbidden = contract.forbidden.iter().find(|entry| match &target {
                ImportTarget::Internal(resolved) => path_matches(resolved, entry),
                ImportTarget::Package(name) => *entry == name || *entry == spec,
                ImportTarget::Builtin => *entry == spec,
            });
            if let Some(entry) = forbidden {
                violations.push(Finding::new(
                    Some(path),
                    format!("no import matching Forbidden entry `{entry}`"),
                    format!("line {}: imports `{spec}`", import.line),
                    format!("Remove the import of `{spec}`; the contract forbids `{entry}`."),
                ));
                continue;
            }
            let ImportTarget::Internal(resolved) = target else {
                continue;
            };
            let target_layer = FileLayer::of(&resolved);
            if !layer.may_import(target_layer) {
                violations.push(Finding::new(
                    Some(path),
                    format!("{} code does not import from {}", layer.label(), target_layer.label()),
                    format!("line {}: imports `{spec}` ({})", import.line, target_layer.label()),
                    format!(
                        "Remove the import of `{spec}`; {} may not depend on {}.",
                        layer.label(),
                        target_layer.label()
                    ),
                ));
                continue;
            }
            let declared = contract
                .consumes
                .iter()
                .chain(&contract.produces)
                .any(|entry| path_matches(&resolved, entry));
            if !declared {
                violations.push(Finding::new(
                    Some(path),
                    "project imports resolve to files listed in Consumes or Produces",
                    format!("line {}: imports undeclared `{spec}`", import.line),
                    format!("Import only from files listed in Consumes; `{resolved}` is not listed."),
                ));
            }
        }
    }
    Outcome::from_findings("all imports respect layer boundaries", violations, unreadable(input))
}

/// Line-oriented pattern scan over code with `prepare` applied.
fn scan_lines(
    text: &str,
    re: &Regex,
    prepare: fn(&str) -> String,
) -> Vec<(usize, String)> {
    let prepared = prepare(text);
    let original: Vec<&str> = text.lines().collect();
    prepared
        .lines()
        .enumerate()
        .filter(|(_, line)| re.is_match(line))
        .map(|(idx, _)| {
            let shown = original.get(idx).map_or("", |line| line.trim());
            (idx + 1, shown.to_string())
        })
        .collect()
}

fn raw(text: &str) -> String {
    text.to_string()
}

fn no_type_escapes(input: &GateInput<'_>) -> Outcome {
    let mut violations = Vec::new();
    for (path, text) in input.text_files().filter(|(path, _)| is_script(path)) {
        if input.rules.any_allowed_paths.iter().any(|allowed| path_matches(path, allowed)) {
            continue;
        }
        for (line, shown) in scan_lines(text, &ANY_RE, source::skeleton) {
            violations.push(Finding::new(
                Some(path),
                "no `: any` or `as any`",
                format!("line {line}: {shown}"),
                "Replace `any` with a concrete type or `unknown` narrowed by a type guard.",
            ));
        }
    }
    Outcome::from_findings("no `any` types", violations, unreadable(input))
}

fn no_edge_runtime(input: &GateInput<'_>) -> Outcome {
    let mut violations = Vec::new();
    for (path, text) in input.text_files().filter(|(path, _)| is_script(path)) {
        if path_matches(path, &input.rules.edge_entry_file) {
            continue;
        }
        for (line, shown) in scan_lines(text, &EDGE_RE, source::strip_comments) {
            violations.push(Finding::new(
                Some(path),
                format!("edge runtime only in `{}`", input.rules.edge_entry_file),
                format!("line {line}: {shown}"),
                "Remove the edge runtime declaration; this file runs on the Node.js runtime.",
            ));
        }
    }
    Outcome::from_findings("no edge runtime declarations", violations, unreadable(input))
}

fn no_privileged_key(input: &GateInput<'_>) -> Outcome {
    let token = &input.rules.privileged_token;
    let Ok(re) = Regex::new(&regex::escape(token)) else {
        return Outcome::review("REVIEW_REQUIRED: privileged token pattern is invalid", Vec::new());
    };
    let mut violations = Vec::new();
    for (path, text) in input.text_files() {
        let sensitive = input
            .rules
            .sensitive_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()));
        if !sensitive {
            continue;
        }
        for (line, shown) in scan_lines(text, &re, raw) {
            violations.push(Finding::new(
                Some(path),
                format!("no `{token}` reference under {}", input.rules.sensitive_prefixes.join(", ")),
                format!("line {line}: {shown}"),
                format!("Remove `{token}`; privileged keys belong only in server-side function steps."),
            ));
        }
    }
    Outcome::from_findings(format!("no `{token}` in sensitive paths"), violations, unreadable(input))
}

fn function_line_counts(input: &GateInput<'_>) -> Outcome {
    let mut violations = Vec::new();
    let mut unresolved = unreadable(input);
    for (path, text) in input.text_files().filter(|(path, _)| is_script(path)) {
        let layer = FileLayer::of(path);
        match layer.line_limit() {
            None => {}
            Some(LineLimit::PerFile(limit)) => {
                let lines = text.lines().count();
                if lines > limit {
                    violations.push(Finding::new(
                        Some(path),
                        format!("{} step files have at most {limit} lines", layer.label()),
                        format!("{lines} lines"),
                        format!("Reduce `{path}` to {limit} lines or fewer without adding new files."),
                    ));
                }
            }
            Some(LineLimit::PerFunction(limit)) => match source::functions(text) {
                Ok(spans) => {
                    for span in spans.iter().filter(|span| span.lines() > limit) {
                        violations.push(Finding::new(
                            Some(path),
                            format!("{} functions have at most {limit} lines", layer.label()),
                            format!(
                                "`{}` spans {} lines (lines {}-{})",
                                span.name,
                                span.lines(),
                                span.start_line,
                                span.end_line
                            ),
                            format!("Shorten `{}` to {limit} lines or fewer.", span.name),
                        ));
                    }
                }
                Err(reason) => unresolved.push(Finding::new(
                    Some(path),
                    "function bodies can be measured",
                    reason,
                    "Make sure every function body in the file is syntactically closed.",
                )),
            },
        }
    }
    Outcome::from_findings("all functions within layer limits", violations, unresolved)
}

fn interface_conformance(input: &GateInput<'_>) -> Outcome {
    let declared = &input.contract.interface;
    if declared.is_empty() {
        return Outcome::not_applicable("contract declares no Interface Contract");
    }
    let produced: Vec<(&str, Vec<Signature>)> = input
        .text_files()
        .filter(|(path, _)| is_script(path))
        .map(|(path, text)| (path, source::exports(text)))
        .collect();

    let mut violations = Vec::new();
    let mut unresolved = Vec::new();
    for entry in declared {
        let candidates: Vec<&(&str, Vec<Signature>)> = match &entry.file {
            Some(file) => produced.iter().filter(|(path, _)| path_matches(path, file)).collect(),
            None => produced.iter().collect(),
        };
        let found = candidates.iter().find_map(|(path, exports)| {
            exports
                .iter()
                .find(|signature| signature.name == entry.signature.name)
                .map(|signature| (*path, signature))
        });
        let Some((path, actual)) = found else {
            let file = entry.file.as_deref();
            violations.push(Finding::new(
                file,
                format!("exports `{}`", entry.signature.display()),
                format!("no export named `{}`", entry.signature.name),
                format!("Export `{}` exactly as declared in the Interface Contract.", entry.signature.display()),
            ));
            continue;
        };
        match compare_signature(entry, actual) {
            Comparison::Match => {}
            Comparison::Mismatch(what) => violations.push(Finding::new(
                Some(path),
                format!("`{}`", entry.signature.display()),
                format!("`{}` ({what})", actual.display()),
                format!("Change `{}` to match the declared signature exactly.", actual.name),
            )),
            Comparison::Undetermined(what) => unresolved.push(Finding::new(
                Some(path),
                format!("`{}`", entry.signature.display()),
                format!("`{}` ({what})", actual.display()),
                format!("Annotate `{}` explicitly so it visibly matches the declared signature.", actual.name),
            )),
        }
    }
    unresolved.extend(unreadable(input));
    Outcome::from_findings(
        format!("{} declared exports match", declared.len()),
        violations,
        unresolved,
    )
}

enum Comparison {
    Match,
    Mismatch(String),
    Undetermined(String),
}

fn compare_signature(entry: &InterfaceEntry, actual: &Signature) -> Comparison {
    let expected = &entry.signature;
    let kinds_agree = expected.kind == actual.kind
        || (expected.kind.is_callable() && actual.kind.is_callable())
        || matches!(
            (expected.kind, actual.kind),
            (SymbolKind::Type, SymbolKind::Interface) | (SymbolKind::Interface, SymbolKind::Type)
        );
    if !kinds_agree {
        return Comparison::Mismatch("kind differs".to_string());
    }
    let (Some(want), Some(have)) = (&expected.params, &actual.params) else {
        if expected.params.is_some() {
            return Comparison::Undetermined("declared callable, parameters not visible".to_string());
        }
        return Comparison::Match;
    };
    if want.len() != have.len() {
        return Comparison::Mismatch(format!("arity {} instead of {}", have.len(), want.len()));
    }
    for (want, have) in want.iter().zip(have) {
        match (&want.ty, &have.ty) {
            (Some(want_ty), Some(have_ty)) if want_ty != have_ty => {
                return Comparison::Mismatch(format!("parameter `{}` typed `{have_ty}`", have.name));
            }
            (Some(_), None) => {
                return Comparison::Undetermined(format!("parameter `{}` has no type annotation", have.name));
            }
            _ => {}
        }
    }
    match (&expected.return_type, &actual.return_type) {
        (Some(want), Some(have)) if want != have => {
            Comparison::Mismatch(format!("returns `{have}`"))
        }
        (Some(_), None) => Comparison::Undetermined("return type is inferred".to_string()),
        _ => Comparison::Match,
    }
}

fn shared_schemas(input: &GateInput<'_>) -> Outcome {
    let shared = &input.rules.shared_schema_file;
    let mut violations = Vec::new();
    for (path, text) in input.text_files() {
        if FileLayer::of(path) != FileLayer::Api || path_matches(path, shared) {
            continue;
        }
        for (line, shown) in scan_lines(text, &INLINE_SCHEMA_RE, source::strip_comments) {
            violations.push(Finding::new(
                Some(path),
                format!("validation schemas live in `{shared}`"),
                format!("line {line}: inline schema `{shown}`"),
                format!("Move the schema into `{shared}` and import it."),
            ));
        }
    }
    Outcome::from_findings("no inline schemas in route files", violations, unreadable(input))
}

fn migration_advisory(input: &GateInput<'_>) -> Outcome {
    let Some(layer) = input.contract.layer.filter(|layer| layer.is_data_layer()) else {
        let detail = match input.contract.layer {
            Some(layer) => format!("layer is {layer}"),
            None => "contract declares no layer".to_string(),
        };
        return Outcome::not_applicable(detail);
    };
    let Some(outcome) = input.advisory else {
        return Outcome::review(
            format!("REVIEW_REQUIRED: {layer} contract but no advisory command configured"),
            vec![Finding::new(
                None,
                "security advisory scan reports no findings",
                "advisory scan was not run",
                "Configure `gate.advisory_command` for database contracts.",
            )],
        );
    };
    if let Some(reason) = outcome.inconclusive() {
        return Outcome::review(
            format!("REVIEW_REQUIRED: {reason}"),
            vec![Finding::new(
                None,
                "security advisory scan reports no findings",
                reason,
                "Make sure the advisory scan can run to completion.",
            )],
        );
    }
    let findings = excerpt(&outcome.output, OUTPUT_LINES);
    if outcome.succeeded() && findings.is_empty() {
        return Outcome::pass(format!("`{}` reported no findings", outcome.command));
    }
    let found = if findings.is_empty() { exit_detail(outcome) } else { findings };
    Outcome::fail(
        format!("`{}` reported findings", outcome.command),
        vec![Finding::new(
            None,
            "security advisory scan reports no findings",
            found,
            "Resolve every advisory finding (row level security, policies, function search paths).",
        )],
    )
}
