//! Task contract model and Markdown section parsing.
//!
//! Contracts are free-form Markdown. Only the sections the gate engine needs
//! are interpreted; everything else is carried verbatim in `text` and reaches
//! the implementation phase untouched.

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::identity::ContractIdentity;
use crate::core::layers::{ContractLayer, normalize};
use crate::core::source::{self, Signature};

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{0,3}#{1,4}\s+(.+?)\s*#*\s*$").expect("heading regex"));
static BOLD_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*]\s+)?\*\*([^*]+?)\*\*\s*:?\s*(.*)$").expect("bold label regex")
});
static LIST_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(.*)$").expect("list item regex"));
static BACKTICK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("backtick regex"));
static INLINE_LAYER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*layer\s*:\s*(.+)$").expect("inline layer regex"));

/// Parsed task contract. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContract {
    pub id: String,
    pub sprint_phase: String,
    pub path: PathBuf,
    /// Full contract text, embedded verbatim in the implementation directive.
    pub text: String,
    pub produces: Vec<String>,
    pub consumes: Vec<String>,
    pub forbidden: Vec<String>,
    pub layer: Option<ContractLayer>,
    pub interface: Vec<InterfaceEntry>,
    pub verification_commands: Vec<String>,
    pub dependencies: Vec<String>,
}

/// One declared export, optionally scoped to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceEntry {
    pub file: Option<String>,
    pub signature: Signature,
}

impl TaskContract {
    pub fn from_text(identity: ContractIdentity, path: PathBuf, text: String) -> Self {
        let sections = parse_sections(&text);
        TaskContract {
            id: identity.id,
            sprint_phase: identity.sprint_phase,
            path,
            produces: sections.produces,
            consumes: sections.consumes,
            forbidden: sections.forbidden,
            layer: sections.layer,
            interface: sections.interface,
            verification_commands: sections.verification_commands,
            dependencies: sections.dependencies,
            text,
        }
    }

    /// Gate report location relative to the repository root.
    pub fn report_relpath(&self) -> PathBuf {
        PathBuf::from("tasks")
            .join(format!("sprint-{}", self.sprint_phase))
            .join("gate-reports")
            .join(format!("{}-gate.md", self.id))
    }

    /// Directory holding gate reports for this contract's sprint phase.
    pub fn report_dir_relpath(&self) -> String {
        format!("tasks/sprint-{}/gate-reports/", self.sprint_phase)
    }
}

/// Sections extracted from contract Markdown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ContractSections {
    pub produces: Vec<String>,
    pub consumes: Vec<String>,
    pub forbidden: Vec<String>,
    pub layer: Option<ContractLayer>,
    pub interface: Vec<InterfaceEntry>,
    pub verification_commands: Vec<String>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Produces,
    Consumes,
    Forbidden,
    Layer,
    Interface,
    Verification,
    Dependencies,
}

fn classify_heading(raw: &str) -> Option<Section> {
    let title = raw
        .trim()
        .trim_end_matches(':')
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ' ')
        .to_ascii_lowercase();
    let table = [
        ("produces", Section::Produces),
        ("consumes", Section::Consumes),
        ("forbidden", Section::Forbidden),
        ("layer", Section::Layer),
        ("interface", Section::Interface),
        ("verification", Section::Verification),
        ("dependencies", Section::Dependencies),
        ("packages", Section::Dependencies),
    ];
    table
        .iter()
        .find(|(prefix, _)| title.starts_with(prefix))
        .map(|(_, section)| *section)
}

/// Walk the contract line by line and collect the recognised sections.
pub fn parse_sections(text: &str) -> ContractSections {
    let mut out = ContractSections::default();
    let mut current: Option<Section> = None;
    let mut in_fence = false;
    let mut interface_file: Option<String> = None;
    let mut interface_block = String::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }

        if !in_fence {
            let header = HEADING_RE
                .captures(line)
                .map(|caps| (caps[1].to_string(), String::new()))
                .or_else(|| {
                    BOLD_LABEL_RE
                        .captures(line)
                        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
                });
            if let Some((title, inline)) = header {
                match classify_heading(&title) {
                    Some(section) => {
                        if current == Some(Section::Interface) && section != Section::Interface {
                            flush_interface(&mut out, &interface_file, &mut interface_block);
                        }
                        current = Some(section);
                        if !inline.trim().is_empty() {
                            apply_line(&mut out, section, &inline, false);
                        }
                        continue;
                    }
                    None => {
                        let is_heading = HEADING_RE.is_match(line);
                        if current == Some(Section::Interface) {
                            // Headings and bold labels inside the interface section may name a file.
                            if let Some(path) = path_in(&title).or_else(|| path_in(&inline)) {
                                flush_interface(&mut out, &interface_file, &mut interface_block);
                                interface_file = Some(path);
                                continue;
                            }
                            if is_heading && heading_depth(line) <= 2 {
                                flush_interface(&mut out, &interface_file, &mut interface_block);
                                current = None;
                            }
                            if is_heading {
                                continue;
                            }
                        } else if is_heading {
                            current = None;
                            continue;
                        }
                        // Bold text that is not a section label is ordinary content.
                    }
                }
            }
        }

        let Some(section) = current else { continue };
        if section == Section::Interface {
            let stripped = strip_list_marker(trimmed).trim_matches('`');
            if !in_fence && !stripped.starts_with("export") {
                if let Some(path) = path_in(trimmed) {
                    flush_interface(&mut out, &interface_file, &mut interface_block);
                    interface_file = Some(path);
                }
                continue;
            }
            interface_block.push_str(stripped);
            interface_block.push('\n');
            continue;
        }
        apply_line(&mut out, section, line, in_fence);
    }
    flush_interface(&mut out, &interface_file, &mut interface_block);

    if out.layer.is_none() {
        out.layer = INLINE_LAYER_RE
            .captures(text)
            .and_then(|caps| ContractLayer::parse(&caps[1]));
    }
    for list in [
        &mut out.produces,
        &mut out.consumes,
        &mut out.forbidden,
        &mut out.dependencies,
    ] {
        dedup_in_order(list);
    }
    out
}

fn heading_depth(line: &str) -> usize {
    line.trim_start().chars().take_while(|c| *c == '#').count()
}

fn apply_line(out: &mut ContractSections, section: Section, line: &str, in_fence: bool) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    match section {
        Section::Produces | Section::Consumes | Section::Forbidden => {
            let Some(entry) = list_entry(line) else { return };
            let target = match section {
                Section::Produces => &mut out.produces,
                Section::Consumes => &mut out.consumes,
                _ => &mut out.forbidden,
            };
            target.push(normalize(&entry));
        }
        Section::Layer => {
            if out.layer.is_none() {
                out.layer = ContractLayer::parse(strip_list_marker(trimmed));
            }
        }
        Section::Verification => {
            let command = if in_fence {
                Some(trimmed.trim_start_matches("$ ").to_string())
            } else {
                LIST_ITEM_RE.captures(line).map(|caps| {
                    let item = caps[1].trim();
                    BACKTICK_RE
                        .captures(item)
                        .map_or_else(|| item.to_string(), |inner| inner[1].trim().to_string())
                })
            };
            if let Some(command) = command.filter(|c| !c.is_empty() && !c.starts_with('#')) {
                out.verification_commands.push(command);
            }
        }
        Section::Dependencies => {
            if let Some(entry) = list_entry(line) {
                out.dependencies.push(package_name(&entry).to_string());
            }
        }
        Section::Interface => {}
    }
}

/// Path or package carried by a list item: first backtick span, else first token.
fn list_entry(line: &str) -> Option<String> {
    let caps = LIST_ITEM_RE.captures(line)?;
    let item = caps[1].trim();
    let entry = match BACKTICK_RE.captures(item) {
        Some(inner) => inner[1].trim().to_string(),
        None => item
            .split_whitespace()
            .next()?
            .trim_end_matches([',', ';', ':'])
            .to_string(),
    };
    let lowered = entry.to_ascii_lowercase();
    if entry.is_empty() || matches!(lowered.as_str(), "none" | "n/a" | "(none)" | "-") {
        return None;
    }
    Some(entry)
}

fn strip_list_marker(text: &str) -> &str {
    let trimmed = text.trim();
    for marker in ["- ", "* ", "+ "] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return rest.trim_start();
        }
    }
    trimmed
}

/// A backticked (or bare) token that looks like a source path.
fn path_in(text: &str) -> Option<String> {
    let candidate = BACKTICK_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .or_else(|| {
            text.split_whitespace()
                .map(|token| token.trim_matches(|c: char| matches!(c, '*' | ':' | ',' | '(' | ')')))
                .find(|token| token.contains('/'))
                .map(str::to_string)
        })?;
    let looks_like_path = !candidate.contains(' ')
        && !candidate.starts_with("export")
        && [".ts", ".tsx", ".js", ".jsx", ".sql"]
            .iter()
            .any(|ext| candidate.ends_with(ext));
    looks_like_path.then(|| normalize(&candidate))
}

fn flush_interface(out: &mut ContractSections, file: &Option<String>, block: &mut String) {
    if block.trim().is_empty() {
        block.clear();
        return;
    }
    for signature in source::exports(block) {
        out.interface.push(InterfaceEntry {
            file: file.clone(),
            signature,
        });
    }
    block.clear();
}

/// `@scope/pkg@1.2` -> `@scope/pkg`, `zod@3` -> `zod`, `lodash/fp` -> `lodash`.
pub fn package_name(spec: &str) -> &str {
    let spec = spec.trim();
    if let Some(rest) = spec.strip_prefix('@') {
        let mut parts = rest.splitn(3, '/');
        let scope = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        let name = name.split('@').next().unwrap_or_default();
        let len = 1 + scope.len() + if name.is_empty() { 0 } else { 1 + name.len() };
        return &spec[..len.min(spec.len())];
    }
    let end = spec.find(['/', '@']).unwrap_or(spec.len());
    &spec[..end]
}

fn dedup_in_order(list: &mut Vec<String>) {
    let mut seen = std::collections::BTreeSet::new();
    list.retain(|item| seen.insert(item.clone()));
}
