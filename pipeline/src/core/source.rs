//! Lightweight TypeScript/TSX source scanning.
//!
//! This is not a parser. It blanks comments and string contents so brace and
//! paren matching stays honest, then pattern-matches the handful of shapes the
//! gate checks care about: imports, function bodies, exported signatures, and
//! type declarations. Anything it cannot close is reported as an error so the
//! calling check can mark itself for review instead of guessing.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static IMPORT_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s+(?:type\s+)?(?:[\w*{}\s,$]+?\s+from\s+)?['"]([^'"\n]+)['"]"#)
        .expect("import regex")
});
static EXPORT_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bexport\s+(?:type\s+)?(?:\*(?:\s+as\s+[\w$]+)?|\{[^}]*\})\s+from\s+['"]([^'"\n]+)['"]"#)
        .expect("export-from regex")
});
static CALL_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:require|import)\(\s*['"]([^'"\n]+)['"]\s*\)"#).expect("call import regex")
});
static FUNCTION_HEAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfunction\b\s*\*?\s*([A-Za-z_$][\w$]*)?\s*(?:<[^(]*>)?\s*\(")
        .expect("function head regex")
});
static ARROW_HEAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?\(")
        .expect("arrow head regex")
});
static EXPORT_FN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bexport\s+(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*(?:<[^(]*>)?\s*\(",
    )
    .expect("export fn regex")
});
static EXPORT_CONST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bexport\s+(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::\s*[^=]+?)?\s*=\s*(?:async\s+)?(\()?")
        .expect("export const regex")
});
static EXPORT_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bexport\s+(?:declare\s+)?(?:abstract\s+)?(type|interface|class|enum)\s+([A-Za-z_$][\w$]*)")
        .expect("export decl regex")
});
static TYPE_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:export\s+)?(?:declare\s+)?(type|interface)\s+([A-Za-z_$][\w$]*)")
        .expect("type decl regex")
});

/// An import specifier and the 1-based line it appears on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub line: usize,
    pub specifier: String,
}

/// Line span of a function body (inclusive, 1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpan {
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl FunctionSpan {
    pub fn lines(&self) -> usize {
        self.end_line + 1 - self.start_line
    }
}

/// Kind of an exported symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Const,
    Type,
    Interface,
    Class,
    Enum,
}

impl SymbolKind {
    /// Functions and arrow constants are interchangeable for conformance.
    pub fn is_callable(self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Const)
    }
}

/// One parameter of an exported callable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    /// Whitespace-free declared type, if any.
    pub ty: Option<String>,
    pub optional: bool,
}

/// Exported symbol signature, as far as it can be read from source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub kind: SymbolKind,
    pub name: String,
    /// `None` for non-callables.
    pub params: Option<Vec<Param>>,
    pub return_type: Option<String>,
}

impl Signature {
    pub fn arity(&self) -> Option<usize> {
        self.params.as_ref().map(Vec::len)
    }

    /// Compact rendering for report details, e.g. `getDocuments(orgId: string): Promise<Doc[]>`.
    pub fn display(&self) -> String {
        let Some(params) = &self.params else {
            return format!("{} {}", kind_keyword(self.kind), self.name);
        };
        let rendered: Vec<String> = params
            .iter()
            .map(|param| match &param.ty {
                Some(ty) => format!("{}: {}", param.name, ty),
                None => param.name.clone(),
            })
            .collect();
        match &self.return_type {
            Some(ret) => format!("{}({}): {}", self.name, rendered.join(", "), ret),
            None => format!("{}({})", self.name, rendered.join(", ")),
        }
    }
}

fn kind_keyword(kind: SymbolKind) -> &'static str {
    match kind {
        SymbolKind::Function => "function",
        SymbolKind::Const => "const",
        SymbolKind::Type => "type",
        SymbolKind::Interface => "interface",
        SymbolKind::Class => "class",
        SymbolKind::Enum => "enum",
    }
}

/// Replace comments with spaces, keeping newlines so line numbers survive.
pub fn strip_comments(src: &str) -> String {
    blank(src, false)
}

/// Replace comments and string-literal contents with spaces.
///
/// Quotes are kept; `'` and `"` strings end at a newline so stray apostrophes
/// in JSX text cannot swallow the rest of a file.
pub fn skeleton(src: &str) -> String {
    blank(src, true)
}

fn blank(src: &str, blank_strings: bool) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Str(char),
    }

    let chars: Vec<char> = src.chars().collect();
    let mut out = String::with_capacity(src.len());
    let mut state = State::Code;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            State::Code => {
                if c == '/' && next == Some('/') {
                    state = State::LineComment;
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                if c == '/' && next == Some('*') {
                    state = State::BlockComment;
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                if c == '\'' || c == '"' || c == '`' {
                    state = State::Str(c);
                }
                out.push(c);
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if c == '*' && next == Some('/') {
                    state = State::Code;
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                out.push(if c == '\n' { '\n' } else { ' ' });
            }
            State::Str(quote) => {
                if c == '\\' && next.is_some() {
                    if blank_strings {
                        out.push(' ');
                        out.push(if next == Some('\n') { '\n' } else { ' ' });
                    } else {
                        out.push(c);
                        out.extend(next);
                    }
                    i += 2;
                    continue;
                }
                if c == quote {
                    state = State::Code;
                    out.push(c);
                } else if c == '\n' && quote != '`' {
                    state = State::Code;
                    out.push('\n');
                } else if blank_strings && c != '\n' {
                    out.push(' ');
                } else {
                    out.push(c);
                }
            }
        }
        i += 1;
    }
    out
}

/// Every module specifier imported by `src`, in source order.
pub fn imports(src: &str) -> Vec<Import> {
    let code = strip_comments(src);
    let mut found: Vec<(usize, String)> = Vec::new();
    for re in [&*IMPORT_FROM_RE, &*EXPORT_FROM_RE, &*CALL_IMPORT_RE] {
        for caps in re.captures_iter(&code) {
            let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            found.push((whole.start(), spec.as_str().to_string()));
        }
    }
    found.sort();
    found.dedup();
    found
        .into_iter()
        .map(|(offset, specifier)| Import {
            line: line_of(&code, offset),
            specifier,
        })
        .collect()
}

/// Spans of every function body in `src`.
///
/// Covers `function` declarations/expressions and arrow functions bound with
/// `const`/`let`/`var`. Returns an error when a body never closes.
pub fn functions(src: &str) -> Result<Vec<FunctionSpan>, String> {
    let code = skeleton(src);
    let bytes = code.as_bytes();
    let mut spans = Vec::new();

    for caps in FUNCTION_HEAD_RE.captures_iter(&code) {
        let Some(whole) = caps.get(0) else { continue };
        let name = caps
            .get(1)
            .map_or_else(|| "<anonymous>".to_string(), |m| m.as_str().to_string());
        let params_end = matching_close(bytes, whole.end() - 1)
            .ok_or_else(|| format!("unclosed parameter list for `{name}`"))?;
        let Some(open) = body_open_after(bytes, params_end + 1) else {
            // Overload or ambient declaration without a body.
            continue;
        };
        let close = matching_close(bytes, open)
            .ok_or_else(|| format!("unclosed body for function `{name}`"))?;
        spans.push(FunctionSpan {
            name,
            start_line: line_of(&code, whole.start()),
            end_line: line_of(&code, close),
        });
    }

    for caps in ARROW_HEAD_RE.captures_iter(&code) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str().to_string();
        let params_end = matching_close(bytes, whole.end() - 1)
            .ok_or_else(|| format!("unclosed parameter list for `{name}`"))?;
        let Some(arrow) = arrow_after(bytes, params_end + 1) else {
            // `const x = (expr)` is not a function.
            continue;
        };
        let body_start = skip_ws(bytes, arrow + 2);
        let end = if bytes.get(body_start) == Some(&b'{') {
            matching_close(bytes, body_start)
                .ok_or_else(|| format!("unclosed body for function `{name}`"))?
        } else {
            expression_end(bytes, body_start)
                .ok_or_else(|| format!("unclosed expression body for `{name}`"))?
        };
        spans.push(FunctionSpan {
            name,
            start_line: line_of(&code, whole.start()),
            end_line: line_of(&code, end),
        });
    }

    spans.sort_by_key(|span| (span.start_line, span.end_line));
    Ok(spans)
}

/// Exported symbols of `src` with whatever signature information is visible.
pub fn exports(src: &str) -> Vec<Signature> {
    let code = strip_comments(src);
    let bytes = code.as_bytes();
    let mut found: Vec<(usize, Signature)> = Vec::new();

    for caps in EXPORT_FN_RE.captures_iter(&code) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let open = whole.end() - 1;
        let Some(close) = matching_close(bytes, open) else {
            continue;
        };
        found.push((
            whole.start(),
            Signature {
                kind: SymbolKind::Function,
                name: name.as_str().to_string(),
                params: Some(parse_params(&code[open + 1..close])),
                return_type: return_type_after(&code, close + 1),
            },
        ));
    }

    for caps in EXPORT_CONST_RE.captures_iter(&code) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str().to_string();
        let arrow = caps.get(2).and_then(|paren| {
            let close = matching_close(bytes, paren.start())?;
            arrow_after(bytes, close + 1)?;
            Some((paren.start(), close))
        });
        let signature = match arrow {
            Some((open, close)) => Signature {
                kind: SymbolKind::Const,
                name,
                params: Some(parse_params(&code[open + 1..close])),
                return_type: return_type_after(&code, close + 1),
            },
            None => Signature {
                kind: SymbolKind::Const,
                name,
                params: None,
                return_type: None,
            },
        };
        found.push((whole.start(), signature));
    }

    for caps in EXPORT_DECL_RE.captures_iter(&code) {
        let (Some(whole), Some(kind), Some(name)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let kind = match kind.as_str() {
            "type" => SymbolKind::Type,
            "interface" => SymbolKind::Interface,
            "class" => SymbolKind::Class,
            _ => SymbolKind::Enum,
        };
        found.push((
            whole.start(),
            Signature {
                kind,
                name: name.as_str().to_string(),
                params: None,
                return_type: None,
            },
        ));
    }

    found.sort_by_key(|(offset, _)| *offset);
    found.into_iter().map(|(_, signature)| signature).collect()
}

/// `type`/`interface` declarations as `(line, kind, name)`.
pub fn type_declarations(src: &str) -> Vec<(usize, &'static str, String)> {
    let code = strip_comments(src);
    TYPE_DECL_RE
        .captures_iter(&code)
        .filter_map(|caps| {
            let name = caps.get(2)?;
            let kind = if &caps[1] == "type" { "type" } else { "interface" };
            Some((line_of(&code, name.start()), kind, name.as_str().to_string()))
        })
        .collect()
}

/// Remove all whitespace and a trailing `;` so type text compares structurally.
pub fn normalize_type(ty: &str) -> String {
    ty.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_end_matches(';')
        .to_string()
}

/// 1-based line number of a byte offset.
pub fn line_of(text: &str, offset: usize) -> usize {
    let end = offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

fn parse_params(text: &str) -> Vec<Param> {
    split_top_level(text, b',')
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_param)
        .collect()
}

fn parse_param(raw: &str) -> Param {
    let (binding, default) = match top_level_index(raw.as_bytes(), b'=') {
        Some(idx) => (&raw[..idx], Some(&raw[idx + 1..])),
        None => (raw, None),
    };
    let (name, ty) = match top_level_index(binding.as_bytes(), b':') {
        Some(idx) => (binding[..idx].trim(), Some(normalize_type(&binding[idx + 1..]))),
        None => (binding.trim(), None),
    };
    let optional = name.ends_with('?') || default.is_some();
    Param {
        name: name.trim_end_matches('?').trim().to_string(),
        ty: ty.filter(|ty| !ty.is_empty()),
        optional,
    }
}

fn split_top_level(text: &str, sep: u8) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (idx, b) in bytes.iter().enumerate() {
        match *b {
            b'(' | b'[' | b'{' | b'<' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'>' if idx == 0 || bytes[idx - 1] != b'=' => depth -= 1,
            _ => {}
        }
        if *b == sep && depth == 0 {
            parts.push(&text[start..idx]);
            start = idx + 1;
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Index of the first `target` at nesting depth zero (ignoring `=>` and `==`).
fn top_level_index(bytes: &[u8], target: u8) -> Option<usize> {
    let mut depth = 0i32;
    for (idx, b) in bytes.iter().enumerate() {
        match *b {
            b'(' | b'[' | b'{' | b'<' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'>' if idx == 0 || bytes[idx - 1] != b'=' => depth -= 1,
            _ => {}
        }
        if *b == target && depth == 0 {
            let next = bytes.get(idx + 1).copied();
            if target == b'=' && matches!(next, Some(b'>') | Some(b'=')) {
                continue;
            }
            return Some(idx);
        }
    }
    None
}

/// Index of the bracket closing the one at `open`.
fn matching_close(bytes: &[u8], open: usize) -> Option<usize> {
    let (opening, closing) = match bytes.get(open)? {
        b'(' => (b'(', b')'),
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return None,
    };
    let mut depth = 0usize;
    for (idx, b) in bytes.iter().enumerate().skip(open) {
        if *b == opening {
            depth += 1;
        } else if *b == closing {
            depth -= 1;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

fn skip_ws(bytes: &[u8], mut idx: usize) -> usize {
    while bytes.get(idx).is_some_and(u8::is_ascii_whitespace) {
        idx += 1;
    }
    idx
}

/// After a parameter list, find the `{` opening the body, skipping a return
/// type annotation. Returns `None` at `;` (declaration without body).
fn body_open_after(bytes: &[u8], from: usize) -> Option<usize> {
    let mut angle = 0i32;
    let mut idx = skip_ws(bytes, from);
    if bytes.get(idx) == Some(&b':') {
        idx = skip_ws(bytes, idx + 1);
        // Object-literal return type.
        if bytes.get(idx) == Some(&b'{') {
            idx = matching_close(bytes, idx)? + 1;
        }
    }
    while let Some(b) = bytes.get(idx) {
        match *b {
            b'<' => angle += 1,
            b'>' if idx > 0 && bytes[idx - 1] != b'=' => angle -= 1,
            b'(' | b'[' => idx = matching_close(bytes, idx)?,
            b'{' if angle <= 0 => return Some(idx),
            b'{' => idx = matching_close(bytes, idx)?,
            b';' => return None,
            _ => {}
        }
        idx += 1;
    }
    None
}

/// After an arrow's parameter list, find the `=>` (skipping a return type).
fn arrow_after(bytes: &[u8], from: usize) -> Option<usize> {
    let mut idx = skip_ws(bytes, from);
    if bytes.get(idx) == Some(&b'=') && bytes.get(idx + 1) == Some(&b'>') {
        return Some(idx);
    }
    if bytes.get(idx) != Some(&b':') {
        return None;
    }
    idx += 1;
    while let Some(b) = bytes.get(idx) {
        match *b {
            b'=' if bytes.get(idx + 1) == Some(&b'>') => return Some(idx),
            b'(' | b'[' | b'{' => idx = matching_close(bytes, idx)?,
            b';' | b'\n' => return None,
            _ => {}
        }
        idx += 1;
    }
    None
}

/// End of an arrow expression body: the first `;`, `,` or closing bracket at
/// depth zero, or a newline at depth zero once the expression has started.
fn expression_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut idx = start;
    let mut last = start;
    while let Some(b) = bytes.get(idx) {
        match *b {
            b'(' | b'[' | b'{' => {
                idx = matching_close(bytes, idx)?;
                last = idx;
            }
            b';' | b',' | b')' | b']' | b'}' => return Some(last),
            b'\n' => {
                let next = skip_ws(bytes, idx);
                let continues = bytes
                    .get(next)
                    .is_some_and(|c| matches!(c, b'.' | b'?' | b':' | b'&' | b'|' | b'+' | b'-'));
                if !continues {
                    return Some(last);
                }
            }
            b if !b.is_ascii_whitespace() => last = idx,
            _ => {}
        }
        idx += 1;
    }
    Some(last)
}

fn return_type_after(code: &str, from: usize) -> Option<String> {
    let bytes = code.as_bytes();
    let idx = skip_ws(bytes, from);
    if bytes.get(idx) != Some(&b':') {
        return None;
    }
    let start = idx + 1;
    let mut angle = 0i32;
    let mut end = start;
    while let Some(b) = bytes.get(end) {
        match *b {
            b'<' => angle += 1,
            b'>' if bytes[end - 1] == b'=' => break,
            b'>' => angle -= 1,
            b'{' if angle <= 0 => break,
            b';' | b'\n' if angle <= 0 => break,
            b'(' | b'[' => end = matching_close(bytes, end)?,
            _ => {}
        }
        end += 1;
    }
    let mut text = code[start..end.min(code.len())].trim();
    // An arrow return type stops just before the `=` of `=>`.
    if let Some(stripped) = text.strip_suffix('=') {
        text = stripped.trim_end();
    }
    let normalized = normalize_type(text);
    (!normalized.is_empty()).then_some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_static_dynamic_and_reexport_imports() {
        let src = "import { a,\n  b } from '@/lib/a';\nimport type { T } from \"./types\";\nexport * from '../x';\nconst m = await import('pkg');\n// import nope from 'commented';\n";
        let specs: Vec<(usize, String)> = imports(src)
            .into_iter()
            .map(|import| (import.line, import.specifier))
            .collect();
        assert_eq!(
            specs,
            vec![
                (1, "@/lib/a".to_string()),
                (3, "./types".to_string()),
                (4, "../x".to_string()),
                (5, "pkg".to_string()),
            ]
        );
    }

    #[test]
    fn measures_function_and_arrow_bodies() {
        let src = "export function one(a: string): { ok: boolean } {\n  return { ok: true };\n}\n\nconst two = async (x: number) => {\n  const s = '}';\n  return x;\n};\nconst three = (y: number) =>\n  y + 1;\n";
        let spans = functions(src).expect("spans");
        let summary: Vec<(&str, usize)> = spans
            .iter()
            .map(|span| (span.name.as_str(), span.lines()))
            .collect();
        assert_eq!(summary, vec![("one", 3), ("two", 4), ("three", 2)]);
    }

    #[test]
    fn apostrophes_in_jsx_do_not_break_matching() {
        let src = "export default function Page() {\n  return (\n    <p>Don't panic</p>\n  );\n}\n";
        let spans = functions(src).expect("spans");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].lines(), 5);
    }

    #[test]
    fn unclosed_body_is_an_error() {
        let err = functions("function broken() {\n  if (x) {\n").unwrap_err();
        assert!(err.contains("broken"));
    }

    #[test]
    fn reads_exported_signatures() {
        let src = "export async function getDocuments(orgId: string, limit = 10): Promise<Doc[]> {\n  return [];\n}\nexport const toLabel = (doc: Doc): string => doc.name;\nexport const GET = createApiRoute({});\nexport interface Doc { name: string }\n";
        let found = exports(src);
        assert_eq!(found.len(), 4);
        assert_eq!(found[0].name, "getDocuments");
        assert_eq!(found[0].arity(), Some(2));
        assert_eq!(found[0].return_type.as_deref(), Some("Promise<Doc[]>"));
        let params = found[0].params.as_ref().expect("params");
        assert_eq!(params[0].ty.as_deref(), Some("string"));
        assert!(params[1].optional);
        assert_eq!(found[1].name, "toLabel");
        assert_eq!(found[1].return_type.as_deref(), Some("string"));
        assert_eq!(found[2].name, "GET");
        assert_eq!(found[2].params, None);
        assert_eq!(found[3].kind, SymbolKind::Interface);
    }

    #[test]
    fn callback_params_split_correctly() {
        let params = parse_params("cb: (x: number) => void, opts?: { a: string, b: number }");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].ty.as_deref(), Some("(x:number)=>void"));
        assert_eq!(params[1].name, "opts");
        assert!(params[1].optional);
    }

    #[test]
    fn lists_type_declarations() {
        let decls = type_declarations("type lowerCase = string;\nexport interface Good {}\n");
        assert_eq!(decls, vec![(1, "type", "lowerCase".to_string()), (2, "interface", "Good".to_string())]);
    }
}
