//! Layer tables: path classification, import deny rules, and line ceilings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Layer declared by a task contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractLayer {
    Presentation,
    Api,
    Library,
    FunctionStep,
    Database,
    Migration,
}

impl ContractLayer {
    /// Parse a free-text layer label (`Layer 2`, `API`, `Edge Function`, ...).
    pub fn parse(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        if lower.is_empty() {
            return None;
        }
        // Most specific words first: "database migration" is a migration.
        let table: [(&[&str], ContractLayer); 6] = [
            (&["migration"], ContractLayer::Migration),
            (&["database", "sql", "layer 5"], ContractLayer::Database),
            (
                &["function-step", "function step", "edge function", "supabase/functions", "layer 4"],
                ContractLayer::FunctionStep,
            ),
            (&["api", "route", "middleware", "layer 2"], ContractLayer::Api),
            (&["library", "lib/", "shared", "layer 3"], ContractLayer::Library),
            (
                &["presentation", "ui", "component", "page", "layer 1"],
                ContractLayer::Presentation,
            ),
        ];
        table
            .iter()
            .find(|(needles, _)| needles.iter().any(|needle| contains_word(&lower, needle)))
            .map(|(_, layer)| *layer)
    }

    /// Check 10 only runs for database and migration contracts.
    pub fn is_data_layer(self) -> bool {
        matches!(self, ContractLayer::Database | ContractLayer::Migration)
    }
}

impl fmt::Display for ContractLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ContractLayer::Presentation => "Presentation",
            ContractLayer::Api => "API",
            ContractLayer::Library => "Library",
            ContractLayer::FunctionStep => "Function Step",
            ContractLayer::Database => "Database",
            ContractLayer::Migration => "Migration",
        };
        f.write_str(label)
    }
}

/// Layer owning a file, resolved from its repository-relative path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileLayer {
    /// Layer 1: `app/**` pages and `components/**`.
    Presentation,
    /// Layer 2: `app/api/**` and `middleware.ts`.
    Api,
    /// Layer 3: `lib/**`.
    Library,
    /// Layer 4: `supabase/functions/**`.
    FunctionStep,
    /// `supabase/migrations/**` and loose `.sql` files.
    Database,
    Other,
}

impl FileLayer {
    pub fn of(path: &str) -> Self {
        let path = normalize(path);
        if path.starts_with("app/api/") || path == "middleware.ts" || path == "src/middleware.ts"
        {
            return FileLayer::Api;
        }
        if path.starts_with("supabase/functions/") {
            return FileLayer::FunctionStep;
        }
        if path.starts_with("supabase/migrations/") || path.ends_with(".sql") {
            return FileLayer::Database;
        }
        if path.starts_with("app/") || path.starts_with("components/") {
            return FileLayer::Presentation;
        }
        if path.starts_with("lib/") {
            return FileLayer::Library;
        }
        FileLayer::Other
    }

    pub fn label(self) -> &'static str {
        match self {
            FileLayer::Presentation => "Layer 1",
            FileLayer::Api => "Layer 2",
            FileLayer::Library => "Layer 3",
            FileLayer::FunctionStep => "Layer 4",
            FileLayer::Database => "Database",
            FileLayer::Other => "unlayered",
        }
    }

    /// Layers this layer must never import from.
    pub fn denied_imports(self) -> &'static [FileLayer] {
        match self {
            FileLayer::Presentation => &[FileLayer::FunctionStep],
            FileLayer::Api => &[FileLayer::Presentation, FileLayer::FunctionStep],
            FileLayer::Library => &[FileLayer::FunctionStep],
            FileLayer::FunctionStep | FileLayer::Database | FileLayer::Other => &[],
        }
    }

    pub fn may_import(self, target: FileLayer) -> bool {
        !self.denied_imports().contains(&target)
    }

    pub fn line_limit(self) -> Option<LineLimit> {
        match self {
            FileLayer::Presentation => Some(LineLimit::PerFunction(40)),
            FileLayer::Api => Some(LineLimit::PerFunction(30)),
            FileLayer::Library => Some(LineLimit::PerFunction(40)),
            FileLayer::FunctionStep => Some(LineLimit::PerFile(50)),
            FileLayer::Database | FileLayer::Other => None,
        }
    }
}

/// Line ceiling tier for a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLimit {
    PerFunction(usize),
    /// Layer 4 step files are limited as a whole.
    PerFile(usize),
}

/// Strip `./` and leading `/`, and use forward slashes.
pub fn normalize(path: &str) -> String {
    let replaced = path.trim().replace('\\', "/");
    let mut rest = replaced.as_str();
    loop {
        if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
        } else {
            break;
        }
    }
    rest.to_string()
}

/// True if `path` equals `entry` or lives under it when `entry` names a directory.
pub fn path_matches(path: &str, entry: &str) -> bool {
    let path = normalize(path);
    let entry = normalize(entry);
    if entry.is_empty() {
        return false;
    }
    if path == entry {
        return true;
    }
    if entry.ends_with('/') {
        return path.starts_with(&entry);
    }
    path.starts_with(&format!("{entry}/")) || strip_extension(&path) == strip_extension(&entry)
}

/// Drop a trailing source extension so `@/lib/x` matches `lib/x.ts`.
pub fn strip_extension(path: &str) -> &str {
    for ext in [".tsx", ".ts", ".jsx", ".js", ".mjs", ".cjs", ".sql"] {
        if let Some(stripped) = path.strip_suffix(ext) {
            return stripped.strip_suffix("/index").unwrap_or(stripped);
        }
    }
    path.strip_suffix("/index").unwrap_or(path)
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.contains(' ') || needle.contains('/') || needle.contains('-') {
        return haystack.contains(needle);
    }
    haystack
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| word == needle || (needle.len() > 3 && word.starts_with(needle)))
}
