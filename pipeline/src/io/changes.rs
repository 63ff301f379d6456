//! The repository an attempt works in: the produced-file set the gate judges,
//! and the history gate reports are committed to.

use std::fs;
use std::path::Path;

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::engine::{FileContents, ProducedFile};
use crate::core::layers::normalize;
use crate::io::git::Git;

/// Source of the files an implementation attempt produced.
pub trait ChangeSource {
    /// Produced files in path order.
    fn produced_files(&self) -> Result<Vec<ProducedFile>>;

    /// Commit the gate report at `relpath` on its own with `message`.
    fn commit_report(&self, relpath: &str, message: &str) -> Result<()>;
}

/// Changes in a git worktree relative to a base revision.
#[derive(Debug, Clone)]
pub struct GitChangeSource {
    pub git: Git,
    pub base: String,
    /// Paths (or prefixes ending in `/`) never treated as produced.
    pub exclude: Vec<String>,
}

impl GitChangeSource {
    fn excluded(&self, path: &str) -> bool {
        self.exclude.iter().any(|entry| {
            if entry.ends_with('/') {
                path.starts_with(entry.as_str())
            } else {
                path == entry
            }
        })
    }
}

impl ChangeSource for GitChangeSource {
    fn produced_files(&self) -> Result<Vec<ProducedFile>> {
        let mut files = Vec::new();
        for change in self.git.changed_since(&self.base)? {
            let path = normalize(&change.path);
            if self.excluded(&path) {
                debug!(path = %path, "skipping excluded path");
                continue;
            }
            let contents = if change.deleted {
                FileContents::Deleted
            } else {
                read_contents(&self.git.workdir().join(&path))
            };
            files.push(ProducedFile { path, contents });
        }
        Ok(files)
    }

    fn commit_report(&self, relpath: &str, message: &str) -> Result<()> {
        if !self.git.commit_only(relpath, message)? {
            warn!(path = %relpath, "gate report unchanged; nothing committed");
        }
        Ok(())
    }
}

fn read_contents(path: &Path) -> FileContents {
    match fs::read(path) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => FileContents::Text(text),
            Err(_) => FileContents::Unreadable("not valid UTF-8".to_string()),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => FileContents::Deleted,
        Err(err) => {
            warn!(path = %path.display(), err = %err, "failed to read produced file");
            FileContents::Unreadable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_text_binary_and_missing_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let text = temp.path().join("a.ts");
        let binary = temp.path().join("logo.png");
        fs::write(&text, "export const a = 1;\n").expect("write");
        fs::write(&binary, [0xff, 0xfe, 0x00]).expect("write");

        assert_eq!(
            read_contents(&text),
            FileContents::Text("export const a = 1;\n".to_string())
        );
        assert!(matches!(read_contents(&binary), FileContents::Unreadable(_)));
        assert_eq!(read_contents(&temp.path().join("none.ts")), FileContents::Deleted);
    }

    #[test]
    fn exclusions_match_prefixes_and_exact_paths() {
        let source = GitChangeSource {
            git: Git::new("."),
            base: "HEAD".to_string(),
            exclude: vec![".pipeline/".to_string(), "tasks/S1-001.md".to_string()],
        };
        assert!(source.excluded(".pipeline/runs/x/meta.json"));
        assert!(source.excluded("tasks/S1-001.md"));
        assert!(!source.excluded("tasks/S1-002.md"));
        assert!(!source.excluded("lib/a.ts"));
    }
}
