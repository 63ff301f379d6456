//! Git adapter: worktree cleanliness, change enumeration, report commits.
//!
//! The pipeline records a base revision before the first implementation
//! attempt and asks git what changed since. The only commits it makes hold a
//! gate report and nothing else.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Uncommitted path reported by `git status --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyPath {
    /// Porcelain XY code; `??` for untracked files.
    pub code: String,
    pub path: String,
}

/// One path changed relative to a base revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedPath {
    pub path: String,
    pub deleted: bool,
}

/// Read-only git queries rooted at a repository.
#[derive(Debug, Clone)]
pub struct Git {
    root: PathBuf,
}

impl Git {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Git { root: root.into() }
    }

    pub fn workdir(&self) -> &Path {
        &self.root
    }

    /// Full commit SHA for `rev`.
    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        let spec = format!("{rev}^{{commit}}");
        Ok(self.stdout(&["rev-parse", "--verify", &spec])?.trim().to_string())
    }

    pub fn head_sha(&self) -> Result<String> {
        self.rev_parse("HEAD")
    }

    /// Staged, unstaged and untracked paths.
    pub fn dirty_paths(&self) -> Result<Vec<DirtyPath>> {
        self.stdout(&["status", "--porcelain=v1", "-uall"])?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_porcelain)
            .collect()
    }

    /// Fail listing every dirty path outside `allowed_prefixes`.
    #[instrument(skip_all, fields(allowed = allowed_prefixes.len()))]
    pub fn require_clean(&self, allowed_prefixes: &[&str]) -> Result<()> {
        let blocking: Vec<DirtyPath> = self
            .dirty_paths()?
            .into_iter()
            .filter(|dirty| !allowed_prefixes.iter().any(|p| dirty.path.starts_with(p)))
            .collect();
        if blocking.is_empty() {
            return Ok(());
        }
        warn!(blocking = blocking.len(), "refusing to start on a dirty worktree");
        let listing: Vec<String> = blocking
            .iter()
            .map(|dirty| format!("{} {}", dirty.code, dirty.path))
            .collect();
        Err(anyhow!(
            "working tree not clean (commit or stash these first):\n{}",
            listing.join("\n")
        ))
    }

    /// Tracked and untracked paths changed since `base`, sorted and unique.
    ///
    /// Renames are reported as a deletion of the old path plus the new path.
    #[instrument(skip_all, fields(base = %base))]
    pub fn changed_since(&self, base: &str) -> Result<Vec<ChangedPath>> {
        let mut changes = self
            .stdout(&["diff", "--name-status", "--no-renames", base])?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_name_status)
            .collect::<Result<Vec<_>>>()?;
        let untracked = self.stdout(&["ls-files", "--others", "--exclude-standard"])?;
        changes.extend(
            untracked
                .lines()
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(|path| ChangedPath {
                    path: path.to_string(),
                    deleted: false,
                }),
        );
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes.dedup_by(|a, b| a.path == b.path);
        debug!(count = changes.len(), "changed paths");
        Ok(changes)
    }

    /// Commit `path` alone, leaving every other change (staged or not) out of
    /// the commit. Returns `false` when `path` has nothing to commit.
    #[instrument(skip_all, fields(path = %path))]
    pub fn commit_only(&self, path: &str, message: &str) -> Result<bool> {
        self.stdout(&["add", "--", path])?;
        if self.stdout(&["status", "--porcelain=v1", "--", path])?.trim().is_empty() {
            debug!("nothing to commit");
            return Ok(false);
        }
        self.stdout(&["commit", "--quiet", "--no-verify", "-m", message, "--only", "--", path])?;
        Ok(true)
    }

    /// Stdout of a successful git invocation.
    fn stdout(&self, args: &[&str]) -> Result<String> {
        let output: Output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} exited with {:?}: {}",
                args.join(" "),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn parse_porcelain(line: &str) -> Result<DirtyPath> {
    let (code, rest) = match (line.get(..2), line.get(3..)) {
        (Some(code), Some(rest)) if !rest.trim().is_empty() => (code, rest.trim()),
        _ => return Err(anyhow!("unexpected porcelain line: '{line}'")),
    };
    // Renames list `old -> new`; the new path is the one on disk.
    let path = rest.rsplit_once(" -> ").map_or(rest, |(_, new)| new.trim());
    Ok(DirtyPath {
        code: code.to_string(),
        path: unquote(path),
    })
}

fn parse_name_status(line: &str) -> Result<ChangedPath> {
    let (code, path) = line
        .split_once('\t')
        .ok_or_else(|| anyhow!("unexpected name-status line: '{line}'"))?;
    Ok(ChangedPath {
        path: unquote(path.trim()),
        deleted: code.starts_with('D'),
    })
}

/// Strip git's C-style quoting from paths with unusual characters.
fn unquote(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .map(|inner| inner.replace("\\\"", "\"").replace("\\\\", "\\"))
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn porcelain_lines_keep_code_and_on_disk_path() {
        assert_eq!(
            parse_porcelain("?? notes/todo.md").expect("parse"),
            DirtyPath {
                code: "??".to_string(),
                path: "notes/todo.md".to_string()
            }
        );
        let modified = parse_porcelain(" M lib/a.ts").expect("parse");
        assert_eq!((modified.code.as_str(), modified.path.as_str()), (" M", "lib/a.ts"));
        let renamed = parse_porcelain("R  lib/old.ts -> lib/new.ts").expect("parse");
        assert_eq!(renamed.path, "lib/new.ts");
        assert!(parse_porcelain("M").is_err());
    }

    #[test]
    fn parses_name_status_deletions() {
        let deleted = parse_name_status("D\tlib/old.ts").expect("parse");
        assert!(deleted.deleted);
        assert_eq!(deleted.path, "lib/old.ts");
        let modified = parse_name_status("M\t\"app/we\\\"ird.ts\"").expect("parse");
        assert!(!modified.deleted);
        assert_eq!(modified.path, "app/we\"ird.ts");
    }

    #[test]
    fn changed_since_lists_tracked_and_untracked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let git = |args: &[&str]| {
            let status = Command::new("git")
                .args(args)
                .current_dir(root)
                .status()
                .expect("git");
            assert!(status.success(), "git {args:?}");
        };
        git(&["init", "-q"]);
        git(&["config", "user.email", "test@example.com"]);
        git(&["config", "user.name", "Test"]);
        std::fs::write(root.join("keep.ts"), "a").expect("write");
        std::fs::write(root.join("gone.ts"), "b").expect("write");
        git(&["add", "-A"]);
        git(&["commit", "-q", "-m", "base"]);

        let repo = Git::new(root);
        let base = repo.head_sha().expect("head");
        repo.require_clean(&[]).expect("clean");

        std::fs::write(root.join("keep.ts"), "changed").expect("write");
        std::fs::remove_file(root.join("gone.ts")).expect("remove");
        std::fs::write(root.join("new.ts"), "c").expect("write");

        let changes = repo.changed_since(&base).expect("changes");
        assert_eq!(
            changes,
            vec![
                ChangedPath { path: "gone.ts".to_string(), deleted: true },
                ChangedPath { path: "keep.ts".to_string(), deleted: false },
                ChangedPath { path: "new.ts".to_string(), deleted: false },
            ]
        );
        let err = repo.require_clean(&[]).expect_err("dirty");
        assert!(err.to_string().contains("?? new.ts"), "{err}");
        repo.require_clean(&["gone.ts", "keep.ts", "new.ts"])
            .expect("allowed");
    }

    #[test]
    fn commit_only_leaves_other_changes_uncommitted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let git = |args: &[&str]| {
            let output = Command::new("git")
                .args(args)
                .current_dir(root)
                .output()
                .expect("git");
            assert!(output.status.success(), "git {args:?}");
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        };
        git(&["init", "-q"]);
        git(&["config", "user.email", "test@example.com"]);
        git(&["config", "user.name", "Test"]);
        std::fs::write(root.join("README.md"), "fixture").expect("write");
        git(&["add", "-A"]);
        git(&["commit", "-q", "-m", "base"]);

        std::fs::create_dir_all(root.join("tasks/sprint-s1/gate-reports")).expect("mkdir");
        std::fs::write(root.join("tasks/sprint-s1/gate-reports/S1-001-gate.md"), "# report").expect("write");
        std::fs::write(root.join("lib.ts"), "export {};").expect("write");
        git(&["add", "lib.ts"]);

        let repo = Git::new(root);
        let committed = repo
            .commit_only("tasks/sprint-s1/gate-reports/S1-001-gate.md", "[S1-001] Gate: FAIL")
            .expect("commit");

        assert!(committed);
        assert_eq!(git(&["log", "-1", "--format=%s"]), "[S1-001] Gate: FAIL");
        assert_eq!(
            git(&["show", "--name-only", "--format=", "HEAD"]),
            "tasks/sprint-s1/gate-reports/S1-001-gate.md"
        );
        assert_eq!(git(&["diff", "--cached", "--name-only"]), "lib.ts");
        assert!(
            !repo
                .commit_only("tasks/sprint-s1/gate-reports/S1-001-gate.md", "again")
                .expect("no-op")
        );
    }
}
