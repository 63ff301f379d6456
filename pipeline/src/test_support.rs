//! Test-only fakes for the pipeline's seams and fixture helpers.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};

use crate::core::engine::{CommandOutcome, ProducedFile};
use crate::core::types::{Phase, SessionRef};
use crate::io::agent::{AgentEvent, AgentRequest, AgentResult, AgentRuntime, AgentTranscript};
use crate::io::changes::ChangeSource;
use crate::io::commands::{CommandRunner, CommandSpec};

/// One scripted agent invocation.
#[derive(Debug, Clone, Default)]
pub struct AgentStep {
    pub transcript: AgentTranscript,
    /// Files written into the request's workdir before returning.
    pub writes: Vec<(String, String)>,
}

impl AgentStep {
    /// A narration event followed by a successful result.
    pub fn finished(text: &str, session: Option<&str>) -> Self {
        AgentStep {
            transcript: AgentTranscript {
                events: vec![
                    AgentEvent::Text("working".to_string()),
                    AgentEvent::ToolInvocation("Write".to_string()),
                    AgentEvent::Result(AgentResult {
                        text: text.to_string(),
                        session: session.map(|id| SessionRef(id.to_string())),
                        exhausted: false,
                        is_error: false,
                    }),
                ],
            },
            writes: Vec::new(),
        }
    }

    /// The runtime ran out of turns.
    pub fn exhausted() -> Self {
        AgentStep {
            transcript: AgentTranscript {
                events: vec![AgentEvent::Result(AgentResult {
                    text: String::new(),
                    session: None,
                    exhausted: true,
                    is_error: true,
                })],
            },
            writes: Vec::new(),
        }
    }

    pub fn writing(mut self, path: &str, contents: &str) -> Self {
        self.writes.push((path.to_string(), contents.to_string()));
        self
    }
}

/// Agent runtime that replays scripted steps per phase. The last step of a
/// phase repeats once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    implement: Mutex<Vec<AgentStep>>,
    validate: Mutex<Vec<AgentStep>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(implement: Vec<AgentStep>, validate: Vec<AgentStep>) -> Self {
        ScriptedAgent {
            implement: Mutex::new(implement),
            validate: Mutex::new(validate),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn requests_for(&self, phase: Phase) -> Vec<AgentRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.phase == phase)
            .collect()
    }

    fn next_step(&self, phase: Phase) -> Option<AgentStep> {
        let queue = match phase {
            Phase::Implement => &self.implement,
            Phase::Validate => &self.validate,
        };
        let mut queue = queue.lock().expect("script lock");
        match queue.len() {
            0 => None,
            1 => queue.first().cloned(),
            _ => Some(queue.remove(0)),
        }
    }
}

impl AgentRuntime for ScriptedAgent {
    fn invoke(
        &self,
        request: &AgentRequest,
        on_event: &(dyn Fn(&AgentEvent) + Sync),
    ) -> Result<AgentTranscript> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let step = self
            .next_step(request.phase)
            .ok_or_else(|| anyhow!("no scripted step for the {} phase", request.phase))?;
        for (path, contents) in &step.writes {
            write_file(&request.workdir, path, contents)?;
        }
        for event in &step.transcript.events {
            on_event(event);
        }
        Ok(step.transcript)
    }
}

/// Command runner with scripted exit codes. Unlisted commands exit 0.
#[derive(Debug, Default)]
pub struct ScriptedCommands {
    exit_codes: HashMap<String, i32>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedCommands {
    pub fn passing() -> Self {
        ScriptedCommands::default()
    }

    pub fn with_exit(mut self, command: &str, exit_code: i32) -> Self {
        self.exit_codes.insert(command.to_string(), exit_code);
        self
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl CommandRunner for ScriptedCommands {
    fn run(&self, spec: CommandSpec<'_>, _workdir: &Path) -> CommandOutcome {
        let command = spec.display();
        self.seen.lock().expect("seen lock").push(command.clone());
        let exit_code = self.exit_codes.get(&command).copied().unwrap_or(0);
        CommandOutcome {
            output: if exit_code == 0 {
                String::new()
            } else {
                format!("{command}: scripted failure")
            },
            command,
            exit_code: Some(exit_code),
            timed_out: false,
            error: None,
        }
    }
}

/// Change source returning scripted file sets, one per call. The last set
/// repeats once the script runs out. Report commits are only recorded.
#[derive(Debug, Default)]
pub struct FixedChanges {
    sets: Mutex<Vec<Vec<ProducedFile>>>,
    calls: Mutex<usize>,
    commits: Mutex<Vec<(String, String)>>,
}

impl FixedChanges {
    pub fn new(sets: Vec<Vec<ProducedFile>>) -> Self {
        FixedChanges {
            sets: Mutex::new(sets),
            calls: Mutex::new(0),
            commits: Mutex::new(Vec::new()),
        }
    }

    /// The same files for every attempt.
    pub fn always(files: Vec<ProducedFile>) -> Self {
        FixedChanges::new(vec![files])
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().expect("calls lock")
    }

    /// `(relpath, message)` of every report commit, in order.
    pub fn commits(&self) -> Vec<(String, String)> {
        self.commits.lock().expect("commits lock").clone()
    }
}

impl ChangeSource for FixedChanges {
    fn produced_files(&self) -> Result<Vec<ProducedFile>> {
        *self.calls.lock().expect("calls lock") += 1;
        let mut sets = self.sets.lock().expect("sets lock");
        match sets.len() {
            0 => Ok(Vec::new()),
            1 => Ok(sets[0].clone()),
            _ => Ok(sets.remove(0)),
        }
    }

    fn commit_report(&self, relpath: &str, message: &str) -> Result<()> {
        self.commits
            .lock()
            .expect("commits lock")
            .push((relpath.to_string(), message.to_string()));
        Ok(())
    }
}

/// Contract Markdown declaring `produces` in `layer`.
pub fn contract_text(id: &str, layer: &str, produces: &[&str]) -> String {
    let mut text = format!("# {id}: Fixture task\n\n## Layer\n{layer}\n\n## Produces\n");
    for path in produces {
        text.push_str(&format!("- `{path}`\n"));
    }
    text
}

/// Write a contract under `<root>/tasks/` and return its path.
pub fn write_contract(root: &Path, file_name: &str, text: &str) -> PathBuf {
    let path = root.join("tasks").join(file_name);
    fs::create_dir_all(path.parent().expect("tasks dir")).expect("create tasks dir");
    fs::write(&path, text).expect("write contract");
    path
}

fn write_file(root: &Path, relpath: &str, contents: &str) -> Result<()> {
    let path = root.join(relpath);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
}

/// Git repository in a temporary directory with one initial commit.
pub struct TestRepo {
    dir: tempfile::TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = TestRepo { dir };
        repo.git(&["init", "-q"]);
        repo.git(&["config", "user.email", "test@example.com"]);
        repo.git(&["config", "user.name", "Test"]);
        repo.write("README.md", "fixture\n");
        repo.commit("initial");
        repo
    }

    /// Canonical root, so it compares equal to canonicalized contract paths.
    pub fn root(&self) -> PathBuf {
        self.dir.path().canonicalize().expect("canonical root")
    }

    pub fn write(&self, relpath: &str, contents: &str) {
        write_file(self.dir.path(), relpath, contents).expect("write fixture file");
    }

    pub fn commit(&self, message: &str) {
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", message]);
    }

    pub fn git(&self, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(self.dir.path())
            .status()
            .expect("spawn git");
        assert!(status.success(), "git {args:?} failed");
    }

    pub fn head_subject(&self) -> String {
        let output = Command::new("git")
            .args(["log", "-1", "--format=%s"])
            .current_dir(self.dir.path())
            .output()
            .expect("spawn git");
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}
