//! External commands run on the gate's behalf (compile, advisory scan, verification).
//!
//! The [`CommandRunner`] trait keeps the gate independent of real processes;
//! tests script outcomes instead of spawning `tsc`.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::engine::CommandOutcome;
use crate::io::process::{Limits, run_bounded};

/// How a command is given.
#[derive(Debug, Clone, Copy)]
pub enum CommandSpec<'a> {
    /// Program plus arguments, no shell.
    Argv(&'a [String]),
    /// A shell line, run through `sh -c` verbatim.
    Shell(&'a str),
}

impl CommandSpec<'_> {
    pub fn display(&self) -> String {
        match self {
            CommandSpec::Argv(argv) => argv.join(" "),
            CommandSpec::Shell(line) => line.to_string(),
        }
    }
}

pub trait CommandRunner {
    /// Run to completion. Spawn failures are reported in the outcome, never as `Err`.
    fn run(&self, spec: CommandSpec<'_>, workdir: &Path) -> CommandOutcome;
}

/// Runs commands as child processes with a timeout and bounded output.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandRunner for ProcessRunner {
    #[instrument(skip_all, fields(command = %spec.display()))]
    fn run(&self, spec: CommandSpec<'_>, workdir: &Path) -> CommandOutcome {
        let command = spec.display();
        let mut cmd = match spec {
            CommandSpec::Argv([program, args @ ..]) => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            CommandSpec::Argv([]) => {
                return CommandOutcome {
                    command,
                    exit_code: None,
                    output: String::new(),
                    timed_out: false,
                    error: Some("empty command".to_string()),
                };
            }
            CommandSpec::Shell(line) => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                cmd
            }
        };
        cmd.current_dir(workdir);

        let limits = Limits {
            timeout: self.timeout,
            output_bytes: self.output_limit_bytes,
        };
        match run_bounded(cmd, None, limits) {
            Ok(output) => {
                debug!(exit_code = ?output.status.code(), timed_out = output.timed_out, "gate command finished");
                CommandOutcome {
                    command,
                    exit_code: output.status.code(),
                    output: output.combined_text("command"),
                    timed_out: output.timed_out,
                    error: None,
                }
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "gate command could not run");
                CommandOutcome {
                    command,
                    exit_code: None,
                    output: String::new(),
                    timed_out: false,
                    error: Some(format!("{err:#}")),
                }
            }
        }
    }
}
