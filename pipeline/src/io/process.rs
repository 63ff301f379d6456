//! Child processes with a deadline, bounded capture, and optional stdout teeing.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Deadline and per-stream capture bound for one child process.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub timeout: Duration,
    pub output_bytes: usize,
}

/// One captured stream. Bytes past the limit are drained and only counted.
#[derive(Debug, Default)]
pub struct Capture {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Capture {
    fn keep(&mut self, chunk: &[u8], limit: usize) {
        let room = limit.saturating_sub(self.bytes.len());
        let take = chunk.len().min(room);
        self.bytes.extend_from_slice(&chunk[..take]);
        self.dropped += chunk.len() - take;
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub timed_out: bool,
    pub stdout: Capture,
    pub stderr: Capture,
}

impl ProcessOutput {
    /// Stdout then stderr as lossy UTF-8, each followed by a note when
    /// bytes were dropped.
    pub fn combined_text(&self, label: &str) -> String {
        let mut text = self.stdout.text();
        push_dropped_note(&mut text, label, "stdout", self.stdout.dropped);
        if !self.stderr.bytes.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr.text());
        }
        push_dropped_note(&mut text, label, "stderr", self.stderr.dropped);
        text
    }
}

fn push_dropped_note(text: &mut String, label: &str, stream: &str, dropped: usize) {
    if dropped > 0 {
        text.push_str(&format!("\n[{label} {stream} truncated {dropped} bytes]\n"));
    }
}

/// Where stdout lines go while the child is still running.
#[derive(Default)]
pub struct LineTee<'a> {
    /// Raw lines are appended here, flushed per line.
    pub file: Option<&'a Path>,
    /// Called with each line, line ending stripped.
    pub on_line: Option<&'a (dyn Fn(&str) + Sync)>,
}

/// Run `cmd` to completion or until the deadline, capturing both streams.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), output_bytes = limits.output_bytes))]
pub fn run_bounded(cmd: Command, stdin: Option<&[u8]>, limits: Limits) -> Result<ProcessOutput> {
    run_teed(cmd, stdin, limits, LineTee::default())
}

/// Like [`run_bounded`], but stdout is also read line by line into `tee`.
/// The returned stdout is still bounded by `limits`.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), output_bytes = limits.output_bytes, tee_file = tee.file.is_some()))]
pub fn run_teed(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: Limits,
    tee: LineTee<'_>,
) -> Result<ProcessOutput> {
    let tee_file = tee.file.map(open_tee_file).transpose()?;

    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, "failed to spawn command");
        anyhow!(err).context("spawn command")
    })?;

    if let Some(input) = stdin {
        // The handle drops at the end of this block, closing the pipe.
        let mut pipe = child.stdin.take().ok_or_else(|| anyhow!("stdin not piped"))?;
        pipe.write_all(input).context("write stdin")?;
    }
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr not piped"))?;

    let (status, timed_out, stdout, stderr) = thread::scope(|scope| -> Result<_> {
        let out = scope.spawn(|| {
            capture_lines(stdout, limits.output_bytes, tee_file.as_ref(), tee.on_line)
        });
        let err = scope.spawn(|| capture_chunks(stderr, limits.output_bytes));
        let (status, timed_out) = wait_with_deadline(&mut child, limits.timeout)?;
        let stdout = out
            .join()
            .map_err(|_| anyhow!("stdout reader panicked"))??;
        let stderr = err
            .join()
            .map_err(|_| anyhow!("stderr reader panicked"))??;
        Ok((status, timed_out, stdout, stderr))
    })?;

    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "output over limit"
        );
    }
    debug!(exit_code = ?status.code(), timed_out, "child exited");
    Ok(ProcessOutput {
        status,
        timed_out,
        stdout,
        stderr,
    })
}

fn open_tee_file(path: &Path) -> Result<Mutex<BufWriter<File>>> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    Ok(Mutex::new(BufWriter::new(file)))
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for child")? {
        return Ok((status, false));
    }
    warn!(timeout_secs = timeout.as_secs(), "deadline passed, killing child");
    child.kill().context("kill child")?;
    let status = child.wait().context("reap killed child")?;
    Ok((status, true))
}

fn capture_lines<R: Read>(
    reader: R,
    limit: usize,
    file: Option<&Mutex<BufWriter<File>>>,
    on_line: Option<&(dyn Fn(&str) + Sync)>,
) -> Result<Capture> {
    let mut reader = BufReader::new(reader);
    let mut capture = Capture::default();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).context("read stdout line")? == 0 {
            return Ok(capture);
        }
        if let Some(writer) = file
            && let Ok(mut writer) = writer.lock()
            && let Err(err) = writer.write_all(&line).and_then(|()| writer.flush())
        {
            warn!(err = %err, "tee file write failed");
        }
        if let Some(on_line) = on_line {
            on_line(String::from_utf8_lossy(&line).trim_end_matches(['\r', '\n']));
        }
        capture.keep(&line, limit);
    }
}

fn capture_chunks<R: Read>(mut reader: R, limit: usize) -> Result<Capture> {
    let mut capture = Capture::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read stderr")?;
        if n == 0 {
            return Ok(capture);
        }
        capture.keep(&chunk[..n], limit);
    }
}
