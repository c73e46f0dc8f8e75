//! Agent subprocess driving: streamed output, dual timeouts, bounded kill.
//!
//! One reader thread per stream feeds a bounded channel; the driver loop
//! owns all supervision decisions (timeouts, cancellation, stop
//! directives) so they act even while the agent is silent. Partial output
//! survives every termination path.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{RecvTimeoutError, SyncSender, sync_channel};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;

/// Which stream a transcript line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One captured output line. Lines from the same stream keep their
/// emission order; the two streams interleave by arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub source: StreamSource,
    pub text: String,
}

/// Which budget expired when a run was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutKind {
    /// Wall-clock budget for the whole run.
    Hard,
    /// No output for the configured inactivity window.
    Idle,
}

/// Invocation boundary for one agent run; entirely caller-supplied.
#[derive(Debug, Clone)]
pub struct DriverRequest {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub env: Vec<(String, String)>,
    pub hard_timeout: Duration,
    pub idle_timeout: Duration,
    /// Truncate the stored transcript beyond this many bytes.
    pub transcript_limit_bytes: usize,
}

/// What the supervisor wants after seeing a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Continue,
    /// Terminate the agent now, recording why.
    Stop { reason: String },
}

/// Final accounting for one driven run.
#[derive(Debug)]
pub struct ProcessResult {
    /// Every captured line, including output from runs that were cut
    /// short. Bounded by the request's transcript limit.
    pub transcript: Vec<TranscriptLine>,
    /// Bytes of output dropped once the transcript limit was reached.
    pub transcript_truncated: usize,
    /// Exit code, when the process exited on its own.
    pub exit_code: Option<i32>,
    /// Terminating signal, when the process died to one (including our
    /// own kill).
    pub signal: Option<i32>,
    /// Set when a budget expiry ended the run.
    pub timeout: Option<TimeoutKind>,
    /// Reason the supervisor stopped the run early, if it did.
    pub stopped: Option<String>,
    /// True when an external cancellation ended the run.
    pub cancelled: bool,
    pub duration: Duration,
}

/// Write access to the agent's stdin for per-line replies.
pub trait ReplySink {
    fn reply(&mut self, line: &str) -> Result<()>;
}

/// Abstraction over agent process backends.
///
/// `on_line` sees every line as it arrives, may answer through the sink,
/// and steers the run through the returned [`Directive`]. Tests script
/// this seam without spawning anything.
pub trait Driver {
    fn drive(
        &self,
        request: &DriverRequest,
        cancel: Option<&CancelToken>,
        on_line: &mut dyn FnMut(&TranscriptLine, &mut dyn ReplySink) -> Result<Directive>,
    ) -> Result<ProcessResult>;
}

/// Driver that spawns the real subprocess.
pub struct SubprocessDriver;

impl Driver for SubprocessDriver {
    #[instrument(skip_all, fields(
        program = %request.program,
        hard_secs = request.hard_timeout.as_secs(),
        idle_secs = request.idle_timeout.as_secs(),
    ))]
    fn drive(
        &self,
        request: &DriverRequest,
        cancel: Option<&CancelToken>,
        on_line: &mut dyn FnMut(&TranscriptLine, &mut dyn ReplySink) -> Result<Directive>,
    ) -> Result<ProcessResult> {
        run_streamed(request, cancel, on_line)
    }
}

/// Run an agent to completion with no supervision beyond the timeouts.
///
/// Lines still stream through `sink` as they arrive.
pub fn run_agent(
    request: &DriverRequest,
    mut sink: impl FnMut(&TranscriptLine),
) -> Result<ProcessResult> {
    run_streamed(request, None, &mut |line, _reply| {
        sink(line);
        Ok(Directive::Continue)
    })
}

/// Backpressure bound: a flooding agent blocks on its pipe instead of
/// growing our memory without limit.
const CHANNEL_BOUND: usize = 256;
/// How long a terminated agent gets to exit before the forced kill.
const KILL_GRACE: Duration = Duration::from_secs(2);
/// Poll interval for cancellation while no output arrives.
const CANCEL_POLL: Duration = Duration::from_millis(100);
/// How long to wait for straggler lines after a forced termination.
const DRAIN_WINDOW: Duration = Duration::from_secs(1);

fn run_streamed(
    request: &DriverRequest,
    cancel: Option<&CancelToken>,
    on_line: &mut dyn FnMut(&TranscriptLine, &mut dyn ReplySink) -> Result<Directive>,
) -> Result<ProcessResult> {
    let start = Instant::now();

    let mut command = Command::new(&request.program);
    command
        .args(&request.args)
        .current_dir(&request.workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in &request.env {
        command.env(key, value);
    }

    debug!("spawning agent process");
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!(err = %e, program = %request.program, "failed to spawn agent");
            return Err(e).with_context(|| format!("spawn agent '{}'", request.program));
        }
    };
    let pid = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let mut sink = StdinSink {
        stdin: child.stdin.take(),
    };

    let (tx, rx) = sync_channel::<TranscriptLine>(CHANNEL_BOUND);
    let tx_err = tx.clone();
    let stdout_handle = std::thread::spawn(move || read_lines(stdout, StreamSource::Stdout, tx));
    let stderr_handle = std::thread::spawn(move || read_lines(stderr, StreamSource::Stderr, tx_err));

    let hard_deadline = start + request.hard_timeout;
    let limit = request.transcript_limit_bytes;
    let mut last_activity = Instant::now();
    let mut transcript: Vec<TranscriptLine> = Vec::new();
    let mut transcript_bytes = 0usize;
    let mut transcript_truncated = 0usize;
    let mut timeout: Option<TimeoutKind> = None;
    let mut stopped: Option<String> = None;
    let mut cancelled = false;
    let mut streams_open = true;

    // Lines past the byte budget are counted, not stored, so the kept
    // transcript stays a prefix of the stream.
    let mut store_line = |line: TranscriptLine| {
        // A line costs its text plus the stripped newline.
        let cost = line.text.len() + 1;
        if transcript_truncated == 0 && transcript_bytes + cost <= limit {
            transcript_bytes += cost;
            transcript.push(line);
        } else {
            transcript_truncated += cost;
        }
    };

    while streams_open {
        if let Some(token) = cancel
            && token.is_cancelled()
        {
            cancelled = true;
            break;
        }
        let now = Instant::now();
        if now >= hard_deadline {
            timeout = Some(TimeoutKind::Hard);
            break;
        }
        let idle_deadline = last_activity + request.idle_timeout;
        if now >= idle_deadline {
            timeout = Some(TimeoutKind::Idle);
            break;
        }
        let mut wait = hard_deadline.min(idle_deadline) - now;
        if cancel.is_some() {
            wait = wait.min(CANCEL_POLL);
        }
        match rx.recv_timeout(wait) {
            Ok(line) => {
                last_activity = Instant::now();
                let directive = match on_line(&line, &mut sink) {
                    Ok(directive) => directive,
                    // The run must not continue unsupervised; put the
                    // agent down before surfacing the error.
                    Err(e) => {
                        let _ = terminate(&mut child, pid);
                        return Err(e);
                    }
                };
                store_line(line);
                if let Directive::Stop { reason } = directive {
                    stopped = Some(reason);
                    break;
                }
            }
            // Woke to re-check deadlines and cancellation.
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                streams_open = false;
            }
        }
    }

    let status = if streams_open {
        // Cut short by cancellation, a timeout, or a stop directive.
        warn!(
            pid,
            ?timeout,
            cancelled,
            stop = stopped.as_deref().unwrap_or(""),
            "terminating agent",
        );
        let status = terminate(&mut child, pid)?;
        // The child is dead; collect what the readers still hold. The
        // deadline is absolute: a leftover pipe holder trickling lines
        // cannot stretch the drain.
        let drain_deadline = Instant::now() + DRAIN_WINDOW;
        loop {
            let remaining = drain_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok(line) => store_line(line),
                Err(_) => break,
            }
        }
        // Orphaned grandchildren can keep the pipes open past the kill,
        // so the readers stay detached; they exit on EOF.
        drop(stdout_handle);
        drop(stderr_handle);
        status
    } else {
        // Streams closed on their own; wait out the remaining hard
        // budget for the exit status.
        let remaining = hard_deadline.saturating_duration_since(Instant::now());
        let status = match child
            .wait_timeout(remaining)
            .context("wait for agent exit")?
        {
            Some(status) => status,
            None => {
                warn!(pid, "agent closed its streams but kept running");
                timeout = Some(TimeoutKind::Hard);
                terminate(&mut child, pid)?
            }
        };
        join_reader(stdout_handle)?;
        join_reader(stderr_handle)?;
        status
    };

    let exit_code = status.code();
    let signal = exit_signal(&status);
    if transcript_truncated > 0 {
        warn!(transcript_truncated, "transcript truncated");
    }
    debug!(?exit_code, ?signal, ?timeout, lines = transcript.len(), "agent finished");

    Ok(ProcessResult {
        transcript,
        transcript_truncated,
        exit_code,
        signal,
        timeout,
        stopped,
        cancelled,
        duration: start.elapsed(),
    })
}

struct StdinSink {
    stdin: Option<ChildStdin>,
}

impl ReplySink for StdinSink {
    fn reply(&mut self, line: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("agent stdin was not piped"))?;
        match write_line(stdin, line) {
            Ok(()) => Ok(()),
            // The agent can exit between emitting a request and reading
            // the answer; its exit status tells that story, not this
            // write.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                warn!("agent closed stdin before reading a reply");
                Ok(())
            }
            Err(e) => Err(e).context("write reply to agent stdin"),
        }
    }
}

fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes())?;
    stdin.write_all(b"\n")?;
    stdin.flush()
}

fn read_lines<R: Read>(reader: R, source: StreamSource, tx: SyncSender<TranscriptLine>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let text = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(TranscriptLine { source, text }).is_err() {
                    return;
                }
            }
            Err(_) => return,
        }
    }
}

/// Stop the child: polite signal first, bounded grace, then the kill.
fn terminate(child: &mut Child, pid: u32) -> Result<ExitStatus> {
    send_term(pid);
    if let Some(status) = child
        .wait_timeout(KILL_GRACE)
        .context("wait after stop signal")?
    {
        return Ok(status);
    }
    warn!(pid, "agent ignored the stop signal, killing");
    child.kill().context("kill agent")?;
    child.wait().context("wait after kill")
}

// Unsafe code is denied workspace-wide, so the signal goes through the
// kill binary rather than libc.
#[cfg(unix)]
fn send_term(pid: u32) {
    let result = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        warn!(err = %e, pid, "failed to send stop signal");
    }
}

#[cfg(not(unix))]
fn send_term(_pid: u32) {}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

fn join_reader(handle: JoinHandle<()>) -> Result<()> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))
}
