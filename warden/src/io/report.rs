//! Session artifacts under `.warden/sessions/<id>/`.
//!
//! Each session leaves three files: `report.json` (the structured
//! result), `transcript.log` (tagged output lines), and `actions.jsonl`
//! (one decided action per line). The report is the artifact of record;
//! tracing output is diagnostics only and lands nowhere near here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::core::action::ActionDescriptor;
use crate::core::interceptor::DecisionSource;
use crate::core::policy::Decision;
use crate::exit_codes;
use crate::io::process::{StreamSource, TimeoutKind, TranscriptLine};

/// Terminal classification of one governed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The agent exited cleanly within budget.
    Completed,
    /// Aborted on denials: the threshold was crossed or an absolute rule
    /// fired.
    Denied,
    /// A wall-clock or inactivity budget expired.
    Timeout,
    /// The agent exited nonzero or died to a signal.
    Crashed,
    /// The branch gate failed before the agent was launched.
    BranchRejected,
    /// An external cancellation ended the run.
    Cancelled,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Denied => "denied",
            Outcome::Timeout => "timeout",
            Outcome::Crashed => "crashed",
            Outcome::BranchRejected => "branch_rejected",
            Outcome::Cancelled => "cancelled",
        }
    }

    /// Process exit code the CLI reports for this outcome.
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Completed => exit_codes::OK,
            Outcome::Denied => exit_codes::DENIED,
            Outcome::Timeout => exit_codes::TIMEOUT,
            Outcome::Crashed => exit_codes::CRASHED,
            Outcome::BranchRejected => exit_codes::BRANCH_REJECTED,
            Outcome::Cancelled => exit_codes::CANCELLED,
        }
    }
}

/// One decided action, in decision order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub descriptor: ActionDescriptor,
    pub decision: Decision,
    pub source: DecisionSource,
    /// Milliseconds since the unix epoch at decision time.
    pub at_unix_ms: u64,
}

/// Structured result of a session, as returned to callers and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub id: String,
    pub team_id: String,
    pub outcome: Outcome,
    /// Human-readable explanation of the outcome.
    pub reason: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timeout: Option<TimeoutKind>,
    pub denial_count: u32,
    pub started_unix: u64,
    pub duration_ms: u64,
    /// Sealed at the terminal state; nothing appends afterwards.
    pub transcript: Vec<TranscriptLine>,
    /// Bytes of agent output dropped once the transcript limit was
    /// reached; zero when everything was kept.
    pub transcript_truncated: usize,
    pub actions: Vec<ActionRecord>,
}

/// Canonical artifact paths for one session id.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub report_path: PathBuf,
    pub transcript_path: PathBuf,
    pub actions_path: PathBuf,
}

impl SessionPaths {
    pub fn new(root: &Path, session_id: &str) -> Self {
        let dir = sessions_dir(root).join(session_id);
        Self {
            report_path: dir.join("report.json"),
            transcript_path: dir.join("transcript.log"),
            actions_path: dir.join("actions.jsonl"),
            dir,
        }
    }
}

fn sessions_dir(root: &Path) -> PathBuf {
    root.join(".warden").join("sessions")
}

/// Pick an unused session id of the form `<team>-<unix-seconds>`,
/// bumping a numeric suffix on collision.
///
/// The session directory is created here, so the id stays reserved even
/// before the report lands.
pub fn allocate_session_id(root: &Path, team: &str) -> Result<String> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock predates the unix epoch")?
        .as_secs();
    let base = format!("{team}-{seconds}");
    let parent = sessions_dir(root);
    fs::create_dir_all(&parent)
        .with_context(|| format!("create sessions dir {}", parent.display()))?;
    for suffix in 1..=999u32 {
        let id = if suffix == 1 {
            base.clone()
        } else {
            format!("{base}-{suffix}")
        };
        let paths = SessionPaths::new(root, &id);
        // The bare create_dir is the reservation: a concurrent claimer
        // loses with AlreadyExists and the next suffix is tried.
        match fs::create_dir(&paths.dir) {
            Ok(()) => {
                debug!(session = %id, "allocated session id");
                return Ok(id);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("create session dir {}", paths.dir.display()));
            }
        }
    }
    Err(anyhow!("could not allocate a session id from base '{base}'"))
}

/// Write all artifacts for a finished session.
pub fn write_session_report(root: &Path, report: &SessionReport) -> Result<SessionPaths> {
    let paths = SessionPaths::new(root, &report.id);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create session dir {}", paths.dir.display()))?;

    // Write in deterministic order to keep the artifacts stable.
    write_json(&paths.report_path, report)?;
    write_transcript(&paths.transcript_path, &report.transcript)?;
    write_actions(&paths.actions_path, &report.actions)?;

    debug!(session = %report.id, outcome = report.outcome.as_str(), "session artifacts written");
    Ok(paths)
}

/// Read a persisted report back.
pub fn load_session_report(root: &Path, session_id: &str) -> Result<SessionReport> {
    let paths = SessionPaths::new(root, session_id);
    read_json(&paths.report_path)
}

fn write_transcript(path: &Path, lines: &[TranscriptLine]) -> Result<()> {
    let mut contents = String::new();
    for line in lines {
        let tag = match line.source {
            StreamSource::Stdout => "out",
            StreamSource::Stderr => "err",
        };
        contents.push_str(tag);
        contents.push_str(" | ");
        contents.push_str(&line.text);
        contents.push('\n');
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_actions(path: &Path, actions: &[ActionRecord]) -> Result<()> {
    let mut contents = String::new();
    for record in actions {
        let line = serde_json::to_string(record).context("serialize action record")?;
        contents.push_str(&line);
        contents.push('\n');
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut contents =
        serde_json::to_string_pretty(value).context("serialize session report")?;
    contents.push('\n');
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
