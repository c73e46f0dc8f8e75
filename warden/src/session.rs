//! Session orchestration: one governed agent run from branch check to
//! sealed report.
//!
//! The governor moves through a fixed sequence. Init loads the team's
//! policy and reserves a session id. The branch gate runs before any
//! process exists, so a wrong branch costs nothing. While the agent
//! runs, every stdout line passes through the interceptor; denials are
//! answered, counted against the policy's threshold, and an absolute
//! hit aborts at once. Whatever ends the run, the partial transcript is
//! sealed into the report and persisted before control returns.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::action::{self, ActionKind, ActionReply};
use crate::core::branch;
use crate::core::interceptor::{self, DecisionSource};
use crate::core::policy::Decision;
use crate::io::git::BranchSource;
use crate::io::policy_store;
use crate::io::process::{
    Directive, Driver, DriverRequest, ProcessResult, ReplySink, StreamSource, TimeoutKind,
    TranscriptLine,
};
use crate::io::report::{
    ActionRecord, Outcome, SessionReport, allocate_session_id, write_session_report,
};

/// Everything needed to launch one governed session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Team whose policy governs the run.
    pub team: String,
    /// Explicit policy file; defaults to `.warden/policies/<team>.toml`.
    pub policy_path: Option<PathBuf>,
    /// Agent binary and its arguments. The agent runs in the workspace
    /// root.
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Wall-clock budget for the whole run.
    pub hard_timeout: Duration,
    /// Budget for silence: the run aborts when the agent produces no
    /// output for this long.
    pub idle_timeout: Duration,
    /// Truncate the report's transcript beyond this many bytes.
    pub transcript_limit_bytes: usize,
}

/// Run one governed session end to end.
///
/// `driver` and `branch_source` are the seams production wires to
/// [`SubprocessDriver`](crate::io::process::SubprocessDriver) and
/// [`Git`](crate::io::git::Git); tests script them. `on_line` observes
/// every transcript line as it streams. The returned report has already
/// been persisted under `.warden/sessions/<id>/`.
#[instrument(skip_all, fields(team = %request.team))]
pub fn run_session<D, B, F>(
    root: &Path,
    request: &SessionRequest,
    driver: &D,
    branch_source: &B,
    cancel: Option<&CancelToken>,
    mut on_line: F,
) -> Result<SessionReport>
where
    D: Driver,
    B: BranchSource,
    F: FnMut(&TranscriptLine),
{
    let started = Instant::now();
    let started_unix = unix_now()?.as_secs();

    debug!(phase = "init", "loading policy");
    let policy = policy_store::resolve_policy(root, &request.team, request.policy_path.as_deref())?;
    let session_id = allocate_session_id(root, &policy.team_id)?;
    info!(
        session = %session_id,
        tier = policy.risk_tier.as_str(),
        threshold = policy.denial_threshold,
        "session initialized",
    );

    debug!(phase = "branch_check");
    let active_branch = branch_source.current_branch()?;
    let gate = branch::check(&active_branch, &policy);
    if !gate.pass {
        warn!(branch = %active_branch, "branch rejected, agent not launched");
        let report = SessionReport {
            id: session_id,
            team_id: policy.team_id.clone(),
            outcome: Outcome::BranchRejected,
            reason: gate.reason,
            exit_code: None,
            signal: None,
            timeout: None,
            denial_count: 0,
            started_unix,
            duration_ms: elapsed_ms(started),
            transcript: Vec::new(),
            transcript_truncated: 0,
            actions: Vec::new(),
        };
        write_session_report(root, &report)?;
        return Ok(report);
    }
    debug!(branch = %active_branch, "branch accepted");

    debug!(phase = "running");
    let driver_request = DriverRequest {
        program: request.program.clone(),
        args: request.args.clone(),
        workdir: root.to_path_buf(),
        env: request.env.clone(),
        hard_timeout: request.hard_timeout,
        idle_timeout: request.idle_timeout,
        transcript_limit_bytes: request.transcript_limit_bytes,
    };

    let mut actions: Vec<ActionRecord> = Vec::new();
    let mut denials: u32 = 0;

    let mut intercept_line =
        |line: &TranscriptLine, sink: &mut dyn ReplySink| -> Result<Directive> {
            on_line(line);
            if line.source == StreamSource::Stderr {
                return Ok(Directive::Continue);
            }
            let Some(parsed) = action::parse_request(&line.text) else {
                return Ok(Directive::Continue);
            };

            let mut interception = interceptor::intercept(&policy, parsed.descriptor);

            // The branch gate runs again before anything that writes
            // history; a mid-session switch must not slip through.
            if !interception.decision.is_deny()
                && matches!(
                    interception.descriptor.kind,
                    ActionKind::GitCommit | ActionKind::GitPush
                )
            {
                match branch_source.current_branch() {
                    Ok(branch_now) => {
                        let regate = branch::check(&branch_now, &policy);
                        if !regate.pass {
                            interception.decision = Decision::deny(format!(
                                "mid-session branch check failed: {}",
                                regate.reason
                            ));
                            interception.source = DecisionSource::Branch;
                        }
                    }
                    // An unreadable branch (detached HEAD, a broken
                    // repo) cannot prove the gate holds. Deny the
                    // action; the session itself runs on to a sealed
                    // report.
                    Err(e) => {
                        interception.decision = Decision::deny(format!(
                            "mid-session branch check failed: {e:#}"
                        ));
                        interception.source = DecisionSource::Branch;
                    }
                }
            }

            let reply = ActionReply {
                id: parsed.id,
                decision: interception.decision.verdict,
                reason: interception.decision.reason.clone(),
            };
            let reply_line = serde_json::to_string(&reply).context("serialize action reply")?;
            sink.reply(&reply_line)?;

            let record = ActionRecord {
                descriptor: interception.descriptor,
                decision: interception.decision,
                source: interception.source,
                at_unix_ms: unix_now()?.as_millis() as u64,
            };
            let directive = if record.decision.is_deny() {
                denials += 1;
                warn!(
                    kind = ?record.descriptor.kind,
                    reason = %record.decision.reason,
                    denials,
                    "action denied",
                );
                if record.source == DecisionSource::Absolute {
                    Directive::Stop {
                        reason: format!(
                            "aborted on absolute denylist: {}",
                            record.decision.reason
                        ),
                    }
                } else if denials >= policy.denial_threshold {
                    Directive::Stop {
                        reason: format!(
                            "denial threshold reached ({denials} of {})",
                            policy.denial_threshold
                        ),
                    }
                } else {
                    Directive::Continue
                }
            } else {
                debug!(kind = ?record.descriptor.kind, "action allowed");
                Directive::Continue
            };
            actions.push(record);
            Ok(directive)
        };

    let result = driver.drive(&driver_request, cancel, &mut intercept_line)?;

    let (outcome, reason) = classify(&result);
    let report = SessionReport {
        id: session_id,
        team_id: policy.team_id.clone(),
        outcome,
        reason,
        exit_code: result.exit_code,
        signal: result.signal,
        timeout: result.timeout,
        denial_count: denials,
        started_unix,
        duration_ms: elapsed_ms(started),
        transcript: result.transcript,
        transcript_truncated: result.transcript_truncated,
        actions,
    };
    write_session_report(root, &report)?;
    info!(
        session = %report.id,
        outcome = report.outcome.as_str(),
        denials = report.denial_count,
        lines = report.transcript.len(),
        "session finished",
    );
    Ok(report)
}

/// Map a driven run to its terminal outcome.
///
/// Precedence: cancellation, then a supervisor stop (denials), then
/// timeouts, then how the process itself ended. A clean zero exit is
/// the only road to `Completed`.
fn classify(result: &ProcessResult) -> (Outcome, String) {
    if result.cancelled {
        return (Outcome::Cancelled, "cancelled before completion".to_string());
    }
    if let Some(reason) = &result.stopped {
        return (Outcome::Denied, reason.clone());
    }
    if let Some(kind) = result.timeout {
        let reason = match kind {
            TimeoutKind::Hard => "hard timeout: wall-clock budget exhausted",
            TimeoutKind::Idle => "inactivity timeout: agent went silent",
        };
        return (Outcome::Timeout, reason.to_string());
    }
    if let Some(signal) = result.signal {
        return (Outcome::Crashed, format!("agent terminated by signal {signal}"));
    }
    match result.exit_code {
        Some(0) => (Outcome::Completed, "agent exited cleanly".to_string()),
        Some(code) => (Outcome::Crashed, format!("agent exited with code {code}")),
        None => (Outcome::Crashed, "agent exited without a status".to_string()),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn unix_now() -> Result<Duration> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock predates the unix epoch")
}
