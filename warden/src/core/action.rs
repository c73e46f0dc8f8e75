//! Action descriptors and the line protocol that carries them.
//!
//! An agent surfaces intended operations as single-line JSON requests on
//! stdout. Everything else it prints is ordinary transcript output. The
//! governor answers each request with a single-line JSON reply on stdin.

use serde::{Deserialize, Serialize};

use crate::core::policy::Verdict;

/// Category of an attempted operation.
///
/// Wire and policy documents use the snake_case names
/// (`shell_command`, `file_write`, `file_delete`, `git_commit`,
/// `git_push`, `network_call`, `other`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// A command line to be run in a shell.
    ShellCommand,
    /// A file creation or overwrite; the payload is the path.
    FileWrite,
    /// A file removal; the payload is the path.
    FileDelete,
    /// A version-control commit.
    GitCommit,
    /// A push to a remote.
    GitPush,
    /// An outbound network fetch.
    NetworkCall,
    /// Anything the agent could not classify.
    Other,
}

/// Normalized representation of one attempted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub kind: ActionKind,
    /// The command line, path, or URL the action would touch.
    pub payload: String,
}

/// One action request parsed off the agent's stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    /// Agent-chosen correlation id, echoed back in the reply.
    pub id: u64,
    pub descriptor: ActionDescriptor,
}

/// Governor's answer to one action request, written to the agent's stdin.
#[derive(Debug, Clone, Serialize)]
pub struct ActionReply {
    pub id: u64,
    pub decision: Verdict,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct RequestLine {
    action: ActionKind,
    payload: String,
    id: u64,
}

/// Parse one stdout line as an action request.
///
/// Returns `None` for ordinary output. Only a JSON object carrying all of
/// `action`, `payload`, and `id` counts as a request; malformed JSON and
/// unknown action names read as plain transcript lines.
pub fn parse_request(line: &str) -> Option<ActionRequest> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let parsed: RequestLine = serde_json::from_str(trimmed).ok()?;
    let descriptor = normalize(ActionDescriptor {
        kind: parsed.action,
        payload: parsed.payload,
    });
    Some(ActionRequest {
        id: parsed.id,
        descriptor,
    })
}

/// Re-kind a declared shell command whose payload is a git commit or push.
///
/// Branch re-checks key off [`ActionKind::GitCommit`] and
/// [`ActionKind::GitPush`], so declaring them as plain shell commands must
/// not slip past the gate.
fn normalize(descriptor: ActionDescriptor) -> ActionDescriptor {
    // Skips leading flags, with or without a separate value token, so
    // `git -C /repo push` and `git --no-pager push` both count.
    use std::sync::LazyLock;
    static GIT_COMMIT_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"^git\s+(?:-\S+(?:\s+[^-\s]\S*)?\s+)*commit(?:\s|$)").unwrap()
    });
    static GIT_PUSH_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"^git\s+(?:-\S+(?:\s+[^-\s]\S*)?\s+)*push(?:\s|$)").unwrap()
    });

    if descriptor.kind != ActionKind::ShellCommand {
        return descriptor;
    }
    let kind = if GIT_COMMIT_RE.is_match(&descriptor.payload) {
        ActionKind::GitCommit
    } else if GIT_PUSH_RE.is_match(&descriptor.payload) {
        ActionKind::GitPush
    } else {
        ActionKind::ShellCommand
    };
    ActionDescriptor { kind, ..descriptor }
}
