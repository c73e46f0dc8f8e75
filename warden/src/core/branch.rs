//! Branch gate: may the session operate on this branch?
//!
//! Pure string-against-glob comparison with no repository access, so the
//! same check runs identically at session start, before commits and
//! pushes mid-session, and from `check-branch` in a pre-commit hook.

use crate::core::policy::PermissionPolicy;

/// Result of one branch gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCheck {
    pub pass: bool,
    pub reason: String,
}

/// Compare an active branch name against the policy's allowed pattern.
pub fn check(active_branch: &str, policy: &PermissionPolicy) -> BranchCheck {
    if active_branch.is_empty() {
        return BranchCheck {
            pass: false,
            reason: "active branch name is empty".to_string(),
        };
    }
    let pattern = policy.allowed_branch.as_str();
    if policy.allowed_branch.matches(active_branch) {
        BranchCheck {
            pass: true,
            reason: format!("branch '{active_branch}' matches allowed pattern '{pattern}'"),
        }
    } else {
        BranchCheck {
            pass: false,
            reason: format!("branch '{active_branch}' does not match allowed pattern '{pattern}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::PermissionPolicy;

    fn policy_allowing(branch_pattern: &str) -> PermissionPolicy {
        let doc = format!(
            "\
team_id = \"payments\"
risk_tier = \"standard\"
allowed_branch = \"{branch_pattern}\"
denial_threshold = 1

[[allow]]
matcher = \"prefix\"
pattern = \"git\"
"
        );
        PermissionPolicy::from_toml_str(&doc).unwrap()
    }

    /// Verifies the classic protected-branch refusal: a `feature/*`
    /// policy rejects `main` and the reason names both sides.
    #[test]
    fn rejects_branches_outside_the_allowed_pattern() {
        let policy = policy_allowing("feature/*");
        let check = check("main", &policy);
        assert!(!check.pass);
        assert!(check.reason.contains("main"), "{}", check.reason);
        assert!(check.reason.contains("feature/*"), "{}", check.reason);
    }

    #[test]
    fn accepts_matching_branches() {
        let policy = policy_allowing("feature/*");
        assert!(check("feature/checkout-flow", &policy).pass);
        assert!(check("feature/deep/nesting", &policy).pass);
    }

    #[test]
    fn literal_patterns_match_exactly_one_branch() {
        let policy = policy_allowing("release-2026");
        assert!(check("release-2026", &policy).pass);
        assert!(!check("release-2026-hotfix", &policy).pass);
    }

    #[test]
    fn empty_branch_name_never_passes() {
        let policy = policy_allowing("*");
        assert!(!check("", &policy).pass);
    }

    /// Verifies the gate is a pure function: same inputs, same answer.
    #[test]
    fn check_is_deterministic() {
        let policy = policy_allowing("feature/*");
        assert_eq!(check("main", &policy), check("main", &policy));
        assert_eq!(
            check("feature/x", &policy),
            check("feature/x", &policy)
        );
    }
}
