//! Team policy documents on disk.
//!
//! Policies live at `.warden/policies/<team>.toml` inside the governed
//! workspace. Load failures keep their typed
//! [`PolicyLoadError`](crate::core::policy::PolicyLoadError) underneath
//! the context chain, so callers can tell a missing file from a bad one.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::policy::PermissionPolicy;

/// Conventional location of a team's policy inside a workspace root.
pub fn team_policy_path(root: &Path, team: &str) -> PathBuf {
    root.join(".warden")
        .join("policies")
        .join(format!("{team}.toml"))
}

/// Load and compile a policy from an explicit file path.
pub fn load_policy_file(path: &Path) -> Result<PermissionPolicy> {
    debug!(path = %path.display(), "loading policy");
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read policy file {}", path.display()))?;
    let policy = PermissionPolicy::from_toml_str(&contents)
        .with_context(|| format!("load policy {}", path.display()))?;
    Ok(policy)
}

/// Load the policy for a command: an explicit path when given, the
/// team's conventional location otherwise. Either way the document must
/// declare the requested team.
pub fn resolve_policy(
    root: &Path,
    team: &str,
    explicit: Option<&Path>,
) -> Result<PermissionPolicy> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => team_policy_path(root, team),
    };
    let policy = load_policy_file(&path)?;
    if policy.team_id != team {
        return Err(anyhow!(
            "team id mismatch: requested '{team}' but the policy declares '{}'",
            policy.team_id
        ));
    }
    Ok(policy)
}

/// Load a team's policy from its conventional location.
pub fn load_team_policy(root: &Path, team: &str) -> Result<PermissionPolicy> {
    resolve_policy(root, team, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::{PolicyLoadError, RiskTier};

    const DOC: &str = "\
team_id = \"payments\"
risk_tier = \"restricted\"
allowed_branch = \"feature/*\"
denial_threshold = 2

[[allow]]
matcher = \"prefix\"
pattern = \"git\"
";

    #[test]
    fn loads_a_policy_from_the_team_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = team_policy_path(dir.path(), "payments");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, DOC).unwrap();

        let policy = load_team_policy(dir.path(), "payments").unwrap();
        assert_eq!(policy.team_id, "payments");
        assert_eq!(policy.risk_tier, RiskTier::Restricted);
    }

    #[test]
    fn missing_file_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_team_policy(dir.path(), "payments").unwrap_err();
        assert!(format!("{err:#}").contains("payments.toml"), "{err:#}");
    }

    /// Verifies the typed load error survives the context chain, so
    /// callers can distinguish bad documents from io failures.
    #[test]
    fn load_errors_keep_their_typed_cause() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, DOC.replace("restricted", "maximum")).unwrap();

        let err = load_policy_file(&path).unwrap_err();
        let cause = err.downcast_ref::<PolicyLoadError>().unwrap();
        assert_eq!(*cause, PolicyLoadError::UnknownRiskTier("maximum".to_string()));
    }

    #[test]
    fn rejects_a_document_for_a_different_team() {
        let dir = tempfile::tempdir().unwrap();
        let path = team_policy_path(dir.path(), "search");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, DOC).unwrap();

        let err = load_team_policy(dir.path(), "search").unwrap_err();
        assert!(err.to_string().contains("mismatch"), "{err}");
    }

    /// Verifies an explicit `--policy` path wins over the conventional
    /// location but still enforces the team match.
    #[test]
    fn explicit_path_overrides_the_conventional_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("override.toml");
        fs::write(&path, DOC).unwrap();

        let policy = resolve_policy(dir.path(), "payments", Some(&path)).unwrap();
        assert_eq!(policy.team_id, "payments");

        let err = resolve_policy(dir.path(), "search", Some(&path)).unwrap_err();
        assert!(err.to_string().contains("mismatch"), "{err}");
    }
}
