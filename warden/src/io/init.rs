//! `.warden/` scaffolding for a governed workspace.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::core::policy::PermissionPolicy;

/// Canonical layout inside a workspace root.
#[derive(Debug, Clone)]
pub struct WardenPaths {
    pub root: PathBuf,
    pub warden_dir: PathBuf,
    pub policies_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub gitignore_path: PathBuf,
}

impl WardenPaths {
    pub fn new(root: &Path) -> Self {
        let warden_dir = root.join(".warden");
        Self {
            root: root.to_path_buf(),
            policies_dir: warden_dir.join("policies"),
            sessions_dir: warden_dir.join("sessions"),
            gitignore_path: warden_dir.join(".gitignore"),
            warden_dir,
        }
    }

    pub fn policy_path(&self, team: &str) -> PathBuf {
        self.policies_dir.join(format!("{team}.toml"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Overwrite existing scaffolding.
    pub force: bool,
}

// Session artifacts are per-run output, not something to commit.
const WARDEN_GITIGNORE: &str = "sessions/\n";

/// Create the `.warden/` layout with a starter policy for `team`.
///
/// Refuses to touch an existing `.warden/` unless `force` is set.
pub fn init_warden(root: &Path, team: &str, options: &InitOptions) -> Result<WardenPaths> {
    let paths = WardenPaths::new(root);

    if paths.warden_dir.exists() && !options.force {
        return Err(anyhow!(
            "warden init: .warden already exists (use --force to overwrite)"
        ));
    }

    let starter = starter_policy(team);
    // Never scaffold a policy that would fail to load back.
    PermissionPolicy::from_toml_str(&starter)
        .with_context(|| format!("starter policy for team '{team}' does not compile"))?;

    create_dir(&paths.warden_dir)?;
    create_dir(&paths.policies_dir)?;
    create_dir(&paths.sessions_dir)?;
    write_file(&paths.gitignore_path, WARDEN_GITIGNORE)?;
    write_file(&paths.policy_path(team), &starter)?;

    info!(root = %root.display(), team, "initialized .warden scaffolding");
    Ok(paths)
}

/// Conservative starting contract: standard tier, feature branches only,
/// the usual build tooling allowed, recursive deletes denied.
fn starter_policy(team: &str) -> String {
    format!(
        "\
team_id = \"{team}\"
risk_tier = \"standard\"
allowed_branch = \"feature/*\"
denial_threshold = 3

[[allow]]
matcher = \"glob\"
pattern = \"git *\"

[[allow]]
matcher = \"prefix\"
pattern = \"cargo\"

[[allow]]
matcher = \"glob\"
pattern = \"*\"
kinds = [\"file_write\"]

[[deny]]
matcher = \"glob\"
pattern = \"rm -rf *\"
"
    )
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create dir {}", path.display()))
}

/// Replace `path` atomically (temp file + rename).
fn write_file(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .with_context(|| format!("path has no file name: {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::policy_store;

    #[test]
    fn creates_the_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let paths = init_warden(dir.path(), "payments", &InitOptions::default()).unwrap();

        assert!(paths.policies_dir.is_dir());
        assert!(paths.sessions_dir.is_dir());
        assert!(paths.gitignore_path.is_file());
        assert!(paths.policy_path("payments").is_file());
    }

    /// Verifies the starter policy is immediately loadable through the
    /// normal store path.
    #[test]
    fn starter_policy_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        init_warden(dir.path(), "payments", &InitOptions::default()).unwrap();

        let policy = policy_store::load_team_policy(dir.path(), "payments").unwrap();
        assert_eq!(policy.team_id, "payments");
        assert_eq!(policy.denial_threshold, 3);
        assert!(policy.allowed_branch.matches("feature/anything"));
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        init_warden(dir.path(), "payments", &InitOptions::default()).unwrap();

        let err = init_warden(dir.path(), "payments", &InitOptions::default()).unwrap_err();
        assert!(err.to_string().contains("--force"), "{err}");
    }

    #[test]
    fn force_overwrites_existing_scaffolding() {
        let dir = tempfile::tempdir().unwrap();
        init_warden(dir.path(), "payments", &InitOptions::default()).unwrap();

        let paths =
            init_warden(dir.path(), "search", &InitOptions { force: true }).unwrap();
        assert!(paths.policy_path("search").is_file());
    }
}
