//! Test fixtures: throwaway git repositories, policy documents, and
//! scripted shell agents.
//!
//! Compiled only for tests and the `test-support` feature.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

/// Throwaway git repository with one initial commit on `main`.
///
/// The directory is removed when the value drops.
pub struct TestRepo {
    temp: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let repo = Self { temp };
        repo.git(&["init", "--quiet"])?;
        repo.git(&["config", "user.email", "warden-tests@example.com"])?;
        repo.git(&["config", "user.name", "Warden Tests"])?;
        // Branch name must not depend on the host's init.defaultBranch.
        repo.git(&["checkout", "-q", "-b", "main"])?;
        fs::write(repo.root().join("README.md"), "# test repo\n").context("write README")?;
        repo.git(&["add", "."])?;
        repo.git(&["commit", "--quiet", "-m", "initial commit"])?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Run a git command in the repository, failing the test on error.
    pub fn git(&self, args: &[&str]) -> Result<()> {
        let status = Command::new("git")
            .args(args)
            .current_dir(self.temp.path())
            .status()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !status.success() {
            return Err(anyhow!("git {} failed with {status}", args.join(" ")));
        }
        Ok(())
    }

    pub fn checkout_new(&self, branch: &str) -> Result<()> {
        self.git(&["checkout", "-q", "-b", branch])
    }

    /// Write a policy document to the conventional team location.
    pub fn write_policy(&self, team: &str, contents: &str) -> Result<PathBuf> {
        let path = self
            .root()
            .join(".warden")
            .join("policies")
            .join(format!("{team}.toml"));
        fs::create_dir_all(path.parent().context("policy path has no parent")?)
            .context("create policies dir")?;
        fs::write(&path, contents).context("write policy")?;
        Ok(path)
    }

    /// Write an agent script into the repository; run it as `sh <path>`.
    pub fn write_agent_script(&self, name: &str, body: &str) -> Result<PathBuf> {
        let path = self.root().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).context("write agent script")?;
        Ok(path)
    }
}

/// Minimal valid policy document for tests.
pub fn policy_doc(team: &str, tier: &str, branch: &str, threshold: u32) -> String {
    format!(
        "\
team_id = \"{team}\"
risk_tier = \"{tier}\"
allowed_branch = \"{branch}\"
denial_threshold = {threshold}

[[allow]]
matcher = \"glob\"
pattern = \"git *\"

[[deny]]
matcher = \"glob\"
pattern = \"rm -rf *\"
"
    )
}

/// Shell fragment that emits one action request, reads the reply from
/// stdin, and echoes it tagged with the id.
///
/// `payload` must not contain quotes; these scripts are fixtures, not an
/// escaping layer.
pub fn request_and_echo(kind: &str, payload: &str, id: u64) -> String {
    format!(
        "echo '{{\"action\": \"{kind}\", \"payload\": \"{payload}\", \"id\": {id}}}'\n\
         read reply_{id}\n\
         echo \"reply-{id}:$reply_{id}\""
    )
}
