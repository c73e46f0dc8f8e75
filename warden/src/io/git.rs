//! Branch identity from the version-control working copy.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

/// Where the active branch name comes from.
///
/// The governor queries this at session start and again before every
/// commit or push, so fakes can simulate a branch switched mid-session.
pub trait BranchSource {
    fn current_branch(&self) -> Result<String>;
}

/// Queries the real working copy through `git` subprocess calls.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl BranchSource for Git {
    fn current_branch(&self) -> Result<String> {
        let output = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = output.trim().to_string();
        if name == "HEAD" {
            // rev-parse prints the literal string HEAD when detached.
            return Err(anyhow!("detached HEAD (no branch to check)"));
        }
        debug!(branch = %name, "resolved current branch");
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn reads_the_checked_out_branch() {
        let repo = TestRepo::new().unwrap();
        repo.checkout_new("feature/widgets").unwrap();

        let git = Git::new(repo.root());
        assert_eq!(git.current_branch().unwrap(), "feature/widgets");
    }

    /// Verifies the refusal on detached HEAD: there is no branch name to
    /// check a policy against.
    #[test]
    fn refuses_detached_head() {
        let repo = TestRepo::new().unwrap();
        repo.git(&["checkout", "--detach", "HEAD"]).unwrap();

        let git = Git::new(repo.root());
        let err = git.current_branch().unwrap_err();
        assert!(err.to_string().contains("detached"), "{err}");
    }

    #[test]
    fn errors_outside_a_repository() {
        let dir = tempfile::tempdir().unwrap();
        let git = Git::new(dir.path());
        assert!(git.current_branch().is_err());
    }
}
