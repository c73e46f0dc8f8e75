//! CLI-level tests: exit codes and side effects of the warden binary.

use std::path::Path;
use std::process::Command;

use warden::exit_codes;
use warden::test_support::TestRepo;

fn warden_in(root: &Path, args: &[&str]) -> Option<i32> {
    Command::new(env!("CARGO_BIN_EXE_warden"))
        .current_dir(root)
        .args(args)
        .status()
        .expect("spawn warden")
        .code()
}

#[test]
fn init_scaffolds_a_loadable_starter_policy() {
    let repo = TestRepo::new().unwrap();

    let code = warden_in(repo.root(), &["init", "--team", "dev"]);
    assert_eq!(code, Some(exit_codes::OK));
    assert!(repo.root().join(".warden/policies/dev.toml").is_file());
    assert!(repo.root().join(".warden/sessions").is_dir());

    // Second init without --force refuses.
    let code = warden_in(repo.root(), &["init", "--team", "dev"]);
    assert_eq!(code, Some(exit_codes::INVALID));

    let code = warden_in(repo.root(), &["init", "--team", "dev", "--force"]);
    assert_eq!(code, Some(exit_codes::OK));
}

/// Verifies the pre-commit use: check-branch answers through its exit
/// code, with and without an explicit branch.
#[test]
fn check_branch_reports_through_exit_codes() {
    let repo = TestRepo::new().unwrap();
    assert_eq!(warden_in(repo.root(), &["init", "--team", "dev"]), Some(exit_codes::OK));

    let code = warden_in(
        repo.root(),
        &["check-branch", "--team", "dev", "--branch", "feature/checkout"],
    );
    assert_eq!(code, Some(exit_codes::OK));

    let code = warden_in(
        repo.root(),
        &["check-branch", "--team", "dev", "--branch", "main"],
    );
    assert_eq!(code, Some(exit_codes::BRANCH_REJECTED));

    // No --branch: the current git branch is checked. The repo is on
    // main, which the starter policy rejects.
    let code = warden_in(repo.root(), &["check-branch", "--team", "dev"]);
    assert_eq!(code, Some(exit_codes::BRANCH_REJECTED));

    repo.checkout_new("feature/hook").unwrap();
    let code = warden_in(repo.root(), &["check-branch", "--team", "dev"]);
    assert_eq!(code, Some(exit_codes::OK));
}

#[test]
fn check_action_distinguishes_allow_deny_and_error() {
    let repo = TestRepo::new().unwrap();
    assert_eq!(warden_in(repo.root(), &["init", "--team", "dev"]), Some(exit_codes::OK));

    let code = warden_in(
        repo.root(),
        &["check-action", "--team", "dev", "git status"],
    );
    assert_eq!(code, Some(exit_codes::OK));

    let code = warden_in(
        repo.root(),
        &["check-action", "--team", "dev", "rm -rf /tmp/scratch"],
    );
    assert_eq!(code, Some(exit_codes::DENIED));

    // Absolute rules answer the same way from the CLI.
    let code = warden_in(
        repo.root(),
        &["check-action", "--team", "dev", "sudo make install"],
    );
    assert_eq!(code, Some(exit_codes::DENIED));

    // No policy for this team.
    let code = warden_in(
        repo.root(),
        &["check-action", "--team", "ghosts", "git status"],
    );
    assert_eq!(code, Some(exit_codes::INVALID));
}

/// Verifies `run` maps session outcomes onto its exit code and leaves
/// the session artifacts behind.
#[test]
fn run_exits_with_the_outcome_code() {
    let repo = TestRepo::new().unwrap();
    assert_eq!(warden_in(repo.root(), &["init", "--team", "dev"]), Some(exit_codes::OK));
    repo.checkout_new("feature/run").unwrap();

    let ok_agent = repo.write_agent_script("ok.sh", "echo fine").unwrap();
    let code = warden_in(
        repo.root(),
        &[
            "run",
            "--team",
            "dev",
            "--hard-timeout",
            "20",
            "--idle-timeout",
            "10",
            "--",
            "sh",
            ok_agent.to_str().unwrap(),
        ],
    );
    assert_eq!(code, Some(exit_codes::OK));

    let crash_agent = repo.write_agent_script("crash.sh", "exit 7").unwrap();
    let code = warden_in(
        repo.root(),
        &[
            "run",
            "--team",
            "dev",
            "--hard-timeout",
            "20",
            "--idle-timeout",
            "10",
            "--",
            "sh",
            crash_agent.to_str().unwrap(),
        ],
    );
    assert_eq!(code, Some(exit_codes::CRASHED));

    let sessions: Vec<_> = std::fs::read_dir(repo.root().join(".warden/sessions"))
        .unwrap()
        .collect();
    assert_eq!(sessions.len(), 2, "one artifact dir per session");
}

#[test]
fn run_on_a_protected_branch_exits_branch_rejected() {
    let repo = TestRepo::new().unwrap();
    assert_eq!(warden_in(repo.root(), &["init", "--team", "dev"]), Some(exit_codes::OK));
    // Still on main; the starter policy wants feature/*.
    let agent = repo.write_agent_script("agent.sh", "echo nope").unwrap();

    let code = warden_in(
        repo.root(),
        &[
            "run",
            "--team",
            "dev",
            "--",
            "sh",
            agent.to_str().unwrap(),
        ],
    );
    assert_eq!(code, Some(exit_codes::BRANCH_REJECTED));
}
