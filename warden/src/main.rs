//! Command line for governed agent sessions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use warden::core::action::{ActionDescriptor, ActionKind};
use warden::core::{branch, interceptor};
use warden::io::git::{BranchSource, Git};
use warden::io::init::{InitOptions, init_warden};
use warden::io::policy_store;
use warden::io::process::{StreamSource, SubprocessDriver};
use warden::io::report::SessionPaths;
use warden::session::{SessionRequest, run_session};
use warden::{exit_codes, logging};

#[derive(Parser)]
#[command(name = "warden", version, about = "Run coding agents under a team permission policy")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create .warden scaffolding with a starter policy
    Init {
        /// Team whose starter policy to create
        #[arg(long, default_value = "dev")]
        team: String,
        /// Overwrite existing scaffolding
        #[arg(long)]
        force: bool,
    },
    /// Run an agent under a team's policy
    Run {
        /// Team whose policy governs the run
        #[arg(long)]
        team: String,
        /// Policy file (defaults to .warden/policies/<team>.toml)
        #[arg(long)]
        policy: Option<PathBuf>,
        /// Workspace root the agent operates in
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        /// Wall-clock budget in seconds
        #[arg(long, default_value_t = 1800)]
        hard_timeout: u64,
        /// Abort after this many seconds without output
        #[arg(long, default_value_t = 300)]
        idle_timeout: u64,
        /// Keep at most this many bytes of agent output in the report
        #[arg(long, default_value_t = 100_000)]
        transcript_limit_bytes: usize,
        /// Agent program followed by its arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        agent: Vec<String>,
    },
    /// Check a branch against a team's policy (pre-commit friendly)
    CheckBranch {
        #[arg(long)]
        team: String,
        #[arg(long)]
        policy: Option<PathBuf>,
        /// Branch to check (defaults to the current git branch)
        #[arg(long)]
        branch: Option<String>,
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },
    /// Evaluate a single action against a team's policy
    CheckAction {
        #[arg(long)]
        team: String,
        #[arg(long)]
        policy: Option<PathBuf>,
        /// Action kind: shell_command, file_write, file_delete,
        /// git_commit, git_push, network_call, or other
        #[arg(long, default_value = "shell_command")]
        kind: String,
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        /// The command line or path the action would touch
        payload: String,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { team, force } => cmd_init(&team, force),
        Command::Run {
            team,
            policy,
            workdir,
            hard_timeout,
            idle_timeout,
            transcript_limit_bytes,
            agent,
        } => cmd_run(
            &team,
            policy,
            &workdir,
            hard_timeout,
            idle_timeout,
            transcript_limit_bytes,
            &agent,
        ),
        Command::CheckBranch {
            team,
            policy,
            branch,
            workdir,
        } => cmd_check_branch(&team, policy, branch, &workdir),
        Command::CheckAction {
            team,
            policy,
            kind,
            workdir,
            payload,
        } => cmd_check_action(&team, policy, &kind, &workdir, payload),
    }
}

fn cmd_init(team: &str, force: bool) -> Result<i32> {
    let paths = init_warden(Path::new("."), team, &InitOptions { force })?;
    println!("initialized {}", paths.warden_dir.display());
    println!("starter policy: {}", paths.policy_path(team).display());
    Ok(exit_codes::OK)
}

fn cmd_run(
    team: &str,
    policy: Option<PathBuf>,
    workdir: &Path,
    hard_timeout: u64,
    idle_timeout: u64,
    transcript_limit_bytes: usize,
    agent: &[String],
) -> Result<i32> {
    let program = agent
        .first()
        .ok_or_else(|| anyhow!("no agent program given"))?;
    let request = SessionRequest {
        team: team.to_string(),
        policy_path: policy,
        program: program.clone(),
        args: agent[1..].to_vec(),
        env: Vec::new(),
        hard_timeout: Duration::from_secs(hard_timeout),
        idle_timeout: Duration::from_secs(idle_timeout),
        transcript_limit_bytes,
    };

    let driver = SubprocessDriver;
    let git = Git::new(workdir);
    let report = run_session(workdir, &request, &driver, &git, None, |line| {
        // Mirror the agent's streams onto our own as they arrive.
        match line.source {
            StreamSource::Stdout => println!("{}", line.text),
            StreamSource::Stderr => eprintln!("{}", line.text),
        }
    })?;

    let paths = SessionPaths::new(workdir, &report.id);
    println!(
        "session {}: {} ({}), {} denial(s), report at {}",
        report.id,
        report.outcome.as_str(),
        report.reason,
        report.denial_count,
        paths.report_path.display(),
    );
    Ok(report.outcome.exit_code())
}

fn cmd_check_branch(
    team: &str,
    policy: Option<PathBuf>,
    branch: Option<String>,
    workdir: &Path,
) -> Result<i32> {
    let policy = policy_store::resolve_policy(workdir, team, policy.as_deref())?;
    let name = match branch {
        Some(name) => name,
        None => Git::new(workdir).current_branch()?,
    };
    let check = branch::check(&name, &policy);
    if check.pass {
        println!("ok: {}", check.reason);
        Ok(exit_codes::OK)
    } else {
        eprintln!("rejected: {}", check.reason);
        Ok(exit_codes::BRANCH_REJECTED)
    }
}

fn cmd_check_action(
    team: &str,
    policy: Option<PathBuf>,
    kind: &str,
    workdir: &Path,
    payload: String,
) -> Result<i32> {
    let policy = policy_store::resolve_policy(workdir, team, policy.as_deref())?;
    let descriptor = ActionDescriptor {
        kind: parse_kind(kind)?,
        payload,
    };
    let interception = interceptor::intercept(&policy, descriptor);
    println!("{}", serde_json::to_string_pretty(&interception)?);
    if interception.decision.is_deny() {
        Ok(exit_codes::DENIED)
    } else {
        Ok(exit_codes::OK)
    }
}

fn parse_kind(kind: &str) -> Result<ActionKind> {
    match kind {
        "shell_command" => Ok(ActionKind::ShellCommand),
        "file_write" => Ok(ActionKind::FileWrite),
        "file_delete" => Ok(ActionKind::FileDelete),
        "git_commit" => Ok(ActionKind::GitCommit),
        "git_push" => Ok(ActionKind::GitPush),
        "network_call" => Ok(ActionKind::NetworkCall),
        "other" => Ok(ActionKind::Other),
        other => Err(anyhow!("unknown action kind '{other}'")),
    }
}
