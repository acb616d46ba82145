//! Local git operations for the commit phase.
//!
//! The pipeline shells out to the installed `git` for everything history
//! related: it maintains one bare mirror per repository and reads counts
//! and author data out of it. Every command runs with a clean environment
//! and a wall-clock timeout; a timed-out child is killed rather than left
//! to finish in the background.

pub mod extract;
pub mod mirror;

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Wall-clock bound exceeded; the child process was killed.
    #[error("git command timed out after {timeout:?}: {command}")]
    TimedOut { command: String, timeout: Duration },

    /// Git printed something we could not interpret.
    #[error("unexpected output from {command}: {output:?}")]
    Unparsable { command: String, output: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Create a git Command with clean environment (no system/user config).
///
/// This ensures consistent behavior across different machines by ignoring
/// system and user git configuration (e.g., hooks, aliases). Terminal
/// prompts are disabled so a private repository fails fast instead of
/// hanging on a credential prompt.
pub(crate) fn git_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);

    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    cmd.kill_on_drop(true);
    cmd
}

/// Run a git command in the given working directory, bounded by `timeout`.
pub async fn run_git(workdir: &Path, args: &[&str], timeout: Duration) -> GitResult<Output> {
    let command = format!("git {}", args.join(" "));
    let mut cmd = git_command(workdir);
    cmd.args(args);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(output) => output?,
        Err(_) => return Err(GitError::TimedOut { command, timeout }),
    };

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        Err(GitError::CommandFailed { command, stderr })
    }
}

/// Run a git command and return stdout as a trimmed string.
pub async fn run_git_stdout(
    workdir: &Path,
    args: &[&str],
    timeout: Duration,
) -> GitResult<String> {
    let output = run_git(workdir, args, timeout).await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
