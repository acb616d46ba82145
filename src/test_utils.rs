//! Git fixture helpers shared across test modules.
//!
//! Fixtures run the real `git` binary so the subprocess plumbing is
//! exercised end to end. Host and user configuration are masked the same
//! way production commands mask them, and commit dates are pinned so
//! histories are reproducible.

use std::path::{Path, PathBuf};
use std::process::Command;

const FIXED_DATE: &str = "2024-01-01T00:00:00 +0000";

fn git(workdir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .current_dir(workdir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_AUTHOR_DATE", FIXED_DATE)
        .env("GIT_COMMITTER_DATE", FIXED_DATE)
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to spawn git {args:?}: {err}"));
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Creates an empty repository at `path` and returns its path.
pub fn init_fixture_repo(path: &Path) -> PathBuf {
    std::fs::create_dir_all(path).unwrap();
    git(path, &["init", "--quiet"]);
    path.to_path_buf()
}

/// Adds one empty commit authored by the given identity.
pub fn commit_as(repo: &Path, name: &str, email: &str, message: &str) {
    git(
        repo,
        &[
            "-c",
            &format!("user.name={name}"),
            "-c",
            &format!("user.email={email}"),
            "commit",
            "--quiet",
            "--allow-empty",
            "-m",
            message,
        ],
    );
}
