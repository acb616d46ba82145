//! Bare mirror maintenance: acquire, refresh, measure, remove.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::{reasons, RepoUrl};

use super::{git_command, run_git, run_git_stdout, GitError, GitResult};

/// Longest sanitized slug kept in a mirror directory name.
const SLUG_MAX: usize = 100;

/// Owns the mirrors directory and the clone/fetch policy.
///
/// Queue-level deduplication guarantees at most one live commit job per
/// repository, so whoever holds that job owns the mirror directory
/// exclusively; nothing here locks.
#[derive(Debug, Clone)]
pub struct MirrorStore {
    root: PathBuf,
    timeout: Duration,
}

/// Ceiling measurements for a local mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorMeasure {
    /// Loose plus packed object size, in KiB.
    pub disk_kb: u64,
    /// Commits reachable from HEAD.
    pub commit_count: u64,
}

impl MirrorStore {
    pub fn new(root: PathBuf, timeout: Duration) -> Self {
        Self { root, timeout }
    }

    /// Stable on-disk directory for a repository's mirror.
    pub fn path_for(&self, url: &RepoUrl) -> PathBuf {
        self.root.join(dir_name(url))
    }

    /// Clones the mirror if absent, otherwise refreshes it in place with
    /// `remote update --prune`. A leftover directory from an interrupted
    /// clone is discarded and cloned fresh.
    pub async fn acquire(&self, url: &RepoUrl) -> GitResult<PathBuf> {
        let path = self.path_for(url);
        tokio::fs::create_dir_all(&self.root).await?;

        if path.join("HEAD").exists() {
            debug!(path = %path.display(), "refreshing existing mirror");
            run_git(&path, &["remote", "update", "--prune"], self.timeout).await?;
            return Ok(path);
        }
        if path.exists() {
            tokio::fs::remove_dir_all(&path).await?;
        }

        debug!(url = %url, path = %path.display(), "cloning mirror");
        let target = path.to_string_lossy().into_owned();
        run_git(
            &self.root,
            &["clone", "--mirror", url.as_str(), &target],
            self.timeout,
        )
        .await?;
        Ok(path)
    }

    /// Disk usage and total commit count of a local mirror.
    pub async fn measure(&self, path: &Path) -> GitResult<MirrorMeasure> {
        let objects = run_git_stdout(path, &["count-objects", "-v"], self.timeout).await?;
        let disk_kb = parse_size_kb(&objects);

        let commit_count = if self.has_head(path).await? {
            let raw =
                run_git_stdout(path, &["rev-list", "--count", "HEAD"], self.timeout).await?;
            raw.parse::<u64>().map_err(|_| GitError::Unparsable {
                command: "git rev-list --count HEAD".to_string(),
                output: raw,
            })?
        } else {
            0
        };

        Ok(MirrorMeasure {
            disk_kb,
            commit_count,
        })
    }

    /// Whether the mirror has any commits. An unborn HEAD (exit 1 from
    /// `rev-parse --verify`) means an empty repository, not an error.
    pub async fn has_head(&self, path: &Path) -> GitResult<bool> {
        let command = "git rev-parse --verify --quiet HEAD".to_string();
        let mut cmd = git_command(path);
        cmd.args(["rev-parse", "--verify", "--quiet", "HEAD"]);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(GitError::TimedOut {
                    command,
                    timeout: self.timeout,
                })
            }
        };
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(GitError::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
        }
    }

    /// Removes a mirror from disk. Missing directories are fine.
    pub async fn remove(&self, url: &RepoUrl) -> GitResult<()> {
        let path = self.path_for(url);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Directory name for a mirror: a readable sanitized slug plus a short
/// digest, so distinct URLs can never collide after sanitization.
fn dir_name(url: &RepoUrl) -> String {
    let slug: String = url
        .as_str()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    // Sanitization leaves pure ASCII, so byte truncation is safe.
    let slug = &slug[..slug.len().min(SLUG_MAX)];
    let digest = Sha256::digest(url.as_str().as_bytes());
    format!("{}-{}", slug, &hex::encode(digest)[..8])
}

/// Sums the `size` and `size-pack` fields of `git count-objects -v`
/// output. Both are reported in KiB.
fn parse_size_kb(output: &str) -> u64 {
    let mut total = 0;
    for line in output.lines() {
        if let Some(rest) = line
            .strip_prefix("size: ")
            .or_else(|| line.strip_prefix("size-pack: "))
        {
            total += rest.trim().parse::<u64>().unwrap_or(0);
        }
    }
    total
}

/// Maps a clone/fetch failure to the terminal failure reason recorded on
/// the repository. Not-found wins over permission wording because hosts
/// report missing and unauthorized repositories with the same message.
pub fn classify_clone_error(err: &GitError) -> String {
    match err {
        GitError::TimedOut { timeout, .. } => {
            reasons::network(&format!("operation timed out after {timeout:?}"))
        }
        GitError::CommandFailed { stderr, .. } => {
            let lower = stderr.to_lowercase();
            if lower.contains("not found") || lower.contains("does not exist") {
                reasons::not_found()
            } else if lower.contains("authentication")
                || lower.contains("permission denied")
                || lower.contains("access denied")
                || lower.contains("could not read username")
            {
                reasons::permission(first_line(stderr))
            } else {
                reasons::network(first_line(stderr))
            }
        }
        GitError::Unparsable { .. } => reasons::internal(),
        GitError::Io(e) => reasons::network(&e.to_string()),
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("").trim()
}
