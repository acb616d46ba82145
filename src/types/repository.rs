//! Repository records and their lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{RepoUrl, RepositoryId};

/// Lifecycle state of a tracked repository.
///
/// Transitions between states are validated by [`crate::state::apply`];
/// workers never write a state the transition function did not produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoState {
    /// Submitted, no worker has picked it up yet.
    Pending,

    /// A commit worker owns the repository: mirror + extraction in progress.
    CommitsProcessing,

    /// Commit data extracted; identity batches are being resolved.
    UsersProcessing,

    /// Every author email has been resolved; the leaderboard is ready.
    Completed,

    /// The commit phase failed; see the failure reason on the record.
    Failed,
}

impl RepoState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoState::Pending => "pending",
            RepoState::CommitsProcessing => "commits_processing",
            RepoState::UsersProcessing => "users_processing",
            RepoState::Completed => "completed",
            RepoState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RepoState::Pending),
            "commits_processing" => Some(RepoState::CommitsProcessing),
            "users_processing" => Some(RepoState::UsersProcessing),
            "completed" => Some(RepoState::Completed),
            "failed" => Some(RepoState::Failed),
            _ => None,
        }
    }

    /// States that no worker will advance without a new submission.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RepoState::Completed | RepoState::Failed)
    }

    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            RepoState::CommitsProcessing | RepoState::UsersProcessing
        )
    }
}

impl std::fmt::Display for RepoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked repository as stored in the `repositories` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,

    /// Normalized URL; the unique key for the repository.
    pub url: RepoUrl,

    pub state: RepoState,

    /// Short, stable reason string when `state` is `Failed`.
    pub failure_reason: Option<String>,

    /// Sum of per-author commit counts from the latest extraction.
    pub total_commits: u64,

    /// Distinct author emails from the latest extraction.
    pub unique_contributors: u64,

    /// When a commit worker last picked this repository up.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// When the latest extraction was persisted.
    pub commits_processed_at: Option<DateTime<Utc>>,

    /// When the repository last reached `Completed`.
    pub last_processed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// Builders for the user-visible failure reason strings.
///
/// Reasons are intentionally short and free of internal detail; they end up
/// on the repository record and in status responses.
pub mod reasons {
    pub fn network(detail: &str) -> String {
        format!("network error: {detail}")
    }

    pub fn not_found() -> String {
        "repository not found".to_string()
    }

    pub fn permission(detail: &str) -> String {
        format!("permission denied: {detail}")
    }

    pub fn size_limit(kb: u64, max_kb: u64) -> String {
        format!("size limit exceeded: {kb} KiB > {max_kb} KiB")
    }

    pub fn commit_limit(commits: u64, max_commits: u64) -> String {
        format!("commit limit exceeded: {commits} commits > {max_commits}")
    }

    pub fn extraction(detail: &str) -> String {
        format!("extraction failed: {detail}")
    }

    pub fn internal() -> String {
        "internal error".to_string()
    }
}
