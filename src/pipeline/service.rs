//! Submission and read facade over the store and the job queue.
//!
//! HTTP handlers (and tests) talk to the pipeline through
//! [`PipelineService`]; workers are reached only indirectly, via the
//! durable queue and a best-effort wake channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::state::RepoEvent;
use crate::store::{Store, StoreError};
use crate::types::{LeaderboardEntry, RepoState, RepoUrl, Repository};

/// What a submission did with the URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// New (or still pending) repository; a commit job is queued.
    Enqueued(Repository),
    /// A phase is already running; the submission deduplicated into it.
    InProgress(Repository),
    /// Completed repository returned as-is. Refreshing is the caller's
    /// decision, via [`PipelineService::submit_refresh`].
    Fresh(Repository),
    /// Failed or completed repository re-driven from the top.
    Requeued(Repository),
}

impl SubmitOutcome {
    pub fn repository(&self) -> &Repository {
        match self {
            SubmitOutcome::Enqueued(repo)
            | SubmitOutcome::InProgress(repo)
            | SubmitOutcome::Fresh(repo)
            | SubmitOutcome::Requeued(repo) => repo,
        }
    }

    /// Stable label for API responses and logs.
    pub fn label(&self) -> &'static str {
        match self {
            SubmitOutcome::Enqueued(_) => "enqueued",
            SubmitOutcome::InProgress(_) => "in_progress",
            SubmitOutcome::Fresh(_) => "fresh",
            SubmitOutcome::Requeued(_) => "requeued",
        }
    }
}

/// Caller-facing view of a repository row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoStatus {
    pub url: RepoUrl,
    pub state: RepoState,
    pub failure_reason: Option<String>,
    pub total_commits: u64,
    pub unique_contributors: u64,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Repository> for RepoStatus {
    fn from(repo: Repository) -> Self {
        RepoStatus {
            url: repo.url,
            state: repo.state,
            failure_reason: repo.failure_reason,
            total_commits: repo.total_commits,
            unique_contributors: repo.unique_contributors,
            last_processed_at: repo.last_processed_at,
            created_at: repo.created_at,
        }
    }
}

/// Cheap-to-clone handle for submitting repositories and reading results.
#[derive(Clone)]
pub struct PipelineService {
    store: Store,
    commit_wake: mpsc::Sender<()>,
}

impl PipelineService {
    pub fn new(store: Store, commit_wake: mpsc::Sender<()>) -> Self {
        PipelineService { store, commit_wake }
    }

    /// Submits a repository URL for processing. Safe to call any number of
    /// times: live work deduplicates, finished work is reported back.
    pub async fn submit(&self, url: &RepoUrl) -> Result<SubmitOutcome, StoreError> {
        self.submit_inner(url, false).await
    }

    /// Like [`submit`](Self::submit), but re-drives a completed repository
    /// instead of returning the cached result.
    pub async fn submit_refresh(&self, url: &RepoUrl) -> Result<SubmitOutcome, StoreError> {
        self.submit_inner(url, true).await
    }

    async fn submit_inner(&self, url: &RepoUrl, refresh: bool) -> Result<SubmitOutcome, StoreError> {
        let repo = self.store.get_or_create_repository(url).await?;
        let outcome = match repo.state {
            RepoState::Pending => {
                self.enqueue(&repo).await?;
                SubmitOutcome::Enqueued(repo)
            }
            RepoState::CommitsProcessing | RepoState::UsersProcessing => {
                debug!(url = %repo.url, state = %repo.state, "Submission joined in-flight processing");
                SubmitOutcome::InProgress(repo)
            }
            RepoState::Completed if !refresh => SubmitOutcome::Fresh(repo),
            RepoState::Failed | RepoState::Completed => {
                let repo = self.store.apply_repo_event(repo.id, RepoEvent::Resubmitted).await?;
                self.enqueue(&repo).await?;
                SubmitOutcome::Requeued(repo)
            }
        };
        Ok(outcome)
    }

    async fn enqueue(&self, repo: &Repository) -> Result<(), StoreError> {
        match self.store.enqueue_commit_job(repo.id).await? {
            Some(job) => debug!(url = %repo.url, job = %job.id, "Commit job enqueued"),
            None => debug!(url = %repo.url, "Commit job already queued"),
        }
        // Best effort: a full channel means a wake is already pending, and
        // the worker's poll interval covers a missing receiver.
        let _ = self.commit_wake.try_send(());
        Ok(())
    }

    /// Current processing state for a URL, if it was ever submitted.
    pub async fn get_status(&self, url: &RepoUrl) -> Result<Option<RepoStatus>, StoreError> {
        Ok(self.store.get_repository(url).await?.map(RepoStatus::from))
    }

    /// Ranked leaderboard for a URL. `None` for an unknown repository; an
    /// in-flight repository returns whatever has been aggregated so far.
    pub async fn get_leaderboard(
        &self,
        url: &RepoUrl,
    ) -> Result<Option<Vec<LeaderboardEntry>>, StoreError> {
        let Some(repo) = self.store.get_repository(url).await? else {
            return Ok(None);
        };
        Ok(Some(self.store.leaderboard(repo.id).await?))
    }
}
