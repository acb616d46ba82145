//! Commit-phase worker.
//!
//! Claims `commits` jobs from the durable queue and runs the commit phase
//! for each: refresh the bare mirror, enforce the size and commit-count
//! ceilings, extract the per-author histogram, and fan out one identity
//! batch per slice of the author set. Phase failures land in the
//! repository row as a terminal `Failed` state with a recorded reason;
//! commit jobs are never retried automatically, so a failed phase waits
//! for resubmission.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::github::IdentityApi;
use crate::gitops::extract::author_histogram;
use crate::gitops::mirror::{classify_clone_error, MirrorStore};
use crate::pipeline::job::{self, Job, JobKind};
use crate::state::RepoEvent;
use crate::store::{Store, StoreError};
use crate::types::{reasons, Repository};

/// How one commit phase run ended, used to settle the queue row.
enum PhaseOutcome {
    /// Histogram persisted; identity batches enqueued when non-empty.
    Extracted,
    /// The repository row moved to `Failed` with a recorded reason.
    Failed,
}

/// Drains the `commits` side of the job queue.
pub struct CommitWorker {
    store: Store,
    mirrors: MirrorStore,
    api: Arc<dyn IdentityApi>,
    config: PipelineConfig,
    /// Nudges the identity worker after batches are enqueued.
    user_wake: mpsc::Sender<()>,
}

impl CommitWorker {
    pub fn new(
        store: Store,
        api: Arc<dyn IdentityApi>,
        user_wake: mpsc::Sender<()>,
        config: PipelineConfig,
    ) -> Self {
        let mirrors = MirrorStore::new(config.mirrors_dir(), config.clone_timeout);
        CommitWorker { store, mirrors, api, config, user_wake }
    }

    /// Worker event loop: drain the queue, then park until a submission
    /// wakes us or the poll interval elapses.
    #[instrument(skip_all)]
    pub async fn run(self, mut wake: mpsc::Receiver<()>, shutdown: CancellationToken) {
        info!("Commit worker started");
        loop {
            self.drain(&shutdown).await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = wake.recv() => {
                    if msg.is_none() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        info!("Commit worker stopped");
    }

    /// Claims and processes commit jobs until no eligible row is left.
    /// The job in flight is finished even when shutdown fires mid-phase.
    pub async fn drain(&self, shutdown: &CancellationToken) -> usize {
        let mut processed = 0;
        while !shutdown.is_cancelled() {
            let job = match self.store.claim_job(JobKind::Commits, Utc::now()).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(err) => {
                    error!(error = %err, "Failed to claim commit job");
                    break;
                }
            };
            if let Err(err) = self.run_job(&job).await {
                error!(job = %job.id, error = %err, "Commit job processing failed");
                if let Err(err) = self.store.settle_failed(job.id).await {
                    error!(job = %job.id, error = %err, "Failed to settle commit job");
                }
            }
            processed += 1;
        }
        processed
    }

    pub(crate) async fn run_job(&self, job: &Job) -> Result<(), StoreError> {
        let Some(repo) = self.store.get_repository_by_id(job.repository_id).await? else {
            warn!(
                job = %job.id,
                repository = %job.repository_id,
                "Commit job references a missing repository"
            );
            self.store.settle_failed(job.id).await?;
            return Ok(());
        };

        let repo = match self.store.apply_repo_event(repo.id, RepoEvent::CommitJobStarted).await {
            Ok(repo) => repo,
            Err(StoreError::Transition(err)) => {
                // Completed repositories only restart via resubmission.
                debug!(url = %repo.url, error = %err, "Dropping stale commit job");
                self.store.settle_done(job.id).await?;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        match self.run_phase(&repo).await? {
            PhaseOutcome::Extracted => self.store.settle_done(job.id).await?,
            PhaseOutcome::Failed => self.store.settle_failed(job.id).await?,
        }
        Ok(())
    }

    /// The commit phase proper. Git and lookup failures settle into the
    /// repository row; only store failures propagate.
    #[instrument(skip_all, fields(url = %repo.url))]
    async fn run_phase(&self, repo: &Repository) -> Result<PhaseOutcome, StoreError> {
        if let Some(kb) = self.remote_size_hint(repo).await {
            if kb > self.config.max_repo_kb {
                info!(
                    size_kb = kb,
                    limit_kb = self.config.max_repo_kb,
                    "Repository over size ceiling before clone"
                );
                self.discard_mirror(repo).await;
                return self.fail(repo, reasons::size_limit(kb, self.config.max_repo_kb)).await;
            }
        }

        let path = match self.mirrors.acquire(&repo.url).await {
            Ok(path) => path,
            Err(err) => {
                warn!(error = %err, "Mirror clone/update failed");
                return self.fail(repo, classify_clone_error(&err)).await;
            }
        };

        let measure = match self.mirrors.measure(&path).await {
            Ok(measure) => measure,
            Err(err) => {
                warn!(error = %err, "Mirror measurement failed");
                return self.fail(repo, reasons::extraction(&err.to_string())).await;
            }
        };

        if measure.disk_kb > self.config.max_repo_kb {
            info!(
                size_kb = measure.disk_kb,
                limit_kb = self.config.max_repo_kb,
                "Mirror over size ceiling"
            );
            self.discard_mirror(repo).await;
            return self
                .fail(repo, reasons::size_limit(measure.disk_kb, self.config.max_repo_kb))
                .await;
        }
        if measure.commit_count > self.config.max_commits {
            info!(
                commits = measure.commit_count,
                limit = self.config.max_commits,
                "Mirror over commit ceiling"
            );
            self.discard_mirror(repo).await;
            return self
                .fail(repo, reasons::commit_limit(measure.commit_count, self.config.max_commits))
                .await;
        }

        // An empty mirror has an unborn HEAD, so `git log` would fail.
        let histogram = if measure.commit_count == 0 {
            BTreeMap::new()
        } else {
            match author_histogram(&path, self.config.clone_timeout).await {
                Ok(histogram) => histogram,
                Err(err) => {
                    warn!(error = %err, "Author extraction failed");
                    return self.fail(repo, reasons::extraction(&err.to_string())).await;
                }
            }
        };

        let repo = self.store.record_extraction(repo.id, histogram).await?;
        info!(
            commits = repo.total_commits,
            authors = repo.unique_contributors,
            "Commit phase complete"
        );

        let batches = job::batch_count(repo.unique_contributors, self.config.batch_size);
        if batches == 0 {
            // Nothing to resolve; an empty history still completes.
            self.store
                .apply_repo_event(repo.id, RepoEvent::BatchSettled { remaining: 0 })
                .await?;
            return Ok(PhaseOutcome::Extracted);
        }
        for batch in 0..batches {
            self.store.enqueue_user_job(repo.id, batch).await?;
        }
        debug!(batches, "Identity batches enqueued");
        let _ = self.user_wake.try_send(());
        Ok(PhaseOutcome::Extracted)
    }

    /// Pre-clone size check via the hosting API. Best effort: any lookup
    /// problem skips the hint and leaves the decision to the measured
    /// ceiling.
    async fn remote_size_hint(&self, repo: &Repository) -> Option<u64> {
        let owner = repo.url.owner()?;
        let name = repo.url.name()?;
        match self.api.remote_size_kb(owner, name).await {
            Ok(hint) => hint,
            Err(err) => {
                debug!(error = %err, "Remote size hint unavailable");
                None
            }
        }
    }

    /// Removes the mirror of a repository that went over a ceiling. A
    /// missing mirror is fine; removal failures are logged and the phase
    /// outcome stands.
    async fn discard_mirror(&self, repo: &Repository) {
        if let Err(err) = self.mirrors.remove(&repo.url).await {
            warn!(url = %repo.url, error = %err, "Failed to remove over-limit mirror");
        }
    }

    async fn fail(&self, repo: &Repository, reason: String) -> Result<PhaseOutcome, StoreError> {
        self.store
            .apply_repo_event(repo.id, RepoEvent::CommitPhaseFailed { reason })
            .await?;
        Ok(PhaseOutcome::Failed)
    }
}
