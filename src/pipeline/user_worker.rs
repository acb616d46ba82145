//! Identity-phase worker.
//!
//! Claims `users` jobs and resolves one batch of author emails each. Batch
//! membership is derived, not stored: the sorted author set for the
//! repository is sliced by the job's batch index, so a re-delivered job
//! always sees the same emails. Rows already marked processed drop out of
//! the slice, which keeps re-runs cheap and idempotent.
//!
//! A rate-limited lookup is flow control, not failure: the partial batch
//! is committed and the job is rescheduled for the advertised reset time
//! with its attempt count untouched. Failed lookups ride the job's backoff
//! schedule; on the final permitted attempt they settle as email-only
//! contributors so the repository still converges.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::github::{IdentityApi, RetryConfig};
use crate::pipeline::job::{self, Job, JobKind, JobStatus};
use crate::resolve::{IdentityResolver, Resolution};
use crate::state::RepoEvent;
use crate::store::{Store, StoreError};
use crate::types::{AuthorEmail, ContributorId, RepoState};

/// How one batch run ended, used to settle the queue row.
enum BatchOutcome {
    /// Every unprocessed email in the slice resolved (possibly via
    /// fallback).
    Settled,
    /// The identity API rate limit blocked the batch partway through.
    RateLimited { resume_at: DateTime<Utc> },
    /// Some lookups failed; the job should back off and retry.
    Incomplete,
}

/// Drains the `users` side of the job queue.
pub struct UserWorker {
    store: Store,
    resolver: IdentityResolver,
    retry: RetryConfig,
    config: PipelineConfig,
}

impl UserWorker {
    pub fn new(store: Store, api: Arc<dyn IdentityApi>, config: PipelineConfig) -> Self {
        let resolver = IdentityResolver::new(store.clone(), api, config.staleness());
        UserWorker { store, resolver, retry: RetryConfig::DEFAULT, config }
    }

    /// Worker event loop: drain the queue, then park until the commit
    /// worker wakes us or the poll interval elapses. The poll also picks
    /// up jobs whose backoff or rate-limit hold has expired.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut wake: mpsc::Receiver<()>, shutdown: CancellationToken) {
        info!("Identity worker started");
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
        info!("Identity worker stopped");
    }

    /// Claims and processes identity jobs until no eligible row is left.
    /// The job in flight is finished even when shutdown fires mid-batch.
    pub async fn drain(&mut self, shutdown: &CancellationToken) -> usize {
        let mut processed = 0;
        while !shutdown.is_cancelled() {
            let job = match self.store.claim_job(JobKind::Users, Utc::now()).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(err) => {
                    error!(error = %err, "Failed to claim identity job");
                    break;
                }
            };
            if let Err(err) = self.run_job(&job).await {
                error!(job = %job.id, error = %err, "Identity job processing failed");
                if let Err(err) = self.store.settle_retry(job.id, self.retry).await {
                    error!(job = %job.id, error = %err, "Failed to settle identity job");
                }
            }
            processed += 1;
        }
        processed
    }

    pub(crate) async fn run_job(&mut self, job: &Job) -> Result<(), StoreError> {
        match self.run_batch(job).await? {
            BatchOutcome::Settled => self.store.settle_done(job.id).await?,
            BatchOutcome::RateLimited { resume_at } => {
                debug!(job = %job.id, resume_at = %resume_at, "Rescheduling batch for rate-limit reset");
                self.store.reschedule_job(job.id, resume_at).await?;
            }
            BatchOutcome::Incomplete => {
                if self.store.settle_retry(job.id, self.retry).await? == JobStatus::Failed {
                    warn!(job = %job.id, "Identity batch abandoned after retries");
                }
            }
        }
        Ok(())
    }

    /// Resolves one derived slice of the author set and folds the results
    /// into the leaderboard in a single transaction.
    #[instrument(skip_all, fields(repository = %job.repository_id, batch = job.batch))]
    async fn run_batch(&mut self, job: &Job) -> Result<BatchOutcome, StoreError> {
        let emails = self.store.commit_emails(job.repository_id).await?;
        let slice = job::batch_slice(&emails, job.batch, self.config.batch_size).to_vec();
        let stats = self.store.unprocessed_for_emails(job.repository_id, slice).await?;

        // Past the retry budget, unresolved emails become email-only
        // contributors instead of holding the repository open forever.
        let final_attempt = job.attempts >= self.retry.max_retries;

        let mut links: BTreeMap<ContributorId, u64> = BTreeMap::new();
        let mut done: Vec<AuthorEmail> = Vec::new();
        let mut rate_limited: Option<DateTime<Utc>> = None;
        let mut failed = 0usize;

        for stat in &stats {
            match self.resolver.resolve(&stat.author_email).await? {
                Resolution::Resolved(contributor) => {
                    // Two emails in one batch can converge on the same
                    // contributor, so counts are summed.
                    *links.entry(contributor.id).or_insert(0) += stat.commit_count;
                    done.push(stat.author_email.clone());
                }
                Resolution::RateLimited { resume_at, .. } => {
                    info!(
                        email = %stat.author_email,
                        resume_at = %resume_at,
                        "Rate limited; settling partial batch"
                    );
                    rate_limited = Some(resume_at);
                    break;
                }
                Resolution::Failed(err) if final_attempt => {
                    warn!(
                        email = %stat.author_email,
                        error = %err,
                        "Lookup failed on final attempt; keeping email-only record"
                    );
                    let contributor = self.resolver.resolve_fallback(&stat.author_email).await?;
                    *links.entry(contributor.id).or_insert(0) += stat.commit_count;
                    done.push(stat.author_email.clone());
                }
                Resolution::Failed(err) => {
                    warn!(email = %stat.author_email, error = %err, "Lookup failed; leaving for retry");
                    failed += 1;
                }
            }
        }

        let resolved = done.len();
        let remaining = self.store.apply_user_batch(job.repository_id, links, done).await?;

        match self
            .store
            .apply_repo_event(job.repository_id, RepoEvent::BatchSettled { remaining })
            .await
        {
            Ok(repo) if repo.state == RepoState::Completed => {
                info!(url = %repo.url, contributors = repo.unique_contributors, "Repository completed");
            }
            Ok(repo) => {
                debug!(url = %repo.url, resolved, remaining, "Batch settled");
            }
            // A resubmission can reset the repository under a live batch;
            // the settle is then a no-op for the row.
            Err(StoreError::Transition(err)) => {
                debug!(
                    repository = %job.repository_id,
                    error = %err,
                    "Batch settled outside the identity phase"
                );
            }
            Err(err) => return Err(err),
        }

        if let Some(resume_at) = rate_limited {
            Ok(BatchOutcome::RateLimited { resume_at })
        } else if failed > 0 {
            Ok(BatchOutcome::Incomplete)
        } else {
            Ok(BatchOutcome::Settled)
        }
    }
}
