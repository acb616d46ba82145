//! Durable dedup queue over the `jobs` table.
//!
//! At-least-once delivery: a claim flips a row to `running`, and a crashed
//! claimant is recovered by flipping `running` rows back to `pending` at
//! startup. Deduplication rides on the partial unique index over live
//! (`pending` | `running`) rows, so finished jobs never block a fresh
//! enqueue for the same key.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::github::RetryConfig;
use crate::pipeline::job::{self, Job, JobKind, JobStatus};
use crate::types::{JobId, RepositoryId};

use super::{corrupt, from_ts, ts, Store, StoreError};

const JOB_COLUMNS: &str =
    "id, kind, repository_id, batch, dedupe_key, status, attempts, not_before, \
     created_at, updated_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let kind_raw: String = row.get(1)?;
    let kind = JobKind::parse(&kind_raw)
        .ok_or_else(|| corrupt(1, format!("unknown job kind {kind_raw:?}")))?;
    let status_raw: String = row.get(5)?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| corrupt(5, format!("unknown job status {status_raw:?}")))?;
    Ok(Job {
        id: JobId(row.get(0)?),
        kind,
        repository_id: RepositoryId(row.get(2)?),
        batch: row.get::<_, i64>(3)? as u32,
        dedupe_key: row.get(4)?,
        status,
        attempts: row.get::<_, i64>(6)? as u32,
        not_before: from_ts(7, row.get(7)?)?,
        created_at: from_ts(8, row.get(8)?)?,
        updated_at: from_ts(9, row.get(9)?)?,
    })
}

fn load_by_id(conn: &Connection, id: JobId) -> rusqlite::Result<Job> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
        params![id.0],
        job_from_row,
    )
}

impl Store {
    /// Enqueues the commit-phase job for a repository. `None` means a live
    /// job for this repository already holds the dedupe slot.
    pub async fn enqueue_commit_job(
        &self,
        repo: RepositoryId,
    ) -> Result<Option<Job>, StoreError> {
        self.enqueue(JobKind::Commits, repo, 0, job::commit_key(repo)).await
    }

    /// Enqueues one identity batch. `None` means this (repository, batch)
    /// already has a live job.
    pub async fn enqueue_user_job(
        &self,
        repo: RepositoryId,
        batch: u32,
    ) -> Result<Option<Job>, StoreError> {
        self.enqueue(JobKind::Users, repo, batch, job::user_key(repo, batch)).await
    }

    async fn enqueue(
        &self,
        kind: JobKind,
        repo: RepositoryId,
        batch: u32,
        key: String,
    ) -> Result<Option<Job>, StoreError> {
        self.call(move |conn| {
            let now = ts(Utc::now());
            let changed = conn.execute(
                "INSERT INTO jobs (kind, repository_id, batch, dedupe_key, status, attempts,
                                   not_before, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, 0, ?5, ?5)
                 ON CONFLICT(dedupe_key) WHERE status IN ('pending', 'running') DO NOTHING",
                params![kind.as_str(), repo.0, batch, key, now],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            Ok(Some(load_by_id(conn, JobId(conn.last_insert_rowid()))?))
        })
        .await
    }

    /// Claims the oldest eligible pending job of a kind, flipping it to
    /// `running` in the same statement.
    pub async fn claim_job(
        &self,
        kind: JobKind,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        self.call(move |conn| {
            let job = conn
                .query_row(
                    &format!(
                        "UPDATE jobs SET status = 'running', updated_at = ?1
                         WHERE id = (
                             SELECT id FROM jobs
                             WHERE kind = ?2 AND status = 'pending' AND not_before <= ?1
                             ORDER BY not_before, id
                             LIMIT 1
                         )
                         RETURNING {JOB_COLUMNS}"
                    ),
                    params![ts(now), kind.as_str()],
                    job_from_row,
                )
                .optional()?;
            Ok(job)
        })
        .await
    }

    pub async fn settle_done(&self, id: JobId) -> Result<(), StoreError> {
        self.set_status(id, JobStatus::Done).await
    }

    pub async fn settle_failed(&self, id: JobId) -> Result<(), StoreError> {
        self.set_status(id, JobStatus::Failed).await
    }

    async fn set_status(&self, id: JobId, status: JobStatus) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), ts(Utc::now()), id.0],
            )?;
            Ok(())
        })
        .await
    }

    /// Books one failed try: the job re-enters `pending` behind an
    /// exponential backoff delay, or flips to `failed` once its tries are
    /// exhausted. Returns the status the job ended up in.
    pub async fn settle_retry(
        &self,
        id: JobId,
        retry: RetryConfig,
    ) -> Result<JobStatus, StoreError> {
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let job = tx.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.0],
                job_from_row,
            )?;
            let attempts = job.attempts + 1;
            let now = ts(Utc::now());
            let status = if attempts > retry.max_retries {
                tx.execute(
                    "UPDATE jobs SET status = 'failed', attempts = ?1, updated_at = ?2
                     WHERE id = ?3",
                    params![attempts, now, id.0],
                )?;
                JobStatus::Failed
            } else {
                // attempts is 1-based here; the delay schedule is 0-indexed.
                let not_before = now + retry.delay_for_attempt(attempts - 1).as_secs() as i64;
                tx.execute(
                    "UPDATE jobs SET status = 'pending', attempts = ?1, not_before = ?2,
                                     updated_at = ?3
                     WHERE id = ?4",
                    params![attempts, not_before, now, id.0],
                )?;
                JobStatus::Pending
            };
            tx.commit()?;
            Ok(status)
        })
        .await
    }

    /// Rate-limit path: back to `pending` for the given resume time with
    /// attempts untouched.
    pub async fn reschedule_job(
        &self,
        id: JobId,
        resume_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE jobs SET status = 'pending', not_before = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![ts(resume_at), ts(Utc::now()), id.0],
            )?;
            Ok(())
        })
        .await
    }

    /// Startup recovery: every `running` row belonged to a claimant that no
    /// longer exists, so they all go back to `pending` for re-delivery.
    pub async fn recover_stale_jobs(&self) -> Result<u64, StoreError> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE jobs SET status = 'pending', updated_at = ?1 WHERE status = 'running'",
                params![ts(Utc::now())],
            )?;
            Ok(changed as u64)
        })
        .await
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.call(move |conn| {
            let job = conn
                .query_row(
                    &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                    params![id.0],
                    job_from_row,
                )
                .optional()?;
            Ok(job)
        })
        .await
    }
}
