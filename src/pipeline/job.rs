//! Durable job rows and the batching rules both phases agree on.
//!
//! Identity jobs carry no email payload. A job only names (repository,
//! batch index); the worker re-derives the batch's emails by slicing the
//! repository's full sorted email set with [`batch_slice`]. Extraction
//! fixes that set before any identity job exists, so the slice a batch
//! index denotes never shifts underneath a queued job.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AuthorEmail, JobId, RepositoryId};

/// Which pipeline phase a job drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Commits,
    Users,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Commits => "commits",
            JobKind::Users => "users",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "commits" => Some(JobKind::Commits),
            "users" => Some(JobKind::Users),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue lifecycle of one job row. `Done` and `Failed` are terminal;
/// only `Pending` and `Running` rows occupy a dedupe slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durable queue row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub repository_id: RepositoryId,
    /// Batch index for identity jobs; always 0 for commit jobs.
    pub batch: u32,
    pub dedupe_key: String,
    pub status: JobStatus,
    /// Completed tries so far. A rate-limit reschedule does not count.
    pub attempts: u32,
    pub not_before: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Dedupe key for the single live commit-phase job of a repository.
pub fn commit_key(repo: RepositoryId) -> String {
    format!("commits:{repo}")
}

/// Dedupe key for one identity batch of a repository.
pub fn user_key(repo: RepositoryId, batch: u32) -> String {
    format!("users:{repo}:{batch}")
}

/// Number of identity batches a contributor set fans out into.
pub fn batch_count(unique_contributors: u64, batch_size: usize) -> u32 {
    unique_contributors.div_ceil(batch_size.max(1) as u64) as u32
}

/// The slice of the full sorted email set that batch `batch` covers.
/// Out-of-range indices yield an empty slice, which a worker settles as a
/// no-op batch.
pub fn batch_slice(emails: &[AuthorEmail], batch: u32, batch_size: usize) -> &[AuthorEmail] {
    let size = batch_size.max(1);
    let start = (batch as usize).saturating_mul(size);
    if start >= emails.len() {
        return &[];
    }
    let end = (start + size).min(emails.len());
    &emails[start..end]
}
