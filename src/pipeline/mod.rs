//! The two-phase processing pipeline.
//!
//! A submitted repository flows through two kinds of queued work. The
//! commit phase ([`CommitWorker`]) mirrors the repository locally and
//! persists a per-author commit histogram; the identity phase
//! ([`UserWorker`]) resolves author emails to contributor identities in
//! fixed-size batches and folds the counts into the leaderboard. One
//! worker task per kind drains the durable queue in [`crate::store`];
//! submissions and reads go through [`PipelineService`], and
//! [`Dispatcher`] owns the worker tasks and their shutdown.

pub mod commit_worker;
pub mod dispatcher;
pub mod job;
pub mod service;
pub mod user_worker;


pub use commit_worker::CommitWorker;
pub use dispatcher::Dispatcher;
pub use service::{PipelineService, RepoStatus, SubmitOutcome};
pub use user_worker::UserWorker;
