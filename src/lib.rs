//! Commitboard - contributor leaderboards for git repositories.
//!
//! This library mirrors a submitted repository, extracts per-author commit
//! counts from its full history, resolves author emails to hosted
//! identities, and aggregates the results into a ranked leaderboard. Work
//! runs through a durable two-phase job queue so submissions survive
//! restarts and rate limits.

pub mod config;
pub mod github;
pub mod gitops;
pub mod pipeline;
pub mod resolve;
pub mod state;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;
