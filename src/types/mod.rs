//! Core domain types shared across the pipeline.

pub mod contributor;
pub mod ids;
pub mod repository;

pub use contributor::{CommitStat, Contributor, LeaderboardEntry};
pub use ids::{AuthorEmail, ContributorId, JobId, RepoUrl, RepositoryId, UrlParseError, Username};
pub use repository::{reasons, RepoState, Repository};
