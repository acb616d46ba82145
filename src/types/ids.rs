//! Strongly-typed identifiers used across the pipeline.
//!
//! Newtype wrappers prevent mixing up the various string- and integer-shaped
//! values that flow between the store, the workers, and the identity API.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Database identifier for a tracked repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepositoryId(pub i64);

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RepositoryId {
    fn from(id: i64) -> Self {
        RepositoryId(id)
    }
}

/// Database identifier for a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        JobId(id)
    }
}

/// Database identifier for a contributor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContributorId(pub i64);

impl fmt::Display for ContributorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ContributorId {
    fn from(id: i64) -> Self {
        ContributorId(id)
    }
}

/// A raw author email as it appears in commit metadata.
///
/// Not validated beyond being non-empty at extraction time; commit history
/// contains whatever the committer configured.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorEmail(String);

impl AuthorEmail {
    pub fn new(email: impl Into<String>) -> Self {
        AuthorEmail(email.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AuthorEmail {
    fn from(s: &str) -> Self {
        AuthorEmail(s.to_string())
    }
}

/// A hosting-platform account name (e.g. a GitHub login).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn new(name: impl Into<String>) -> Self {
        Username(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Username {
    fn from(s: &str) -> Self {
        Username(s.to_string())
    }
}

/// Error produced when a submitted repository URL cannot be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlParseError {
    /// The input was empty or whitespace-only.
    #[error("empty repository url")]
    Empty,

    /// The scheme is not `http` or `https`.
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),

    /// No host component after the scheme.
    #[error("repository url has no host")]
    MissingHost,
}

/// A normalized repository URL. The normalized form is the unique key for a
/// repository everywhere in the system.
///
/// Normalization: trim whitespace, lowercase scheme and host, strip a single
/// trailing `/`, strip a trailing `.git`. Only `http`/`https` URLs are
/// accepted from callers; internal code (stores, tests) may carry other
/// already-normalized sources via [`RepoUrl::from_normalized`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoUrl(String);

impl RepoUrl {
    /// Parses and normalizes a caller-supplied URL.
    pub fn parse(raw: &str) -> Result<Self, UrlParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(UrlParseError::Empty);
        }

        let (scheme, rest) = trimmed
            .split_once("://")
            .ok_or_else(|| UrlParseError::UnsupportedScheme("none".to_string()))?;
        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(UrlParseError::UnsupportedScheme(scheme));
        }

        let (host, path) = match rest.split_once('/') {
            Some((host, path)) => (host, format!("/{path}")),
            None => (rest, String::new()),
        };
        if host.is_empty() {
            return Err(UrlParseError::MissingHost);
        }
        let host = host.to_ascii_lowercase();

        let mut path = path;
        if path.ends_with('/') {
            path.pop();
        }
        if let Some(stripped) = path.strip_suffix(".git") {
            path = stripped.to_string();
        }

        Ok(RepoUrl(format!("{scheme}://{host}{path}")))
    }

    /// Wraps a string that is already in normalized form (store rows, local
    /// fixture paths). Does not re-validate.
    pub(crate) fn from_normalized(normalized: impl Into<String>) -> Self {
        RepoUrl(normalized.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host component, when the URL has one.
    pub fn host(&self) -> Option<&str> {
        let rest = self.0.split_once("://")?.1;
        let host = rest.split('/').next()?;
        (!host.is_empty()).then_some(host)
    }

    /// Second-to-last path segment (the owning account for forge-style URLs).
    pub fn owner(&self) -> Option<&str> {
        let mut segments = self.path_segments();
        let _name = segments.pop()?;
        segments.pop()
    }

    /// Last path segment (the repository name for forge-style URLs).
    pub fn name(&self) -> Option<&str> {
        self.path_segments().pop()
    }

    fn path_segments(&self) -> Vec<&str> {
        let path = match self.0.split_once("://") {
            Some((_, rest)) => match rest.split_once('/') {
                Some((_, path)) => path,
                None => return Vec::new(),
            },
            // Normalized local paths have no scheme.
            None => &self.0,
        };
        path.split('/').filter(|s| !s.is_empty()).collect()
    }
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
