//! Contributor records, intermediate commit statistics, and leaderboard rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AuthorEmail, ContributorId, Username};

/// A canonical contributor identity, shared across repositories.
///
/// Rows are created from author emails and enriched when the identity API
/// (or a no-reply address) supplies a username. Rows are never merged or
/// deleted; duplicate emails that map to the same username converge through
/// the unique-username upsert key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub id: ContributorId,

    /// Resolved account name; `None` for email-only contributors.
    pub username: Option<Username>,

    /// The author email the row was first created from.
    pub email: AuthorEmail,

    pub profile_url: Option<String>,

    /// Last time this identity was verified or refreshed. Drives the
    /// staleness window.
    pub updated_at: DateTime<Utc>,
}

impl Contributor {
    /// Name shown on leaderboards: the username when resolved, otherwise the
    /// raw email.
    pub fn display_name(&self) -> &str {
        match &self.username {
            Some(name) => name.as_str(),
            None => self.email.as_str(),
        }
    }
}

/// Per-repository, per-author-email commit count produced by the commit
/// phase. `processed` flips to true once the identity phase has folded the
/// row into the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStat {
    pub author_email: AuthorEmail,
    pub commit_count: u64,
    pub processed: bool,
}

/// One row of a repository's ranked leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Username when resolved, raw email otherwise.
    pub name: String,
    pub profile_url: Option<String>,
    pub commit_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_username() {
        let with_username = Contributor {
            id: ContributorId(1),
            username: Some(Username::new("octocat")),
            email: AuthorEmail::new("octo@example.com"),
            profile_url: Some("https://github.com/octocat".to_string()),
            updated_at: Utc::now(),
        };
        assert_eq!(with_username.display_name(), "octocat");

        let email_only = Contributor {
            id: ContributorId(2),
            username: None,
            email: AuthorEmail::new("anon@example.com"),
            profile_url: None,
            updated_at: Utc::now(),
        };
        assert_eq!(email_only.display_name(), "anon@example.com");
    }
}
