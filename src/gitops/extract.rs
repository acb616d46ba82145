//! One-pass author-email histogram over a mirror's history.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::types::AuthorEmail;

use super::{run_git_stdout, GitResult};

/// Counts commits per author email across the entire history reachable
/// from HEAD, in a single `git log` traversal.
///
/// Emails are taken exactly as git records them; two spellings of one
/// address stay distinct here and converge later during identity
/// resolution. Callers gate on a non-empty repository first: an unborn
/// HEAD makes `git log` fail.
pub async fn author_histogram(
    mirror: &Path,
    timeout: Duration,
) -> GitResult<BTreeMap<AuthorEmail, u64>> {
    let raw = run_git_stdout(mirror, &["log", "--format=%ae", "HEAD"], timeout).await?;

    let mut counts = BTreeMap::new();
    for line in raw.lines() {
        let email = line.trim();
        if email.is_empty() {
            continue;
        }
        *counts.entry(AuthorEmail::from(email)).or_insert(0u64) += 1;
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{commit_as, init_fixture_repo};
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn histogram_counts_every_author() {
        let dir = TempDir::new().unwrap();
        let repo = init_fixture_repo(&dir.path().join("repo"));
        commit_as(&repo, "Alice", "alice@x.com", "one");
        commit_as(&repo, "Bob", "bob@x.com", "two");
        commit_as(&repo, "Alice", "alice@x.com", "three");
        commit_as(&repo, "Alice", "alice@x.com", "four");

        let counts = author_histogram(&repo, TIMEOUT).await.unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[&AuthorEmail::from("alice@x.com")], 3);
        assert_eq!(counts[&AuthorEmail::from("bob@x.com")], 1);
    }

    #[tokio::test]
    async fn extraction_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let repo = init_fixture_repo(&dir.path().join("repo"));
        commit_as(&repo, "Alice", "alice@x.com", "one");
        commit_as(&repo, "Bob", "bob@x.com", "two");
        commit_as(&repo, "Carol", "carol@x.com", "three");

        let first = author_histogram(&repo, TIMEOUT).await.unwrap();
        let second = author_histogram(&repo, TIMEOUT).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn spellings_are_preserved_not_merged() {
        let dir = TempDir::new().unwrap();
        let repo = init_fixture_repo(&dir.path().join("repo"));
        commit_as(&repo, "Alice", "Alice@X.com", "one");
        commit_as(&repo, "Alice", "alice@x.com", "two");

        let counts = author_histogram(&repo, TIMEOUT).await.unwrap();
        assert_eq!(counts.len(), 2);
    }
}
