//! Per-worker in-memory identity cache.
//!
//! One cache instance belongs to one worker loop; there is no cross-task
//! sharing. The persistent store stays the source of truth, so losing this
//! cache only costs lookups, never correctness.

use std::collections::HashMap;

use crate::types::{AuthorEmail, Contributor, Username};

#[derive(Debug, Default)]
pub struct IdentityCache {
    by_email: HashMap<AuthorEmail, Contributor>,
    by_username: HashMap<Username, Contributor>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hit for the exact author-email spelling a contributor resolved from.
    pub fn by_email(&self, email: &AuthorEmail) -> Option<&Contributor> {
        self.by_email.get(email)
    }

    pub fn by_username(&self, username: &Username) -> Option<&Contributor> {
        self.by_username.get(username)
    }

    /// Caches `contributor` under the email it was resolved from and, when
    /// the identity is resolved, under its username. The email key is the
    /// lookup key, not the contributor's stored address; the two differ when
    /// a second address converges onto an existing identity.
    pub fn insert(&mut self, email: &AuthorEmail, contributor: &Contributor) {
        self.by_email.insert(email.clone(), contributor.clone());
        if let Some(name) = &contributor.username {
            self.by_username.insert(name.clone(), contributor.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContributorId;
    use chrono::Utc;

    fn contributor(id: i64, username: Option<&str>, email: &str) -> Contributor {
        Contributor {
            id: ContributorId(id),
            username: username.map(Username::new),
            email: AuthorEmail::new(email),
            profile_url: username.map(|u| format!("https://github.com/{u}")),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn insert_indexes_both_keys() {
        let mut cache = IdentityCache::new();
        let alice = contributor(1, Some("alice"), "alice@x.com");
        cache.insert(&AuthorEmail::new("alice@x.com"), &alice);

        assert_eq!(cache.by_email(&AuthorEmail::new("alice@x.com")), Some(&alice));
        assert_eq!(cache.by_username(&Username::new("alice")), Some(&alice));
        assert_eq!(cache.by_email(&AuthorEmail::new("bob@x.com")), None);
    }

    #[test]
    fn email_only_rows_skip_the_username_index() {
        let mut cache = IdentityCache::new();
        let anon = contributor(2, None, "anon@x.com");
        cache.insert(&AuthorEmail::new("anon@x.com"), &anon);

        assert_eq!(cache.by_email(&AuthorEmail::new("anon@x.com")), Some(&anon));
        assert_eq!(cache.by_username(&Username::new("anon")), None);
    }

    #[test]
    fn converged_address_caches_under_the_lookup_email() {
        let mut cache = IdentityCache::new();
        // Row created from bob's personal address, found again via his work
        // address.
        let bob = contributor(3, Some("bobby"), "bob@personal.net");
        cache.insert(&AuthorEmail::new("bob@company.com"), &bob);

        assert_eq!(cache.by_email(&AuthorEmail::new("bob@company.com")), Some(&bob));
        assert_eq!(cache.by_username(&Username::new("bobby")), Some(&bob));
        assert_eq!(cache.by_email(&AuthorEmail::new("bob@personal.net")), None);
    }
}
