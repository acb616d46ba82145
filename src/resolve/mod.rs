//! Resolution of raw author emails to canonical contributors.
//!
//! [`IdentityResolver`] climbs a ladder that prefers cheap local answers
//! over network calls: synthetic no-reply parsing, the per-worker memory
//! cache, the persistent store (subject to a staleness window), and only
//! then the guarded identity API. Rate limiting is flow control: it
//! produces [`Resolution::RateLimited`] with the best local data, never an
//! error.

pub mod cache;
pub mod noreply;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};

use crate::github::{
    IdentityApi, IdentityApiError, Permission, RateLimitGuard, FALLBACK_RESET_SECS,
};
use crate::store::{Store, StoreError};
use crate::types::{AuthorEmail, Contributor};

pub use cache::IdentityCache;

/// Outcome of a single lookup.
#[derive(Debug)]
pub enum Resolution {
    /// A canonical contributor, from whichever ladder rung answered first.
    Resolved(Contributor),

    /// The API quota is spent. `fallback` carries the best local record when
    /// one exists; `resume_at` is when the quota window reopens.
    RateLimited {
        fallback: Option<Contributor>,
        resume_at: DateTime<Utc>,
    },

    /// The lookup failed. The error kind says whether retrying can help;
    /// either way the failure is per-item, not per-batch.
    Failed(IdentityApiError),
}

/// Email-to-contributor resolution with layered caching and rate-limit
/// awareness. One resolver is owned by one worker loop; the guard and cache
/// inside are deliberately not shared across tasks.
pub struct IdentityResolver {
    store: Store,
    api: Arc<dyn IdentityApi>,
    cache: IdentityCache,
    guard: RateLimitGuard,
    staleness: Duration,
}

impl IdentityResolver {
    pub fn new(store: Store, api: Arc<dyn IdentityApi>, staleness: Duration) -> Self {
        Self {
            store,
            api,
            cache: IdentityCache::new(),
            guard: RateLimitGuard::new(),
            staleness,
        }
    }

    /// Resolves one author email.
    ///
    /// Store failures are infrastructure errors and propagate; lookup
    /// failures are data and come back inside the [`Resolution`].
    pub async fn resolve(&mut self, email: &AuthorEmail) -> Result<Resolution, StoreError> {
        // Synthetic no-reply addresses already carry the username; the API
        // is never consulted for them.
        if let Some(identity) = noreply::parse(email) {
            if let Some(hit) = self.cache.by_username(&identity.username) {
                trace!(%email, "identity cache hit (no-reply username)");
                return Ok(Resolution::Resolved(hit.clone()));
            }
            let contributor = self
                .store
                .upsert_contributor(
                    email.clone(),
                    Some(identity.username.clone()),
                    Some(identity.profile_url()),
                )
                .await?;
            self.cache.insert(email, &contributor);
            debug!(%email, username = %identity.username, "resolved from no-reply address");
            return Ok(Resolution::Resolved(contributor));
        }

        if let Some(hit) = self.cache.by_email(email) {
            trace!(%email, "identity cache hit");
            return Ok(Resolution::Resolved(hit.clone()));
        }

        let now = Utc::now();
        let known = self.store.find_contributor_by_email(email.clone()).await?;
        if let Some(row) = &known {
            if row.updated_at + self.staleness > now {
                self.cache.insert(email, row);
                trace!(%email, "resolved from store");
                return Ok(Resolution::Resolved(row.clone()));
            }
        }

        if let Permission::Blocked { until } = self.guard.check(now) {
            debug!(%email, resume_at = %until, "lookup blocked by rate limit");
            return Ok(Resolution::RateLimited {
                fallback: known,
                resume_at: until,
            });
        }

        match self.api.search_by_email(email).await {
            Ok(search) => {
                self.guard.observe(search.rate_limit);
                let (username, profile_url) = match search.profile {
                    Some(profile) => (Some(profile.username), profile.profile_url),
                    None => (None, None),
                };
                debug!(
                    %email,
                    resolved = username.is_some(),
                    "identity search completed"
                );
                let contributor = self
                    .store
                    .upsert_contributor(email.clone(), username, profile_url)
                    .await?;
                self.cache.insert(email, &contributor);
                Ok(Resolution::Resolved(contributor))
            }
            Err(err) if err.kind.is_rate_limited() => {
                // A rate-limited response means the quota is spent whether or
                // not it carried quota headers.
                let resume_at = err
                    .rate_limit
                    .map(|info| info.reset_at)
                    .unwrap_or_else(|| now + Duration::seconds(FALLBACK_RESET_SECS));
                self.guard.exhaust(resume_at);
                debug!(%email, %resume_at, "identity search rate limited");
                Ok(Resolution::RateLimited {
                    fallback: known,
                    resume_at,
                })
            }
            Err(err) => Ok(Resolution::Failed(err)),
        }
    }

    /// Persists an email-only contributor for an address whose lookups keep
    /// failing, so a batch on its last permitted attempt can still converge.
    /// An already-resolved identity for the email is left intact.
    pub async fn resolve_fallback(
        &mut self,
        email: &AuthorEmail,
    ) -> Result<Contributor, StoreError> {
        let contributor = self
            .store
            .upsert_contributor(email.clone(), None, None)
            .await?;
        self.cache.insert(email, &contributor);
        debug!(%email, "recorded email-only contributor");
        Ok(contributor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{EmailSearch, IdentityProfile, RateLimitInfo};
    use crate::types::Username;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedApi {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<EmailSearch, IdentityApiError>>>,
    }

    impl ScriptedApi {
        fn new(script: Vec<Result<EmailSearch, IdentityApiError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityApi for ScriptedApi {
        async fn search_by_email(
            &self,
            email: &AuthorEmail,
        ) -> Result<EmailSearch, IdentityApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("unscripted identity lookup for {email}"))
        }

        async fn remote_size_kb(
            &self,
            _owner: &str,
            _name: &str,
        ) -> Result<Option<u64>, IdentityApiError> {
            Ok(None)
        }
    }

    fn found(login: &str) -> Result<EmailSearch, IdentityApiError> {
        Ok(EmailSearch {
            profile: Some(IdentityProfile {
                username: Username::new(login),
                profile_url: Some(format!("https://github.com/{login}")),
            }),
            rate_limit: Some(RateLimitInfo {
                remaining: 40,
                reset_at: Utc::now() + Duration::hours(1),
            }),
        })
    }

    fn nobody() -> Result<EmailSearch, IdentityApiError> {
        Ok(EmailSearch {
            profile: None,
            rate_limit: Some(RateLimitInfo {
                remaining: 40,
                reset_at: Utc::now() + Duration::hours(1),
            }),
        })
    }

    fn limited(reset_at: DateTime<Utc>) -> Result<EmailSearch, IdentityApiError> {
        Err(IdentityApiError::rate_limited(
            Some(403),
            "API rate limit exceeded",
            Some(RateLimitInfo {
                remaining: 0,
                reset_at,
            }),
        ))
    }

    fn resolver(store: &Store, api: &Arc<ScriptedApi>) -> IdentityResolver {
        IdentityResolver::new(store.clone(), api.clone(), Duration::days(30))
    }

    fn resolved(resolution: Resolution) -> Contributor {
        match resolution {
            Resolution::Resolved(c) => c,
            other => panic!("expected Resolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn noreply_addresses_never_touch_the_api() {
        let store = Store::in_memory().unwrap();
        let api = ScriptedApi::new(vec![]);
        let mut resolver = resolver(&store, &api);

        let first = resolved(
            resolver
                .resolve(&AuthorEmail::new("9+alice@users.noreply.github.com"))
                .await
                .unwrap(),
        );
        assert_eq!(first.username, Some(Username::new("alice")));
        assert_eq!(first.profile_url.as_deref(), Some("https://github.com/alice"));

        // Legacy spelling of the same login converges via the username key.
        let second = resolved(
            resolver
                .resolve(&AuthorEmail::new("alice@users.noreply.github.com"))
                .await
                .unwrap(),
        );
        assert_eq!(second.id, first.id);
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn repeat_lookups_hit_the_memory_cache() {
        let store = Store::in_memory().unwrap();
        let api = ScriptedApi::new(vec![found("carol")]);
        let mut resolver = resolver(&store, &api);
        let email = AuthorEmail::new("carol@example.com");

        let first = resolved(resolver.resolve(&email).await.unwrap());
        let second = resolved(resolver.resolve(&email).await.unwrap());
        assert_eq!(first, second);
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn fresh_store_rows_answer_locally() {
        let store = Store::in_memory().unwrap();
        store
            .upsert_contributor(
                AuthorEmail::new("dave@example.com"),
                Some(Username::new("dave")),
                None,
            )
            .await
            .unwrap();

        let api = ScriptedApi::new(vec![]);
        let mut resolver = resolver(&store, &api);
        let hit = resolved(
            resolver
                .resolve(&AuthorEmail::new("dave@example.com"))
                .await
                .unwrap(),
        );
        assert_eq!(hit.username, Some(Username::new("dave")));
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn stale_rows_are_reverified_through_the_api() {
        let store = Store::in_memory().unwrap();
        let row = store
            .upsert_contributor(AuthorEmail::new("erin@example.com"), None, None)
            .await
            .unwrap();
        store
            .backdate_contributor(row.id, Utc::now() - Duration::days(45))
            .await
            .unwrap();

        let api = ScriptedApi::new(vec![found("erin-gh")]);
        let mut resolver = resolver(&store, &api);
        let hit = resolved(
            resolver
                .resolve(&AuthorEmail::new("erin@example.com"))
                .await
                .unwrap(),
        );
        assert_eq!(hit.username, Some(Username::new("erin-gh")));
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn empty_search_persists_an_email_only_row() {
        let store = Store::in_memory().unwrap();
        let api = ScriptedApi::new(vec![nobody()]);
        let email = AuthorEmail::new("ghost@example.com");

        let mut first = resolver(&store, &api);
        let hit = resolved(first.resolve(&email).await.unwrap());
        assert_eq!(hit.username, None);
        assert_eq!(api.calls(), 1);

        // A fresh resolver (empty cache) finds the fresh row in the store
        // and stays off the API.
        let mut second = resolver(&store, &api);
        let again = resolved(second.resolve(&email).await.unwrap());
        assert_eq!(again.id, hit.id);
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn rate_limited_lookup_reports_fallback_and_resume_time() {
        let store = Store::in_memory().unwrap();
        let stale = store
            .upsert_contributor(
                AuthorEmail::new("frank@example.com"),
                Some(Username::new("frank")),
                None,
            )
            .await
            .unwrap();
        store
            .backdate_contributor(stale.id, Utc::now() - Duration::days(60))
            .await
            .unwrap();

        let reset_at = Utc::now() + Duration::minutes(10);
        let api = ScriptedApi::new(vec![limited(reset_at)]);
        let mut resolver = resolver(&store, &api);

        match resolver
            .resolve(&AuthorEmail::new("frank@example.com"))
            .await
            .unwrap()
        {
            Resolution::RateLimited {
                fallback,
                resume_at,
            } => {
                assert_eq!(fallback.map(|c| c.id), Some(stale.id));
                assert_eq!(resume_at, reset_at);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }

        // The guard remembers the exhausted quota; the next lookup is
        // blocked before any request is made.
        match resolver
            .resolve(&AuthorEmail::new("grace@example.com"))
            .await
            .unwrap()
        {
            Resolution::RateLimited {
                fallback,
                resume_at,
            } => {
                assert_eq!(fallback, None);
                assert_eq!(resume_at, reset_at);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failures_surface_per_item() {
        let store = Store::in_memory().unwrap();
        let api = ScriptedApi::new(vec![Err(IdentityApiError::transient("connection reset"))]);
        let mut resolver = resolver(&store, &api);

        match resolver
            .resolve(&AuthorEmail::new("henry@example.com"))
            .await
            .unwrap()
        {
            Resolution::Failed(err) => assert!(err.kind.is_retriable()),
            other => panic!("expected Failed, got {other:?}"),
        }
        // Nothing was persisted for the failed lookup.
        assert_eq!(
            store
                .find_contributor_by_email(AuthorEmail::new("henry@example.com"))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn fallback_keeps_previously_resolved_identities() {
        let store = Store::in_memory().unwrap();
        store
            .upsert_contributor(
                AuthorEmail::new("iris@example.com"),
                Some(Username::new("iris")),
                Some("https://github.com/iris".to_string()),
            )
            .await
            .unwrap();

        let api = ScriptedApi::new(vec![]);
        let mut resolver = resolver(&store, &api);
        let row = resolver
            .resolve_fallback(&AuthorEmail::new("iris@example.com"))
            .await
            .unwrap();
        assert_eq!(row.username, Some(Username::new("iris")));
        assert_eq!(row.profile_url.as_deref(), Some("https://github.com/iris"));
    }
}
