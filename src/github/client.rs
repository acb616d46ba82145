//! Identity-search client for the GitHub REST API.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::PipelineConfig;
use crate::types::{AuthorEmail, Username};

use super::error::IdentityApiError;
use super::rate_limit::{extract_rate_limit, RateLimitInfo};

/// Fallback quota reset when a limited response carries no usable headers.
pub(crate) const FALLBACK_RESET_SECS: i64 = 60;

const USER_AGENT: &str = concat!("commitboard/", env!("CARGO_PKG_VERSION"));

/// A resolved identity candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProfile {
    pub username: Username,
    pub profile_url: Option<String>,
}

/// One identity lookup outcome plus the quota view the response carried.
#[derive(Debug, Clone)]
pub struct EmailSearch {
    /// First (most relevant) candidate; `None` when the search came up empty.
    pub profile: Option<IdentityProfile>,
    pub rate_limit: Option<RateLimitInfo>,
}

/// The external identity API as the pipeline sees it.
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// Searches for the identity owning `email`.
    async fn search_by_email(&self, email: &AuthorEmail)
        -> Result<EmailSearch, IdentityApiError>;

    /// Best-effort remote size probe in KiB. `None` means the host cannot
    /// say (unknown repository, missing field); callers treat errors the
    /// same way.
    async fn remote_size_kb(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<u64>, IdentityApiError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    login: String,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    /// Reported by GitHub in KiB.
    size: Option<u64>,
}

/// Live client against api.github.com (or a compatible base URL).
#[derive(Debug, Clone)]
pub struct GithubIdentityApi {
    client: reqwest::Client,
    base_url: String,
}

impl GithubIdentityApi {
    pub fn new(config: &PipelineConfig) -> Result<Self, IdentityApiError> {
        use reqwest::header::{HeaderValue, AUTHORIZATION};

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.http_timeout);

        if let Some(token) = config.github_token.as_deref() {
            let mut auth_val = HeaderValue::from_str(&format!("token {token}"))
                .map_err(|e| IdentityApiError::permanent(None, format!("invalid API token: {e}")))?;
            auth_val.set_sensitive(true);

            let mut headers = HeaderMap::new();
            let _ = headers.insert(AUTHORIZATION, auth_val);
            builder = builder.default_headers(headers);
        }

        Ok(Self {
            client: builder.build().map_err(IdentityApiError::from_reqwest)?,
            base_url: config.api_base.clone(),
        })
    }

    /// Sends a request and splits the response into body + quota view,
    /// classifying any non-2xx status. Rate-limited errors always carry a
    /// concrete reset time, falling back to a minute out when the response
    /// headers were unusable.
    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<(T, Option<RateLimitInfo>), IdentityApiError> {
        let resp = request.send().await.map_err(IdentityApiError::from_reqwest)?;

        let rate_limit = extract_rate_limit(resp.headers());
        let status = resp.status();
        if status.is_success() {
            let body = resp.json::<T>().await.map_err(IdentityApiError::from_reqwest)?;
            return Ok((body, rate_limit));
        }

        let code = status.as_u16();
        let body = resp.text().await.unwrap_or_default();
        let message = if body.is_empty() { status.to_string() } else { body };
        let mut err = IdentityApiError::from_response(code, message, rate_limit);
        if err.kind.is_rate_limited() && err.rate_limit.is_none() {
            err.rate_limit = Some(RateLimitInfo {
                remaining: 0,
                reset_at: Utc::now() + Duration::seconds(FALLBACK_RESET_SECS),
            });
        }
        Err(err)
    }
}

#[async_trait]
impl IdentityApi for GithubIdentityApi {
    async fn search_by_email(
        &self,
        email: &AuthorEmail,
    ) -> Result<EmailSearch, IdentityApiError> {
        let query = format!("{} in:email", email.as_str());
        let request = self
            .client
            .get(format!("{}/search/users", self.base_url))
            .query(&[("q", query.as_str()), ("per_page", "1")]);

        let (body, rate_limit) = self.execute::<SearchResponse>(request).await?;
        let profile = body.items.into_iter().next().map(|item| IdentityProfile {
            username: Username::new(item.login),
            profile_url: item.html_url,
        });
        Ok(EmailSearch { profile, rate_limit })
    }

    async fn remote_size_kb(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<u64>, IdentityApiError> {
        let request = self
            .client
            .get(format!("{}/repos/{owner}/{name}", self.base_url));
        match self.execute::<RepoResponse>(request).await {
            Ok((repo, _)) => Ok(repo.size),
            Err(err) if err.status == Some(404) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_without_token() {
        let config = PipelineConfig::default();
        assert!(config.github_token.is_none());
        GithubIdentityApi::new(&config).unwrap();
    }

    #[test]
    fn client_builds_with_token() {
        let config = PipelineConfig::default().with_github_token("t0ken");
        GithubIdentityApi::new(&config).unwrap();
    }

    #[test]
    fn search_response_deserializes() {
        let json = r#"{
            "total_count": 2,
            "items": [
                {"login": "alice", "html_url": "https://github.com/alice", "id": 1},
                {"login": "alicia", "html_url": "https://github.com/alicia", "id": 2}
            ]
        }"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].login, "alice");
        assert_eq!(
            parsed.items[0].html_url.as_deref(),
            Some("https://github.com/alice")
        );
    }

    #[test]
    fn empty_search_response_deserializes() {
        let parsed: SearchResponse =
            serde_json::from_str(r#"{"total_count": 0, "items": []}"#).unwrap();
        assert!(parsed.items.is_empty());
    }

    #[test]
    fn repo_response_tolerates_missing_size() {
        let parsed: RepoResponse = serde_json::from_str(r#"{"size": 1024}"#).unwrap();
        assert_eq!(parsed.size, Some(1024));
        let parsed: RepoResponse = serde_json::from_str(r#"{"name": "widget"}"#).unwrap();
        assert_eq!(parsed.size, None);
    }
}
