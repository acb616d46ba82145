//! GitHub-backed identity API client.
//!
//! The pipeline talks to the external identity service through the
//! [`IdentityApi`] trait; `GithubIdentityApi` is the live implementation
//! against the GitHub REST API. Everything else here is scheduling
//! support:
//!
//! - Error kinds that separate rate limiting (flow control) from transient
//!   and permanent failures
//! - Rate-limit bookkeeping fed from response headers
//! - The exponential backoff schedule used when jobs are re-delivered

mod client;
mod error;
mod rate_limit;
mod retry;

pub(crate) use client::FALLBACK_RESET_SECS;
pub use client::{EmailSearch, GithubIdentityApi, IdentityApi, IdentityProfile};
pub use error::{IdentityApiError, IdentityErrorKind};
pub use rate_limit::{extract_rate_limit, Permission, RateLimitGuard, RateLimitInfo};
pub use retry::RetryConfig;
