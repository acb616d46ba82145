//! Identity API error types.
//!
//! Failures are categorized for scheduling decisions, not just reporting:
//!
//! - **RateLimited** is flow control. The batch stops, already-resolved
//!   contributors are still committed, and the job reschedules to the
//!   quota reset without consuming a retry attempt.
//! - **Transient** failures (5xx, timeouts, connection errors) are per-item:
//!   the item stays unprocessed and the job retries with backoff.
//! - **Permanent** failures (auth problems, other 4xx) are also per-item and
//!   do not halt the batch; they converge via the email-only fallback on the
//!   final attempt.

use std::fmt;

use thiserror::Error;

use super::rate_limit::RateLimitInfo;

/// The kind of identity API error, categorized for scheduling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityErrorKind {
    /// Quota exhausted: HTTP 429, or 403 carrying rate-limit markers.
    RateLimited,

    /// Transient error - safe to retry with backoff.
    ///
    /// Examples:
    /// - HTTP 5xx (server errors)
    /// - Network timeouts and connection failures
    Transient,

    /// Permanent error for this attempt.
    ///
    /// Examples:
    /// - Authentication failures (401, 403 without rate-limit markers)
    /// - Other 4xx responses
    Permanent,
}

impl IdentityErrorKind {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, IdentityErrorKind::RateLimited)
    }

    /// Whether a plain backoff retry can help. Rate limits are excluded:
    /// they wait for the reset time instead.
    pub fn is_retriable(&self) -> bool {
        matches!(self, IdentityErrorKind::Transient)
    }
}

/// An identity API error with categorization and any quota metadata the
/// failing response carried.
#[derive(Debug, Error)]
pub struct IdentityApiError {
    pub kind: IdentityErrorKind,

    /// The HTTP status code, if the failure got that far.
    pub status: Option<u16>,

    pub message: String,

    /// Rate-limit headers from the failing response, when present. A 403
    /// with `remaining == 0` is how GitHub reports primary-quota exhaustion.
    pub rate_limit: Option<RateLimitInfo>,

    #[source]
    pub source: Option<reqwest::Error>,
}

impl fmt::Display for IdentityApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "identity API error (HTTP {}): {}", code, self.message),
            None => write!(f, "identity API error: {}", self.message),
        }
    }
}

impl IdentityApiError {
    pub fn rate_limited(
        status: Option<u16>,
        message: impl Into<String>,
        rate_limit: Option<RateLimitInfo>,
    ) -> Self {
        Self {
            kind: IdentityErrorKind::RateLimited,
            status,
            message: message.into(),
            rate_limit,
            source: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: IdentityErrorKind::Transient,
            status: None,
            message: message.into(),
            rate_limit: None,
            source: None,
        }
    }

    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: IdentityErrorKind::Permanent,
            status,
            message: message.into(),
            rate_limit: None,
            source: None,
        }
    }

    /// Builds an error for a non-2xx response, using the status code, body
    /// text, and extracted rate-limit headers to pick the kind.
    pub fn from_response(
        status: u16,
        message: impl Into<String>,
        rate_limit: Option<RateLimitInfo>,
    ) -> Self {
        let message = message.into();
        let kind = classify_status(status, &message, rate_limit.as_ref());
        Self {
            kind,
            status: Some(status),
            message,
            rate_limit,
            source: None,
        }
    }

    /// Categorizes a transport-level reqwest error (the request never
    /// produced a usable response).
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let kind = match status {
            Some(429) => IdentityErrorKind::RateLimited,
            Some(code) if (500..600).contains(&code) => IdentityErrorKind::Transient,
            Some(_) => IdentityErrorKind::Permanent,
            None => {
                if err.is_timeout() || err.is_connect() {
                    IdentityErrorKind::Transient
                } else {
                    IdentityErrorKind::Permanent
                }
            }
        };
        Self {
            kind,
            status,
            message: err.to_string(),
            rate_limit: None,
            source: Some(err),
        }
    }
}

/// Categorizes a non-2xx status. A 403 is ambiguous on GitHub: with
/// exhausted quota or a rate-limit message it is flow control, otherwise an
/// auth failure.
fn classify_status(
    status: u16,
    message: &str,
    rate_limit: Option<&RateLimitInfo>,
) -> IdentityErrorKind {
    let quota_exhausted = rate_limit.map(|info| info.remaining == 0).unwrap_or(false);
    match status {
        429 => IdentityErrorKind::RateLimited,
        403 if quota_exhausted || is_rate_limit_message(message) => {
            IdentityErrorKind::RateLimited
        }
        code if (500..600).contains(&code) => IdentityErrorKind::Transient,
        _ => IdentityErrorKind::Permanent,
    }
}

/// Checks if an error message indicates a rate limit.
fn is_rate_limit_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}
