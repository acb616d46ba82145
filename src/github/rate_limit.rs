//! Quota bookkeeping for the identity API.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

/// Rate limit information from response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Extracts rate limit information from API response headers.
pub fn extract_rate_limit(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let remaining = headers
        .get("x-ratelimit-remaining")?
        .to_str()
        .ok()?
        .parse::<u32>()
        .ok()?;
    let reset_timestamp = headers
        .get("x-ratelimit-reset")?
        .to_str()
        .ok()?
        .parse::<i64>()
        .ok()?;
    let reset_at = DateTime::from_timestamp(reset_timestamp, 0)?;
    Some(RateLimitInfo { remaining, reset_at })
}

/// Answer to "may I call the API now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Proceed,
    /// Quota is spent until the given time.
    Blocked { until: DateTime<Utc> },
}

impl Permission {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Permission::Blocked { .. })
    }
}

/// Tracks the identity API's remaining quota and reset time.
///
/// One guard lives inside each user-worker loop; there is no cross-process
/// sharing. A stale view self-heals: every response refreshes it, and an
/// over-optimistic call comes back 403/429 with fresh headers.
#[derive(Debug, Default)]
pub struct RateLimitGuard {
    info: Option<RateLimitInfo>,
}

impl RateLimitGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current quota view, if any response has been observed yet.
    pub fn info(&self) -> Option<RateLimitInfo> {
        self.info
    }

    /// Whether a call may proceed at `now`. Unknown quota means proceed;
    /// the first response will teach us.
    pub fn check(&self, now: DateTime<Utc>) -> Permission {
        match self.info {
            Some(info) if info.remaining == 0 && info.reset_at > now => Permission::Blocked {
                until: info.reset_at,
            },
            _ => Permission::Proceed,
        }
    }

    /// Records the quota view a response carried.
    pub fn observe(&mut self, info: Option<RateLimitInfo>) {
        if let Some(info) = info {
            self.info = Some(info);
        }
    }

    /// Marks the quota spent until `reset_at` regardless of prior state.
    pub fn exhaust(&mut self, reset_at: DateTime<Utc>) {
        self.info = Some(RateLimitInfo {
            remaining: 0,
            reset_at,
        });
    }
}
