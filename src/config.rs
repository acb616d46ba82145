//! Pipeline configuration.
//!
//! Every tunable has a compiled-in default and a `COMMITBOARD_*` environment
//! override. Tests use the `with_*` builders instead of the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Base directory for the database and mirror clones.
pub const DEFAULT_DATA_DIR: &str = "commitboard-data";

/// Size ceiling in KiB (512 MiB).
pub const DEFAULT_MAX_REPO_KB: u64 = 512 * 1024;

/// Commit-count ceiling.
pub const DEFAULT_MAX_COMMITS: u64 = 200_000;

/// Author emails per identity batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Days before a resolved contributor identity must be re-verified.
pub const DEFAULT_STALE_DAYS: i64 = 30;

/// Wall-clock bound on a clone or fetch subprocess.
pub const DEFAULT_CLONE_TIMEOUT: Duration = Duration::from_secs(600);

/// Per-request bound on identity API calls.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle workers re-check the queue this often even without a wake.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Tunables for the whole pipeline: directories, ceilings, batch sizes,
/// timeouts, and the optional identity API credential.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub max_repo_kb: u64,
    pub max_commits: u64,
    pub batch_size: usize,
    pub stale_days: i64,
    pub clone_timeout: Duration,
    pub http_timeout: Duration,
    pub poll_interval: Duration,
    pub api_base: String,
    pub github_token: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            max_repo_kb: DEFAULT_MAX_REPO_KB,
            max_commits: DEFAULT_MAX_COMMITS,
            batch_size: DEFAULT_BATCH_SIZE,
            stale_days: DEFAULT_STALE_DAYS,
            clone_timeout: DEFAULT_CLONE_TIMEOUT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            api_base: DEFAULT_API_BASE.to_string(),
            github_token: None,
        }
    }
}

impl PipelineConfig {
    /// Builds a configuration from `COMMITBOARD_*` environment variables,
    /// falling back to the defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("COMMITBOARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_repo_kb: env_parse("COMMITBOARD_MAX_REPO_KB", defaults.max_repo_kb),
            max_commits: env_parse("COMMITBOARD_MAX_COMMITS", defaults.max_commits),
            batch_size: env_parse("COMMITBOARD_BATCH_SIZE", defaults.batch_size).max(1),
            stale_days: env_parse("COMMITBOARD_STALE_DAYS", defaults.stale_days),
            clone_timeout: Duration::from_secs(env_parse(
                "COMMITBOARD_CLONE_TIMEOUT_SECS",
                DEFAULT_CLONE_TIMEOUT.as_secs(),
            )),
            http_timeout: Duration::from_secs(env_parse(
                "COMMITBOARD_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT.as_secs(),
            )),
            poll_interval: Duration::from_secs(env_parse(
                "COMMITBOARD_POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL.as_secs(),
            )),
            api_base: std::env::var("COMMITBOARD_API_BASE").unwrap_or(defaults.api_base),
            github_token: std::env::var("COMMITBOARD_GITHUB_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_max_repo_kb(mut self, kb: u64) -> Self {
        self.max_repo_kb = kb;
        self
    }

    pub fn with_max_commits(mut self, commits: u64) -> Self {
        self.max_commits = commits;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_stale_days(mut self, days: i64) -> Self {
        self.stale_days = days;
        self
    }

    pub fn with_clone_timeout(mut self, timeout: Duration) -> Self {
        self.clone_timeout = timeout;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_github_token(mut self, token: impl Into<String>) -> Self {
        self.github_token = Some(token.into());
        self
    }

    /// Directory holding the bare mirror clones.
    pub fn mirrors_dir(&self) -> PathBuf {
        self.data_dir.join("mirrors")
    }

    /// Path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("commitboard.db")
    }

    /// The contributor staleness window as a chrono duration.
    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::days(self.stale_days)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_repo_kb, 512 * 1024);
        assert_eq!(config.max_commits, 200_000);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.stale_days, 30);
        assert_eq!(config.clone_timeout, Duration::from_secs(600));
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert!(config.github_token.is_none());
    }

    #[test]
    fn builders_override_fields() {
        let config = PipelineConfig::default()
            .with_data_dir("/tmp/cb")
            .with_max_repo_kb(1)
            .with_max_commits(10)
            .with_batch_size(3)
            .with_stale_days(7)
            .with_api_base("http://localhost:9999")
            .with_github_token("t0ken");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/cb"));
        assert_eq!(config.max_repo_kb, 1);
        assert_eq!(config.max_commits, 10);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.stale_days, 7);
        assert_eq!(config.api_base, "http://localhost:9999");
        assert_eq!(config.github_token.as_deref(), Some("t0ken"));
    }

    #[test]
    fn batch_size_never_drops_below_one() {
        let config = PipelineConfig::default().with_batch_size(0);
        assert_eq!(config.batch_size, 1);
    }

    #[test]
    fn derived_paths_join_the_data_dir() {
        let config = PipelineConfig::default().with_data_dir("/var/lib/cb");
        assert_eq!(config.mirrors_dir(), PathBuf::from("/var/lib/cb/mirrors"));
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/cb/commitboard.db"));
    }

    #[test]
    fn staleness_window_is_in_days() {
        let config = PipelineConfig::default().with_stale_days(7);
        assert_eq!(config.staleness(), chrono::Duration::days(7));
    }
}
