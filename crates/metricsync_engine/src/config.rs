//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use crate::merge::DuplicatePolicy;
use std::time::Duration;

/// Environment variable holding the API base URL.
pub const ENV_BASE_URL: &str = "METRICSYNC_BASE_URL";
/// Environment variable holding the request timeout in seconds.
pub const ENV_TIMEOUT_SECS: &str = "METRICSYNC_TIMEOUT_SECS";
/// Environment variable holding the recents buffer size.
pub const ENV_RECENTS_LIMIT: &str = "METRICSYNC_RECENTS_LIMIT";
/// Environment variable holding the watch window in seconds.
pub const ENV_WATCH_SECS: &str = "METRICSYNC_WATCH_SECS";
/// Environment variable holding the default source filter.
pub const ENV_SOURCE: &str = "METRICSYNC_SOURCE";

/// Default look-back window sent with every poll, in seconds.
pub const DEFAULT_WATCH_SECS: u32 = 30;

/// Configuration for the whole client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the remote API (e.g., "https://metrics.example.com/api").
    pub base_url: String,
    /// Time allowed for a request beyond the server's long-poll hold.
    pub request_timeout: Duration,
    /// Recent-events stream parameters.
    pub recents: StreamConfig,
    /// Dashboard snapshot stream parameters.
    pub dashboard: StreamConfig,
    /// Scheduling parameters shared by every poller.
    pub poller: PollerConfig,
    /// How the merge layer treats same-source timestamp collisions.
    pub duplicate_policy: DuplicatePolicy,
}

impl ClientConfig {
    /// Creates a new client configuration.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(30),
            recents: StreamConfig::new(20),
            dashboard: StreamConfig::new(1),
            poller: PollerConfig::default(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }

    /// Builds a configuration from `METRICSYNC_*` environment variables.
    pub fn from_env() -> SyncResult<Self> {
        let base_url = std::env::var(ENV_BASE_URL)
            .map_err(|_| SyncError::Config(format!("{ENV_BASE_URL} is not set")))?;
        let mut config = Self::new(base_url);

        if let Some(secs) = env_parse::<u64>(ENV_TIMEOUT_SECS)? {
            let timeout = Duration::from_secs(secs);
            config.request_timeout = timeout;
            config.poller.request_timeout = timeout;
        }
        if let Some(limit) = env_parse::<usize>(ENV_RECENTS_LIMIT)? {
            config.recents.limit = limit;
        }
        if let Some(watch) = env_parse::<u32>(ENV_WATCH_SECS)? {
            config.recents.watch = watch;
            config.dashboard.watch = watch;
        }
        if let Ok(source) = std::env::var(ENV_SOURCE) {
            config.recents = config.recents.with_source(source.clone());
            config.dashboard = config.dashboard.with_source(source);
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the HTTP request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the recent-events stream parameters.
    pub fn with_recents(mut self, recents: StreamConfig) -> Self {
        self.recents = recents;
        self
    }

    /// Sets the dashboard stream parameters.
    pub fn with_dashboard(mut self, dashboard: StreamConfig) -> Self {
        self.dashboard = dashboard;
        self
    }

    /// Sets the poller scheduling parameters.
    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    /// Sets the duplicate timestamp policy.
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Returns the timeout for the HTTP client.
    ///
    /// Covers the longest long-poll hold of either stream plus `request_timeout`,
    /// so an idle poll that the server answers with `timeout: true` never
    /// trips the client first.
    pub fn http_timeout(&self) -> Duration {
        let hold = self.recents.watch.max(self.dashboard.watch);
        self.request_timeout + Duration::from_secs(u64::from(hold))
    }

    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.base_url.is_empty() {
            return Err(SyncError::Config("base URL must not be empty".into()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(SyncError::Config(format!(
                "base URL must be http(s): {}",
                self.base_url
            )));
        }
        if self.recents.limit == 0 {
            return Err(SyncError::Config("recents limit must be positive".into()));
        }
        self.poller.validate()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:9000/api")
    }
}

/// Parameters of one logical metrics stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Page size of each fetch, and the maximum local buffer size.
    pub limit: usize,
    /// Look-back window hint sent to the server, in seconds.
    pub watch: u32,
    /// Optional source tag filter.
    pub source: Option<String>,
}

impl StreamConfig {
    /// Creates stream parameters with the given limit.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            watch: DEFAULT_WATCH_SECS,
            source: None,
        }
    }

    /// Sets the watch window.
    pub fn with_watch(mut self, watch: u32) -> Self {
        self.watch = watch;
        self
    }

    /// Sets the source filter. An empty source clears the filter.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        self.source = if source.is_empty() { None } else { Some(source) };
        self
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new(20)
    }
}

/// Scheduling parameters of a recurring poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Delay before the next poll after a success.
    pub interval: Duration,
    /// Delay before the next poll after a failure. Fixed, not exponential.
    pub failure_interval: Duration,
    /// Time allowed for a fetch beyond the stream's `watch` hold; exceeding
    /// `watch + request_timeout` counts as a failure.
    pub request_timeout: Duration,
}

impl PollerConfig {
    /// Creates a poller configuration.
    pub fn new(interval: Duration, failure_interval: Duration) -> Self {
        Self {
            interval,
            failure_interval,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the success interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the failure interval.
    pub fn with_failure_interval(mut self, interval: Duration) -> Self {
        self.failure_interval = interval;
        self
    }

    /// Sets the per-fetch allowance beyond the long-poll hold.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns the deadline of one fetch that asks the server to hold `watch` seconds.
    pub fn fetch_timeout(&self, watch: u32) -> Duration {
        self.request_timeout + Duration::from_secs(u64::from(watch))
    }

    /// Rejects zero timeouts.
    pub fn validate(&self) -> SyncResult<()> {
        if self.request_timeout.is_zero() {
            return Err(SyncError::Config("request timeout must be positive".into()));
        }
        Ok(())
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(5000))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> SyncResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SyncError::Config(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(None),
    }
}
