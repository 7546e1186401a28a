use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Grid-Harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub grid: GridConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    pub remote: RemoteConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub taxonomy: Vec<MajorCategoryEntry>,
}

/// Crawl area configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    /// Geohash at the center of the crawl area
    pub central: String,

    /// Maximum number of neighbor hops from the central cell
    pub depth: u32,
}

/// Worker pool sizing and store locking
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Number of worker groups
    #[serde(default = "default_processes")]
    pub processes: usize,

    /// Worker threads per group
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// How long a store operation waits for a competing lock (seconds)
    #[serde(rename = "busy-timeout-secs", default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,

    /// Reclaim units left `claimed` for longer than this before workers start.
    /// Unset means claims never expire.
    #[serde(rename = "lease-timeout-secs", default)]
    pub lease_timeout_secs: Option<u64>,
}

/// Remote catalog service
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Scheme and host of the catalog service, e.g. "http://www.ele.me"
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum restaurants requested per (cell, category) query
    #[serde(rename = "page-limit", default = "default_page_limit")]
    pub page_limit: u32,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Retry behavior for failed remote requests
///
/// The defaults retry forever with no delay.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts per request before giving up; 0 retries forever
    #[serde(rename = "max-attempts", default)]
    pub max_attempts: u32,

    /// Delay after the first failure (milliseconds)
    #[serde(rename = "initial-backoff-ms", default)]
    pub initial_backoff_ms: u64,

    /// Factor applied to the delay after each further failure
    #[serde(rename = "backoff-multiplier", default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on the delay (milliseconds); 0 leaves it uncapped
    #[serde(rename = "max-backoff-ms", default)]
    pub max_backoff_ms: u64,
}

/// Store location configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the status, data and log databases
    pub directory: String,

    /// Common file name prefix; defaults to today's date
    #[serde(default)]
    pub name: Option<String>,
}

/// A major category entry overriding the built-in taxonomy
#[derive(Debug, Clone, Deserialize)]
pub struct MajorCategoryEntry {
    pub id: u32,
    pub name: String,
    pub minors: Vec<MinorCategoryEntry>,
}

/// A minor category under a `MajorCategoryEntry`
#[derive(Debug, Clone, Deserialize)]
pub struct MinorCategoryEntry {
    pub id: u32,
    pub name: String,
}

impl PoolConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }

    pub fn lease_timeout(&self) -> Option<Duration> {
        self.lease_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            processes: default_processes(),
            threads: default_threads(),
            busy_timeout_secs: default_busy_timeout(),
            lease_timeout_secs: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff_ms: 0,
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: 0,
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_processes() -> usize {
    2
}

fn default_threads() -> usize {
    8
}

fn default_busy_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    3
}

fn default_page_limit() -> u32 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}
