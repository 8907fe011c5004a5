use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Ripple-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    pub output: OutputConfig,
}

/// Crawler behavior configuration
///
/// All durations are expressed in milliseconds in the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// URLs the crawl starts from (depth 0)
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Number of concurrent workers
    #[serde(rename = "worker-count", default = "default_worker_count")]
    pub worker_count: u32,

    /// Maximum link depth to follow from a seed
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Minimum time between request starts on the same host (milliseconds)
    #[serde(rename = "per-host-interval", default = "default_per_host_interval")]
    pub per_host_interval: u64,

    /// Maximum concurrent requests to the same host
    #[serde(
        rename = "per-host-concurrency",
        default = "default_per_host_concurrency"
    )]
    pub per_host_concurrency: u32,

    /// Per-request timeout (milliseconds)
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Time between periodic checkpoints (milliseconds)
    #[serde(rename = "checkpoint-interval", default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,

    /// Largest response body accepted, in bytes
    #[serde(rename = "max-body-bytes", default = "default_max_body_bytes")]
    pub max_body_bytes: u64,

    /// Maximum number of redirects followed per request
    #[serde(rename = "redirect-limit", default = "default_redirect_limit")]
    pub redirect_limit: u32,
}

impl CrawlerConfig {
    pub fn per_host_interval(&self) -> Duration {
        Duration::from_millis(self.per_host_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            worker_count: default_worker_count(),
            max_depth: default_max_depth(),
            per_host_interval: default_per_host_interval(),
            per_host_concurrency: default_per_host_concurrency(),
            request_timeout: default_request_timeout(),
            checkpoint_interval: default_checkpoint_interval(),
            max_body_bytes: default_max_body_bytes(),
            redirect_limit: default_redirect_limit(),
        }
    }
}

/// Retry and backoff configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total number of fetch attempts per URL, including the first
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the first retry (milliseconds)
    #[serde(rename = "base-delay", default = "default_base_delay")]
    pub base_delay: u64,

    /// Upper bound for any backoff (milliseconds)
    #[serde(rename = "max-delay", default = "default_max_delay")]
    pub max_delay: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
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

impl UserAgentConfig {
    /// Formats the header value: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Extraction configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractConfig {
    /// Only links containing this substring are followed
    #[serde(rename = "link-filter", default)]
    pub link_filter: Option<String>,
}

/// Which durable sink backs the crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkBackend {
    Sqlite,
    Jsonl,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_backend")]
    pub backend: SinkBackend,

    /// Path to the SQLite database file (sqlite backend)
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: PathBuf,

    /// Line-delimited record file (jsonl backend)
    #[serde(rename = "records-path", default = "default_records_path")]
    pub records_path: PathBuf,

    /// Line-delimited failure file (jsonl backend)
    #[serde(rename = "failures-path", default = "default_failures_path")]
    pub failures_path: PathBuf,

    /// Checkpoint file (jsonl backend)
    #[serde(rename = "checkpoint-path", default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
}

fn default_worker_count() -> u32 {
    4
}

fn default_max_depth() -> u32 {
    2
}

fn default_per_host_interval() -> u64 {
    1000
}

fn default_per_host_concurrency() -> u32 {
    1
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_checkpoint_interval() -> u64 {
    10_000
}

fn default_max_body_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_redirect_limit() -> u32 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_backend() -> SinkBackend {
    SinkBackend::Sqlite
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./harvest.db")
}

fn default_records_path() -> PathBuf {
    PathBuf::from("./records.jsonl")
}

fn default_failures_path() -> PathBuf {
    PathBuf::from("./failures.jsonl")
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("./checkpoint.jsonl")
}
