//! Engine configuration.
//!
//! All values carry sensible defaults and can be overridden through
//! `DEJAVU_*` environment variables, so embedding applications only touch
//! the fields they care about.

use std::time::Duration;

/// Default similarity threshold for fuzzy perceptual matches.
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.9;

/// Default retention window for unblocked local records.
const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Default interval between eviction passes.
const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Top-level configuration for the dedup engine.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Minimum `(64 - hamming) / 64` ratio for two perceptual fingerprints
    /// to count as the same content.
    pub similarity_threshold: f64,
    /// How long unblocked local records are kept before eviction.
    pub retention: Duration,
    /// Interval between background eviction passes.
    pub eviction_interval: Duration,
    /// Remote signature table settings.
    pub remote: RemoteConfig,
    /// Blocked-download retry settings.
    pub retry: RetryConfig,
}

/// Configuration for the shared remote signature table.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// DynamoDB table name.
    pub table: String,
    /// AWS region hosting the table.
    pub region: String,
    /// Endpoint override, for local test containers.
    pub endpoint: Option<String>,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Maximum retry attempts for transient errors.
    pub max_retries: u32,
    /// Initial retry interval.
    pub initial_interval: Duration,
    /// Maximum retry interval.
    pub max_interval: Duration,
}

/// Configuration for the blocked-download retry scheduler.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Base delay; attempt `n` waits roughly `base * 2^n`.
    pub base_delay: Duration,
    /// Ceiling on any single retry delay.
    pub max_delay: Duration,
    /// Multiplicative jitter applied to each delay (0.25 = ±25%).
    pub jitter: f64,
    /// Maximum records processed per wake cycle.
    pub batch_size: usize,
    /// Interval between timer-driven wake cycles.
    pub tick_interval: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            retention: Duration::from_secs(DEFAULT_RETENTION_DAYS * 24 * 60 * 60),
            eviction_interval: DEFAULT_EVICTION_INTERVAL,
            remote: RemoteConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            table: "dejavu-signatures".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            timeout: Duration::from_secs(10),
            max_retries: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(6 * 60 * 60),
            jitter: 0.25,
            batch_size: 16,
            tick_interval: Duration::from_secs(60),
        }
    }
}

impl DedupConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            similarity_threshold: env_parse(
                "DEJAVU_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            ),
            retention: Duration::from_secs(
                env_parse("DEJAVU_RETENTION_DAYS", DEFAULT_RETENTION_DAYS) * 24 * 60 * 60,
            ),
            eviction_interval: env_secs(
                "DEJAVU_EVICTION_INTERVAL_SECS",
                defaults.eviction_interval,
            ),
            remote: RemoteConfig::from_env(),
            retry: RetryConfig::from_env(),
        }
    }
}

impl RemoteConfig {
    /// Load remote-table configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let region = std::env::var("DEJAVU_REGION")
            .or_else(|_| std::env::var("AWS_REGION"))
            .unwrap_or(defaults.region);

        Self {
            table: std::env::var("DEJAVU_TABLE").unwrap_or(defaults.table),
            region,
            endpoint: std::env::var("DEJAVU_ENDPOINT_URL").ok(),
            timeout: env_secs("DEJAVU_REMOTE_TIMEOUT_SECS", defaults.timeout),
            max_retries: env_parse("DEJAVU_REMOTE_MAX_RETRIES", defaults.max_retries),
            initial_interval: defaults.initial_interval,
            max_interval: defaults.max_interval,
        }
    }
}

impl RetryConfig {
    /// Load retry-scheduler configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            base_delay: env_secs("DEJAVU_RETRY_BASE_SECS", defaults.base_delay),
            max_delay: env_secs("DEJAVU_RETRY_MAX_SECS", defaults.max_delay),
            jitter: env_parse("DEJAVU_RETRY_JITTER", defaults.jitter),
            batch_size: env_parse("DEJAVU_RETRY_BATCH", defaults.batch_size),
            tick_interval: env_secs("DEJAVU_RETRY_TICK_SECS", defaults.tick_interval),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
