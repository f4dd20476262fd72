//! Configuration management.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Worker pool configuration
    #[serde(default)]
    pub pools: PoolsConfig,

    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Grouping configuration
    #[serde(default)]
    pub grouping: GroupingConfig,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolsConfig {
    /// One-time job executor pool
    #[serde(default)]
    pub one_time: OneTimePoolConfig,

    /// Repetitive job scheduler pool
    #[serde(default)]
    pub scheduler: SchedulerPoolConfig,
}

/// Queue discipline for the one-time executor pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// Fixed-capacity queue; submissions beyond it are rejected
    Bounded,
    /// No queue; a job is accepted only if a worker is free
    Synchronous,
    /// Queue without a capacity bound
    Unbounded,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OneTimePoolConfig {
    /// Core worker count (reported, not enforced separately from max)
    #[serde(default = "default_core_size")]
    pub core_size: usize,

    /// Maximum concurrent workers
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Idle keep-alive reported in pool snapshots
    #[serde(with = "humantime_serde", default = "default_keep_alive")]
    pub keep_alive: Duration,

    /// Queue discipline
    #[serde(default = "default_queue_kind")]
    pub queue_kind: QueueKind,

    /// Queue capacity (used when queue_kind is bounded)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long shutdown waits for in-flight jobs
    #[serde(with = "humantime_serde", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,
}

impl Default for OneTimePoolConfig {
    fn default() -> Self {
        Self {
            core_size: default_core_size(),
            max_size: default_max_size(),
            keep_alive: default_keep_alive(),
            queue_kind: default_queue_kind(),
            queue_capacity: default_queue_capacity(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerPoolConfig {
    /// Concurrent tick executions across all repetitive jobs
    #[serde(default = "default_scheduler_workers")]
    pub workers: usize,
}

impl Default for SchedulerPoolConfig {
    fn default() -> Self {
        Self {
            workers: default_scheduler_workers(),
        }
    }
}

/// Token bucket shape for one admission dimension.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitSpec {
    /// Bucket capacity in tokens
    pub capacity: f64,

    /// Tokens restored per minute
    pub refill_per_minute: f64,
}

impl RateLimitSpec {
    pub const fn per_minute(rate: f64) -> Self {
        Self {
            capacity: rate,
            refill_per_minute: rate,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Master switch; when false every check passes
    #[serde(default = "default_admission_enabled")]
    pub enabled: bool,

    /// Fallback limit for dimensions without a dedicated spec
    #[serde(default = "default_rate_default")]
    pub default: RateLimitSpec,

    /// Per-IP and per-identity limit for one-time submissions
    #[serde(default = "default_rate_one_time")]
    pub one_time: RateLimitSpec,

    /// Per-IP and per-identity limit for repetitive submissions
    #[serde(default = "default_rate_repetitive")]
    pub repetitive: RateLimitSpec,

    /// Per-tier user limits keyed by tier name
    #[serde(default = "default_tiers")]
    pub tiers: HashMap<String, RateLimitSpec>,

    /// Bucket cache bound per dimension
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Idle buckets older than this are evicted
    #[serde(with = "humantime_serde", default = "default_idle_eviction")]
    pub idle_eviction: Duration,

    /// Sweep interval for the eviction task
    #[serde(with = "humantime_serde", default = "default_cleanup_interval")]
    pub cleanup_interval: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: default_admission_enabled(),
            default: default_rate_default(),
            one_time: default_rate_one_time(),
            repetitive: default_rate_repetitive(),
            tiers: default_tiers(),
            cache_max_entries: default_cache_max_entries(),
            idle_eviction: default_idle_eviction(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupingConfig {
    /// Buffer window applied when a request does not carry one
    #[serde(default = "default_group_buffer_ms")]
    pub default_buffer_ms: u64,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            default_buffer_ms: default_group_buffer_ms(),
        }
    }
}

/// Per-kind override for retry settings.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RetryOverride {
    /// Override the master enabled switch for this kind
    pub enabled: Option<bool>,

    /// Override the attempt ceiling for this kind
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Master switch; when false nothing is ever retried
    #[serde(default = "default_retry_enabled")]
    pub enabled: bool,

    /// Attempt ceiling counted across retries of one job
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Exponential backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Backoff ceiling
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter factor in [0, 1]; 0.1 spreads delays by +/-10%
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    /// Due-retry sweep interval
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Error kinds eligible for retry
    #[serde(default = "default_retryable_kinds")]
    pub retryable_kinds: Vec<String>,

    /// Error kinds never retried; takes precedence over retryable_kinds
    #[serde(default = "default_non_retryable_kinds")]
    pub non_retryable_kinds: Vec<String>,

    /// Overrides applied to one-time jobs
    #[serde(default)]
    pub one_time: RetryOverride,

    /// Overrides applied to repetitive jobs
    #[serde(default)]
    pub repetitive: RetryOverride,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: default_retry_enabled(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
            sweep_interval_ms: default_sweep_interval_ms(),
            retryable_kinds: default_retryable_kinds(),
            non_retryable_kinds: default_non_retryable_kinds(),
            one_time: RetryOverride::default(),
            repetitive: RetryOverride::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Install the Prometheus recorder
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_core_size() -> usize { 5 }
fn default_max_size() -> usize { 20 }
fn default_keep_alive() -> Duration { Duration::from_secs(60) }
fn default_queue_kind() -> QueueKind { QueueKind::Bounded }
fn default_queue_capacity() -> usize { 100 }
fn default_shutdown_grace() -> Duration { Duration::from_secs(60) }
fn default_scheduler_workers() -> usize { 5 }
fn default_admission_enabled() -> bool { true }
fn default_rate_default() -> RateLimitSpec { RateLimitSpec::per_minute(60.0) }
fn default_rate_one_time() -> RateLimitSpec { RateLimitSpec::per_minute(30.0) }
fn default_rate_repetitive() -> RateLimitSpec { RateLimitSpec::per_minute(20.0) }
fn default_tiers() -> HashMap<String, RateLimitSpec> {
    HashMap::from([
        ("free".to_string(), RateLimitSpec::per_minute(10.0)),
        ("premium".to_string(), RateLimitSpec::per_minute(50.0)),
        ("enterprise".to_string(), RateLimitSpec::per_minute(200.0)),
    ])
}
fn default_cache_max_entries() -> usize { 10_000 }
fn default_idle_eviction() -> Duration { Duration::from_secs(600) }
fn default_cleanup_interval() -> Duration { Duration::from_secs(60) }
fn default_group_buffer_ms() -> u64 { 5_000 }
fn default_retry_enabled() -> bool { true }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_delay_ms() -> u64 { 1_000 }
fn default_backoff_multiplier() -> f64 { 2.0 }
fn default_max_delay_ms() -> u64 { 30_000 }
fn default_jitter_factor() -> f64 { 0.1 }
fn default_sweep_interval_ms() -> u64 { 5_000 }
fn default_retryable_kinds() -> Vec<String> {
    vec![
        "runtime".to_string(),
        "transient".to_string(),
        "io".to_string(),
        "timeout".to_string(),
    ]
}
fn default_non_retryable_kinds() -> Vec<String> {
    vec!["validation".to_string(), "security".to_string()]
}
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_enabled() -> bool { true }

impl Config {
    /// Load configuration: environment (`FOREMAN__` prefixed) layered over
    /// an optional `foreman.toml` in the working directory.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_layered("foreman")
    }

    /// Load from a specific file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("FOREMAN").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    fn load_layered(base: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(base).required(false))
            .add_source(config::Environment::with_prefix("FOREMAN").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
