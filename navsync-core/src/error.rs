//! Structured error types for the sync core.
//!
//! Only `ConfigError` and `RateLimitTimeout` are meant to reach the immediate
//! caller as hard errors. Everything else is isolated per key (batch fetches),
//! swallowed with a log line (durable writes) or recorded on task state
//! (scheduler, warmup).

use std::time::Duration;
use thiserror::Error;

/// Malformed configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("fast-tier TTL ({fast_secs}s) exceeds durable-tier TTL ({durable_secs}s) for data type '{data_type}'")]
    TtlOrdering {
        data_type: String,
        fast_secs: u64,
        durable_secs: u64,
    },

    #[error("read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("read CSV snapshot: {0}")]
    Csv(#[from] csv::Error),

    #[error("open durable store: {0}")]
    Store(#[from] StoreError),

    #[error("build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// A bounded rate-limiter wait was exceeded.
#[derive(Debug, Clone, Error)]
#[error("rate limiter '{limiter}' could not grant a slot within {max_wait:?}")]
pub struct RateLimitTimeout {
    pub limiter: String,
    pub max_wait: Duration,
}

/// A single failed call to an upstream source. Retried locally by the fetcher.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("key not found: {key}")]
    NotFound { key: String },

    #[error("response format changed: {0}")]
    ResponseFormat(String),

    #[error("provider has blocked requests (circuit breaker tripped)")]
    Blocked,

    #[error("fetch error: {0}")]
    Other(String),
}

/// Final per-key outcome of `BatchFetcher::fetch_single`.
#[derive(Debug, Clone, Error)]
pub enum KeyFailure {
    #[error("{last} (gave up after {attempts} attempts)")]
    ExhaustedRetries { attempts: u32, last: FetchError },

    #[error(transparent)]
    RateLimit(#[from] RateLimitTimeout),

    #[error("circuit breaker open, retry in {remaining:?}")]
    CircuitOpen { remaining: Duration },
}

/// Durable tier read/write failure. Logged and swallowed by the cache.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("durable store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("durable store serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("durable store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a scheduled or warmup task operation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<FetchError> for TaskError {
    fn from(e: FetchError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<KeyFailure> for TaskError {
    fn from(e: KeyFailure) -> Self {
        Self::new(e.to_string())
    }
}

/// Misuse of the scheduler or warmup API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("no task named '{0}'")]
    UnknownTask(String),

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
