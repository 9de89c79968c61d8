//! NavSync Core: data synchronization for slow, rate-limited upstream providers.
//!
//! This crate provides:
//! - Named sliding-window rate limiters
//! - A two-tier cache (bounded LRU fast tier over a durable store)
//! - A parallel batch fetcher with retry, circuit breaker and fallback source
//! - An interval scheduler and a one-shot prioritized warmup
//! - Upstream sources: HTTP JSON, CSV snapshot, synthetic generator
//! - `SyncCore`, which wires all of the above from one `SyncConfig`

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod limiter;
pub mod schedule;
pub mod sync_core;

pub use cache::{
    CacheEntry, CacheStats, DataType, DurableStore, EntrySource, FileStore, MemoryStore, Payload,
    StoredRecord, TieredCache, TtlPolicy,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BreakerSettings, CacheSettings, FetchSettings, HttpSettings, RateLimitSettings,
    SchedulerSettings, SourceSettings, SyncConfig, TtlSettings, WarmupSettings,
};
pub use error::{
    ConfigError, FetchError, KeyFailure, RateLimitTimeout, SchedulerError, StoreError, TaskError,
};
pub use fetch::{
    BatchFetchResult, BatchFetcher, BreakerState, CircuitBreaker, CsvSource, DataSource,
    FetchProgress, HttpSource, SyntheticSource,
};
pub use limiter::{LimiterStats, RateLimiter, SlidingWindow};
pub use schedule::{
    FetchTask, RefreshTask, ScheduledTask, Scheduler, TaskOperation, TaskPhase, Warmup,
    WarmupReport, WarmupResult, WarmupStatus,
};
pub use sync_core::SyncCore;
