//! Explicit wiring of the sync components from one config.
//!
//! Build a `SyncCore` once at process start and share it. Nothing here is
//! global; dropping the core stops its scheduler.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::{DataType, DurableStore, FileStore, TieredCache};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{ConfigError, SchedulerError};
use crate::fetch::{BatchFetcher, DataSource};
use crate::limiter::RateLimiter;
use crate::schedule::{FetchTask, RefreshTask, Scheduler, Warmup, WarmupReport};

pub struct SyncCore {
    config: SyncConfig,
    limiter: Arc<RateLimiter>,
    cache: Arc<TieredCache>,
    fetcher: Arc<BatchFetcher>,
    scheduler: Scheduler,
    warmup: Warmup,
}

impl SyncCore {
    pub fn new(config: SyncConfig, durable: Arc<dyn DurableStore>) -> Result<Self, ConfigError> {
        Self::with_clock(config, durable, Arc::new(SystemClock))
    }

    /// Core backed by a `FileStore` under `dir`.
    pub fn open(config: SyncConfig, dir: &Path) -> Result<Self, ConfigError> {
        let store = FileStore::open(dir)?;
        Self::new(config, Arc::new(store))
    }

    pub fn with_clock(
        config: SyncConfig,
        durable: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let limiter = Arc::new(RateLimiter::from_config(&config)?);
        let cache = Arc::new(TieredCache::with_clock(
            config.cache.clone(),
            durable,
            Arc::clone(&clock),
        )?);
        let fetcher = Arc::new(BatchFetcher::from_config(
            &config,
            Arc::clone(&limiter),
            Arc::clone(&cache),
        )?);
        let scheduler = Scheduler::with_clock(config.scheduler.clone(), clock);
        let warmup = Warmup::new(config.warmup.clone())?;

        info!(
            limiter = %config.fetch.limiter,
            workers = config.fetch.max_workers,
            fast_tier = config.cache.max_fast_tier_size,
            breaker = config.breaker.enabled,
            "sync core initialised"
        );
        Ok(Self {
            config,
            limiter,
            cache,
            fetcher,
            scheduler,
            warmup,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn fetcher(&self) -> &Arc<BatchFetcher> {
        &self.fetcher
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn warmup(&self) -> &Warmup {
        &self.warmup
    }

    /// A refresh operation over this core's fetcher.
    pub fn refresh_task(
        &self,
        keys: Vec<String>,
        data_type: DataType,
        primary: Arc<dyn DataSource>,
        fallback: Option<Arc<dyn DataSource>>,
    ) -> RefreshTask {
        let task = RefreshTask::new(Arc::clone(&self.fetcher), keys, data_type, primary);
        match fallback {
            Some(fallback) => task.with_fallback(fallback),
            None => task,
        }
    }

    /// Register the same key set for warmup (cache-first) and for periodic
    /// refresh. The scheduled refresh is delayed one interval, since warmup
    /// covers the first fill.
    #[allow(clippy::too_many_arguments)]
    pub fn track(
        &self,
        name: &str,
        priority: i32,
        interval: Duration,
        keys: Vec<String>,
        data_type: DataType,
        primary: Arc<dyn DataSource>,
        fallback: Option<Arc<dyn DataSource>>,
    ) -> Result<(), SchedulerError> {
        let warm = self
            .refresh_task(keys.clone(), data_type, Arc::clone(&primary), fallback.clone())
            .missing_only();
        self.warmup.register_task(FetchTask::new(name, priority, warm))?;
        let refresh = self.refresh_task(keys, data_type, primary, fallback);
        self.scheduler.register_task_delayed(name, interval, refresh)
    }

    /// Run warmup, then start the background scheduler.
    pub fn start(&self) -> Result<WarmupReport, SchedulerError> {
        let report = self.warmup.run();
        self.scheduler.start()?;
        Ok(report)
    }

    /// Stop the scheduler. Returns whether the loop exited within its bound.
    pub fn shutdown(&self) -> bool {
        self.scheduler.stop()
    }
}
