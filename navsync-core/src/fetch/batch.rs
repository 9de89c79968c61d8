//! Parallel batch fetching with retry, fallback and write-through caching.
//!
//! Keys are fanned out over a private rayon pool of `max_workers` threads.
//! Each worker runs the per-key retry loop (breaker check, rate-limit
//! acquire, fetch, linear backoff) and sends its outcome back over a
//! channel; the calling thread writes successes through the cache, records
//! them and reports progress. One key failing never aborts the batch.

use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::circuit_breaker::CircuitBreaker;
use super::source::{DataSource, FetchProgress};
use crate::cache::{DataType, Payload, TieredCache};
use crate::config::{FetchSettings, SyncConfig};
use crate::error::{ConfigError, FetchError, KeyFailure};
use crate::limiter::RateLimiter;

/// Outcome of one batch call. Built fresh per call and not mutated after.
#[derive(Debug, Clone, Default)]
pub struct BatchFetchResult {
    pub results: HashMap<String, Payload>,
    /// Key → error description. For keys that failed both sources this is
    /// the primary source's error.
    pub errors: HashMap<String, String>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Keys served by the fallback source, sorted.
    pub fallback_used: Vec<String>,
    /// Keys answered from the cache without an upstream call.
    pub cache_hits: usize,
    pub duration_ms: u64,
}

impl BatchFetchResult {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }

    fn finish(mut self, started: Instant) -> Self {
        self.succeeded = self.results.len();
        self.failed = self.errors.len();
        self.fallback_used.sort();
        self.duration_ms = started.elapsed().as_millis() as u64;
        self
    }
}

/// Fetches keys from upstream sources through the limiter and into the cache.
pub struct BatchFetcher {
    settings: FetchSettings,
    limiter: Arc<RateLimiter>,
    cache: Arc<TieredCache>,
    breaker: Option<Arc<CircuitBreaker>>,
    pool: ThreadPool,
}

impl BatchFetcher {
    pub fn new(
        settings: FetchSettings,
        limiter: Arc<RateLimiter>,
        cache: Arc<TieredCache>,
    ) -> Result<Self, ConfigError> {
        if settings.max_workers == 0 {
            return Err(ConfigError::invalid("fetch.max_workers", "must be at least 1"));
        }
        if settings.max_retries == 0 {
            return Err(ConfigError::invalid("fetch.max_retries", "must be at least 1"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.max_workers)
            .thread_name(|i| format!("navsync-fetch-{i}"))
            .build()?;
        Ok(Self {
            settings,
            limiter,
            cache,
            breaker: None,
            pool,
        })
    }

    /// Fetcher configured from a full config, with a breaker when enabled.
    pub fn from_config(
        config: &SyncConfig,
        limiter: Arc<RateLimiter>,
        cache: Arc<TieredCache>,
    ) -> Result<Self, ConfigError> {
        let fetcher = Self::new(config.fetch.clone(), limiter, cache)?;
        Ok(if config.breaker.enabled {
            fetcher.with_breaker(Arc::new(CircuitBreaker::from_settings(&config.breaker)))
        } else {
            fetcher
        })
    }

    /// Guard primary-source attempts with a circuit breaker. Fallback
    /// attempts are never guarded.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Fetch one key with retries. Does not touch the cache.
    pub fn fetch_single(&self, source: &dyn DataSource, key: &str) -> Result<Payload, KeyFailure> {
        self.fetch_with_retry(source, key, self.breaker.as_deref())
    }

    /// Fetch every key from `source`, writing successes through the cache.
    pub fn fetch_batch(
        &self,
        keys: &[String],
        data_type: DataType,
        source: &dyn DataSource,
        progress: Option<&dyn FetchProgress>,
    ) -> BatchFetchResult {
        let started = Instant::now();
        let result = self.run_batch(keys, data_type, source, progress, self.breaker.as_deref());
        let result = result.finish(started);
        info!(
            source = source.name(),
            %data_type,
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            duration_ms = result.duration_ms,
            "batch fetch complete"
        );
        result
    }

    /// Primary batch, then one fallback batch over exactly the keys the
    /// primary failed. Keys that fail both keep the primary's error text.
    pub fn fetch_batch_with_fallback(
        &self,
        keys: &[String],
        data_type: DataType,
        primary: &dyn DataSource,
        fallback: Option<&dyn DataSource>,
    ) -> BatchFetchResult {
        let started = Instant::now();
        let result = self.primary_then_fallback(keys, data_type, primary, fallback);
        let result = result.finish(started);
        info!(
            primary = primary.name(),
            fallback = fallback.map(|f| f.name()),
            %data_type,
            total = result.total,
            succeeded = result.succeeded,
            failed = result.failed,
            fallback_used = result.fallback_used.len(),
            duration_ms = result.duration_ms,
            "batch fetch with fallback complete"
        );
        result
    }

    /// Serve what the cache already holds and fetch only the misses.
    pub fn fetch_missing(
        &self,
        keys: &[String],
        data_type: DataType,
        primary: &dyn DataSource,
        fallback: Option<&dyn DataSource>,
    ) -> BatchFetchResult {
        let started = Instant::now();
        let keys = dedupe(keys);
        let mut hits = HashMap::new();
        let mut misses = Vec::new();
        for key in keys {
            match self.cache.get(&key, data_type) {
                Some(value) => {
                    hits.insert(key, value);
                }
                None => misses.push(key),
            }
        }

        let mut result = if misses.is_empty() {
            BatchFetchResult::default()
        } else {
            self.primary_then_fallback(&misses, data_type, primary, fallback)
        };
        result.cache_hits = hits.len();
        result.total += hits.len();
        result.results.extend(hits);
        let result = result.finish(started);
        debug!(
            %data_type,
            cache_hits = result.cache_hits,
            fetched = result.total - result.cache_hits,
            "fetch_missing complete"
        );
        result
    }

    fn primary_then_fallback(
        &self,
        keys: &[String],
        data_type: DataType,
        primary: &dyn DataSource,
        fallback: Option<&dyn DataSource>,
    ) -> BatchFetchResult {
        let mut result = self.run_batch(keys, data_type, primary, None, self.breaker.as_deref());

        let Some(fallback) = fallback else {
            return result;
        };
        if result.errors.is_empty() {
            return result;
        }

        let mut failed: Vec<String> = result.errors.keys().cloned().collect();
        failed.sort();
        info!(
            count = failed.len(),
            fallback = fallback.name(),
            "retrying failed keys against fallback source"
        );

        let secondary = self.run_batch(&failed, data_type, fallback, None, None);
        for (key, value) in secondary.results {
            result.errors.remove(&key);
            result.fallback_used.push(key.clone());
            result.results.insert(key, value);
        }
        for (key, fallback_error) in &secondary.errors {
            // Primary error stays; the fallback's is only logged.
            debug!(key = %key, error = %fallback_error, "fallback also failed");
        }
        result
    }

    fn run_batch(
        &self,
        keys: &[String],
        data_type: DataType,
        source: &dyn DataSource,
        progress: Option<&dyn FetchProgress>,
        breaker: Option<&CircuitBreaker>,
    ) -> BatchFetchResult {
        let keys = dedupe(keys);
        let total = keys.len();
        let mut result = BatchFetchResult {
            total,
            ..BatchFetchResult::default()
        };
        if total == 0 {
            return result;
        }

        let mut completed = 0usize;
        let mut record = |result: &mut BatchFetchResult, key: String, outcome: Result<Payload, KeyFailure>| {
            completed += 1;
            match outcome {
                Ok(value) => {
                    self.cache.set(&key, value.clone(), data_type, true);
                    if let Some(p) = progress {
                        p.on_key(&key, None);
                    }
                    result.results.insert(key, value);
                }
                Err(failure) => {
                    let message = failure.to_string();
                    warn!(key = %key, source = source.name(), error = %message, "key fetch failed");
                    if let Some(p) = progress {
                        p.on_key(&key, Some(&message));
                    }
                    result.errors.insert(key, message);
                }
            }
            if let Some(p) = progress {
                p.on_progress(completed, total);
            }
        };

        let mut pending = keys;
        if let Some(bulk) = self.try_bulk(source, &pending, breaker) {
            let requested: HashSet<&String> = pending.iter().collect();
            let mut served = HashSet::new();
            for (key, value) in bulk {
                if requested.contains(&key) && !served.contains(&key) {
                    served.insert(key.clone());
                    record(&mut result, key, Ok(value));
                }
            }
            pending.retain(|k| !served.contains(k));
            debug!(served = served.len(), remaining = pending.len(), "bulk fetch applied");
        }

        if pending.is_empty() {
            return result;
        }

        let (tx, rx) = mpsc::channel::<(usize, Result<Payload, KeyFailure>)>();
        self.pool.in_place_scope(|scope| {
            for (index, key) in pending.iter().enumerate() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let outcome = self.fetch_with_retry(source, key, breaker);
                    // The receiver lives until every job has reported.
                    let _ = tx.send((index, outcome));
                });
            }
            drop(tx);

            for (index, outcome) in rx {
                record(&mut result, pending[index].clone(), outcome);
            }
        });

        result
    }

    /// One rate-limited `fetch_many` call, if the source supports it and the
    /// breaker allows. Any failure leaves every key to the per-key path.
    fn try_bulk(
        &self,
        source: &dyn DataSource,
        keys: &[String],
        breaker: Option<&CircuitBreaker>,
    ) -> Option<HashMap<String, Payload>> {
        if keys.len() < 2 || !source.supports_bulk() || breaker.is_some_and(|b| !b.is_allowed()) {
            return None;
        }
        if let Err(e) = self.acquire(source) {
            debug!(error = %e, "skipping bulk fetch");
            return None;
        }
        match source.fetch_many(keys) {
            Ok(map) => {
                if let Some(b) = breaker {
                    b.record_success();
                }
                Some(map)
            }
            Err(e) => {
                if let Some(b) = breaker {
                    Self::record_failure(b, &e);
                }
                warn!(source = source.name(), error = %e, "bulk fetch failed, falling back to per-key fetches");
                None
            }
        }
    }

    fn fetch_with_retry(
        &self,
        source: &dyn DataSource,
        key: &str,
        breaker: Option<&CircuitBreaker>,
    ) -> Result<Payload, KeyFailure> {
        let max_attempts = self.settings.max_retries;
        let mut last_error: Option<FetchError> = None;
        let mut attempts = 0u32;

        for attempt in 1..=max_attempts {
            if let Some(b) = breaker {
                if !b.is_allowed() {
                    // Keep the upstream error if we already have one.
                    return Err(match last_error {
                        Some(last) => KeyFailure::ExhaustedRetries {
                            attempts: attempt - 1,
                            last,
                        },
                        None => KeyFailure::CircuitOpen {
                            remaining: b.remaining_cooldown(),
                        },
                    });
                }
            }

            self.acquire(source)?;

            attempts = attempt;
            match source.fetch(key) {
                Ok(value) => {
                    if let Some(b) = breaker {
                        b.record_success();
                    }
                    if attempt > 1 {
                        debug!(key, attempt, "fetch succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    debug!(key, attempt, max_attempts, error = %e, "fetch attempt failed");
                    if let Some(b) = breaker {
                        Self::record_failure(b, &e);
                    }
                    let blocked = matches!(e, FetchError::Blocked);
                    last_error = Some(e);
                    if blocked {
                        break;
                    }
                    if attempt < max_attempts {
                        std::thread::sleep(self.settings.retry_delay() * attempt);
                    }
                }
            }
        }

        let last = last_error.unwrap_or_else(|| FetchError::Other("no attempts made".into()));
        Err(KeyFailure::ExhaustedRetries { attempts, last })
    }

    fn record_failure(breaker: &CircuitBreaker, error: &FetchError) {
        if matches!(error, FetchError::Blocked) {
            breaker.trip();
        } else {
            breaker.record_failure();
        }
    }

    fn acquire(&self, source: &dyn DataSource) -> Result<(), KeyFailure> {
        if !source.rate_limited() {
            return Ok(());
        }
        let name = source.limiter().unwrap_or(&self.settings.limiter);
        let window = self.limiter.limiter(name);
        match window.default_max_wait() {
            Some(bound) => window.acquire_timeout(bound)?,
            None => window.acquire(),
        }
        Ok(())
    }
}

/// Drop duplicate keys, keeping first-seen order.
fn dedupe(keys: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter()
        .filter(|k| seen.insert(k.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::config::{CacheSettings, RateLimitSettings};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fetcher_with(settings: FetchSettings) -> BatchFetcher {
        let limiter = Arc::new(
            RateLimiter::new(RateLimitSettings {
                max_calls_per_period: 1_000,
                period_seconds: 1.0,
                max_wait_seconds: None,
            })
            .unwrap(),
        );
        let cache = Arc::new(TieredCache::new(CacheSettings::default(), Arc::new(MemoryStore::new())).unwrap());
        BatchFetcher::new(settings, limiter, cache).unwrap()
    }

    fn fetcher() -> BatchFetcher {
        fetcher_with(FetchSettings {
            max_retries: 3,
            retry_delay_seconds: 0.0,
            max_workers: 4,
            limiter: "test".into(),
        })
    }

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("F{i:03}")).collect()
    }

    fn ok_source(key: &str) -> Result<Payload, FetchError> {
        Ok(json!({ "key": key }))
    }

    #[test]
    fn fetch_single_retries_then_succeeds() {
        let f = fetcher();
        let calls = AtomicUsize::new(0);
        let flaky = |key: &str| -> Result<Payload, FetchError> {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(FetchError::NetworkUnreachable("reset".into()))
            } else {
                Ok(json!(key))
            }
        };
        assert_eq!(f.fetch_single(&flaky, "F001").unwrap(), json!("F001"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn fetch_single_returns_last_error_after_max_retries() {
        let f = fetcher();
        let calls = AtomicUsize::new(0);
        let failing = |_: &str| -> Result<Payload, FetchError> {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Other(format!("attempt {n}")))
        };
        let err = f.fetch_single(&failing, "F001").unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            KeyFailure::ExhaustedRetries { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.to_string(), "fetch error: attempt 2");
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[test]
    fn backoff_is_linear_in_attempt_number() {
        let f = fetcher_with(FetchSettings {
            max_retries: 3,
            retry_delay_seconds: 0.05,
            max_workers: 1,
            limiter: "test".into(),
        });
        let failing = |_: &str| -> Result<Payload, FetchError> { Err(FetchError::Other("x".into())) };
        let start = Instant::now();
        assert!(f.fetch_single(&failing, "F001").is_err());
        // 0.05 * 1 + 0.05 * 2, and no sleep after the final attempt.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_millis(250));
    }

    #[test]
    fn batch_writes_through_and_reports_progress() {
        let f = fetcher();
        let seen = Mutex::new(Vec::new());
        let progress = |done: usize, total: usize| seen.lock().push((done, total));
        let ks = keys(10);

        let result = f.fetch_batch(&ks, DataType::History, &ok_source, Some(&progress));

        assert_eq!(result.total, 10);
        assert_eq!(result.succeeded, 10);
        assert!(result.all_succeeded());
        for k in &ks {
            assert_eq!(f.cache().get(k, DataType::History), Some(json!({ "key": k })));
        }
        let seen = seen.lock();
        assert_eq!(seen.len(), 10);
        assert_eq!(seen.last(), Some(&(10, 10)));
    }

    #[test]
    fn batch_isolates_per_key_failures() {
        let f = fetcher();
        let source = |key: &str| -> Result<Payload, FetchError> {
            if key.ends_with('3') {
                Err(FetchError::NotFound { key: key.into() })
            } else {
                Ok(json!(key))
            }
        };
        let result = f.fetch_batch(&keys(10), DataType::LatestValue, &source, None);
        assert_eq!(result.succeeded, 9);
        assert_eq!(result.failed, 1);
        assert!(result.errors["F003"].contains("key not found: F003"));
        assert!(f.cache().get("F003", DataType::LatestValue).is_none());
    }

    #[test]
    fn duplicate_keys_fetch_once() {
        let f = fetcher();
        let calls = AtomicUsize::new(0);
        let source = |key: &str| -> Result<Payload, FetchError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!(key))
        };
        let ks = vec!["A".to_string(), "B".to_string(), "A".to_string()];
        let result = f.fetch_batch(&ks, DataType::History, &source, None);
        assert_eq!(result.total, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_batch_is_empty_result() {
        let f = fetcher();
        let result = f.fetch_batch(&[], DataType::History, &ok_source, None);
        assert_eq!(result.total, 0);
        assert!(result.all_succeeded());
        assert_eq!(result.success_rate(), 1.0);
    }

    #[test]
    fn fallback_recovers_failed_keys() {
        let f = fetcher();
        let primary = |_: &str| -> Result<Payload, FetchError> {
            Err(FetchError::NetworkUnreachable("primary down".into()))
        };
        let fallback = |key: &str| -> Result<Payload, FetchError> { Ok(json!({ "csv": key })) };
        let result = f.fetch_batch_with_fallback(&keys(5), DataType::History, &primary, Some(&fallback));
        assert!(result.errors.is_empty());
        assert_eq!(result.results.len(), 5);
        assert_eq!(result.fallback_used, keys(5));
        assert_eq!(f.cache().get("F002", DataType::History), Some(json!({ "csv": "F002" })));
    }

    #[test]
    fn double_failure_reports_primary_error() {
        let f = fetcher();
        let primary = |_: &str| -> Result<Payload, FetchError> {
            Err(FetchError::NetworkUnreachable("primary down".into()))
        };
        let fallback = |_: &str| -> Result<Payload, FetchError> { Err(FetchError::Other("csv missing".into())) };
        let result = f.fetch_batch_with_fallback(&keys(4), DataType::History, &primary, Some(&fallback));
        assert!(result.results.is_empty());
        assert_eq!(result.failed, 4);
        for message in result.errors.values() {
            assert!(message.contains("primary down"), "got: {message}");
            assert!(!message.contains("csv missing"));
        }
    }

    #[test]
    fn fallback_only_sees_failed_keys() {
        let f = fetcher();
        let primary = |key: &str| -> Result<Payload, FetchError> {
            if key == "F001" {
                Err(FetchError::Other("nope".into()))
            } else {
                Ok(json!(key))
            }
        };
        let asked = Mutex::new(Vec::new());
        let fallback = |key: &str| -> Result<Payload, FetchError> {
            asked.lock().push(key.to_string());
            Ok(json!("fb"))
        };
        let result = f.fetch_batch_with_fallback(&keys(3), DataType::History, &primary, Some(&fallback));
        assert_eq!(*asked.lock(), vec!["F001".to_string()]);
        assert_eq!(result.results["F001"], json!("fb"));
        assert_eq!(result.results["F000"], json!("F000"));
    }

    #[test]
    fn fetch_missing_skips_cached_keys() {
        let f = fetcher();
        f.cache().set("F000", json!("cached"), DataType::Metadata, false);
        let calls = AtomicUsize::new(0);
        let source = |key: &str| -> Result<Payload, FetchError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!(key))
        };
        let result = f.fetch_missing(&keys(3), DataType::Metadata, &source, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.cache_hits, 1);
        assert_eq!(result.total, 3);
        assert_eq!(result.succeeded, 3);
        assert_eq!(result.results["F000"], json!("cached"));
    }

    #[test]
    fn open_breaker_short_circuits_primary_but_not_fallback() {
        let f = fetcher().with_breaker(Arc::new(CircuitBreaker::new(1, Duration::from_secs(60))));
        let calls = AtomicUsize::new(0);
        let blocked = |_: &str| -> Result<Payload, FetchError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Blocked)
        };
        // First batch trips the breaker.
        let first = f.fetch_batch(&["F000".to_string()], DataType::History, &blocked, None);
        assert_eq!(first.failed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let result = f.fetch_batch_with_fallback(&keys(3), DataType::History, &blocked, Some(&ok_source));
        // No further primary calls while open.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.succeeded, 3);
    }

    struct BulkSource {
        bulk_calls: AtomicUsize,
        single_calls: AtomicUsize,
    }

    impl DataSource for BulkSource {
        fn name(&self) -> &str {
            "bulk"
        }

        fn fetch(&self, key: &str) -> Result<Payload, FetchError> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "single": key }))
        }

        fn supports_bulk(&self) -> bool {
            true
        }

        fn fetch_many(&self, keys: &[String]) -> Result<HashMap<String, Payload>, FetchError> {
            self.bulk_calls.fetch_add(1, Ordering::SeqCst);
            // Serves everything except the last key.
            Ok(keys[..keys.len() - 1]
                .iter()
                .map(|k| (k.clone(), json!({ "bulk": k })))
                .collect())
        }
    }

    #[test]
    fn bulk_fetch_is_used_and_gaps_fall_back_to_single() {
        let f = fetcher();
        let source = BulkSource {
            bulk_calls: AtomicUsize::new(0),
            single_calls: AtomicUsize::new(0),
        };
        let result = f.fetch_batch(&keys(4), DataType::History, &source, None);
        assert_eq!(result.succeeded, 4);
        assert_eq!(source.bulk_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.single_calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.results["F003"], json!({ "single": "F003" }));
        assert_eq!(result.results["F000"], json!({ "bulk": "F000" }));
    }

    #[test]
    fn rate_limit_timeout_is_reported_per_key() {
        let mut config = SyncConfig::default();
        config.fetch.limiter = "tight".into();
        config.fetch.retry_delay_seconds = 0.0;
        config.limiters.insert(
            "tight".into(),
            RateLimitSettings {
                max_calls_per_period: 1,
                period_seconds: 10.0,
                max_wait_seconds: Some(0.05),
            },
        );
        config.breaker.enabled = false;
        let limiter = Arc::new(RateLimiter::from_config(&config).unwrap());
        let cache = Arc::new(TieredCache::new(CacheSettings::default(), Arc::new(MemoryStore::new())).unwrap());
        let f = BatchFetcher::from_config(&config, limiter, cache).unwrap();

        let result = f.fetch_batch(&keys(2), DataType::History, &ok_source, None);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        let message = result.errors.values().next().unwrap();
        assert!(message.contains("could not grant a slot"), "got: {message}");
    }
}
