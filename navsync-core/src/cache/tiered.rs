//! Two-tier cache: bounded in-process fast tier over a durable store.
//!
//! Reads degrade fast tier → durable tier → miss and never fail. A durable hit
//! is copied into the fast tier (backfill) with its expiry capped at the
//! fast-tier TTL. Writes always land in the fast tier; with `persist` they
//! are also written to the durable tier, whose failures are logged and
//! swallowed.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::durable::DurableStore;
use super::entry::{CacheEntry, DataType, EntrySource, Payload, StoredRecord, TtlPolicy};
use super::fast_tier::{Backfill, FastTier};
use crate::clock::{to_chrono, Clock, SystemClock};
use crate::config::CacheSettings;
use crate::error::ConfigError;

/// Counters since construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub fast_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub durable_write_failures: u64,
    pub durable_read_failures: u64,
    /// Current fast-tier entry count, expired entries included.
    pub size: usize,
    pub max_size: usize,
}

impl CacheStats {
    /// Fraction of lookups answered by either tier.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.fast_hits + self.durable_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    fast_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    durable_write_failures: AtomicU64,
    durable_read_failures: AtomicU64,
}

/// The two-tier cache.
pub struct TieredCache {
    fast: RwLock<FastTier>,
    durable: Arc<dyn DurableStore>,
    settings: CacheSettings,
    clock: Arc<dyn Clock>,
    access_seq: AtomicU64,
    counters: Counters,
}

impl TieredCache {
    pub fn new(settings: CacheSettings, durable: Arc<dyn DurableStore>) -> Result<Self, ConfigError> {
        Self::with_clock(settings, durable, Arc::new(SystemClock))
    }

    pub fn with_clock(
        settings: CacheSettings,
        durable: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            fast: RwLock::new(FastTier::new(
                settings.max_fast_tier_size,
                settings.eviction_target(),
            )),
            durable,
            settings,
            clock,
            access_seq: AtomicU64::new(0),
            counters: Counters::default(),
        })
    }

    pub fn ttl_policy(&self, data_type: DataType) -> TtlPolicy {
        self.settings.ttl_policy(data_type)
    }

    /// Cached value for `key`, or `None` on a miss.
    pub fn get(&self, key: &str, data_type: DataType) -> Option<Payload> {
        self.get_entry(key, data_type).map(|entry| entry.value)
    }

    /// Like `get`, but returns the whole entry including expiry and origin.
    pub fn get_entry(&self, key: &str, data_type: DataType) -> Option<CacheEntry> {
        let scoped = data_type.scoped_key(key);
        let now = self.clock.now();

        let found_expired = {
            let fast = self.fast.read();
            match fast.touch(&scoped, self.next_stamp()) {
                Some(entry) if entry.is_fresh(now) => {
                    self.counters.fast_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, %data_type, "fast tier hit");
                    return Some(entry.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if found_expired {
            let mut fast = self.fast.write();
            // A concurrent `set` may have refreshed it since the read lock dropped.
            if fast.peek(&scoped).is_some_and(|e| !e.is_fresh(now)) {
                fast.remove(&scoped);
                debug!(key, %data_type, "dropped stale fast tier entry");
            }
        }

        let record = match self.durable.get(&scoped) {
            Ok(Some(record)) if record.is_fresh(now) => record,
            Ok(_) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, %data_type, "cache miss");
                return None;
            }
            Err(e) => {
                self.counters.durable_read_failures.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key, %data_type, error = %e, "durable tier read failed, treating as miss");
                return None;
            }
        };

        let fast_limit = now + to_chrono(self.ttl_policy(data_type).fast);
        let entry = CacheEntry {
            key: key.to_string(),
            value: record.value,
            data_type,
            expires_at: record.expires_at.min(fast_limit),
            source: EntrySource::DurableTier,
        };
        // A `set` may have landed while the durable tier was being read.
        let stamp = self.next_stamp();
        let outcome = self.fast.write().insert_if_absent(scoped, entry.clone(), stamp, now);
        match outcome {
            Backfill::Inserted { evicted } => {
                self.record_evictions(evicted);
                self.counters.durable_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, %data_type, "durable tier hit, backfilled fast tier");
                Some(entry)
            }
            Backfill::Kept(current) => {
                self.counters.fast_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, %data_type, "fast tier refreshed during durable read, kept newer value");
                Some(current)
            }
        }
    }

    /// Write-through. The fast tier always takes the value; with `persist`
    /// the durable tier does too, and a durable failure only costs durability.
    pub fn set(&self, key: &str, value: Payload, data_type: DataType, persist: bool) {
        let scoped = data_type.scoped_key(key);
        let now = self.clock.now();
        let policy = self.ttl_policy(data_type);

        let record = persist.then(|| StoredRecord {
            key: key.to_string(),
            data_type,
            value: value.clone(),
            expires_at: now + to_chrono(policy.durable),
            stored_at: now,
        });

        self.insert_fast(
            scoped.clone(),
            CacheEntry {
                key: key.to_string(),
                value,
                data_type,
                expires_at: now + to_chrono(policy.fast),
                source: EntrySource::Upstream,
            },
        );

        if let Some(record) = record {
            if let Err(e) = self.durable.put(&scoped, &record) {
                self.counters.durable_write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key, %data_type, error = %e, "durable tier write failed, value kept in fast tier only");
            }
        }
    }

    /// Remove fast-tier entries matching the filters; no filters clears the
    /// tier. The durable tier is never touched.
    pub fn invalidate(&self, key: Option<&str>, data_type: Option<DataType>) -> usize {
        let removed = self.fast.write().remove_matching(key, data_type);
        debug!(?key, ?data_type, removed, "invalidated fast tier entries");
        removed
    }

    /// Current fast-tier entry count.
    pub fn len(&self) -> usize {
        self.fast.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let (size, max_size) = {
            let fast = self.fast.read();
            (fast.len(), fast.max_size())
        };
        CacheStats {
            fast_hits: self.counters.fast_hits.load(Ordering::Relaxed),
            durable_hits: self.counters.durable_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            durable_write_failures: self.counters.durable_write_failures.load(Ordering::Relaxed),
            durable_read_failures: self.counters.durable_read_failures.load(Ordering::Relaxed),
            size,
            max_size,
        }
    }

    fn insert_fast(&self, scoped: String, entry: CacheEntry) {
        let stamp = self.next_stamp();
        let evicted = self.fast.write().insert(scoped, entry, stamp);
        self.record_evictions(evicted);
    }

    fn record_evictions(&self, evicted: usize) {
        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(evicted, "fast tier batch eviction");
        }
    }

    fn next_stamp(&self) -> u64 {
        self.access_seq.fetch_add(1, Ordering::Relaxed)
    }
}
