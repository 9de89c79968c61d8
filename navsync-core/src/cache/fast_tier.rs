//! In-process fast tier: a bounded map with least-recently-used batch eviction.
//!
//! Recency is an atomic stamp per slot so hits can be recorded while the
//! owning `RwLock` is only held for reading. Eviction and staleness are
//! independent: expired slots stay here until a read removes them or they
//! fall out through eviction.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::entry::{CacheEntry, DataType};

/// Outcome of `FastTier::insert_if_absent`.
#[derive(Debug)]
pub(crate) enum Backfill {
    Inserted { evicted: usize },
    /// A fresh entry was already present; it is returned and left in place.
    Kept(CacheEntry),
}

struct Slot {
    entry: CacheEntry,
    last_access: AtomicU64,
}

pub(crate) struct FastTier {
    slots: HashMap<String, Slot>,
    max_size: usize,
    eviction_target: usize,
}

impl FastTier {
    pub(crate) fn new(max_size: usize, eviction_target: usize) -> Self {
        Self {
            slots: HashMap::new(),
            max_size,
            eviction_target: eviction_target.min(max_size.saturating_sub(1)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn max_size(&self) -> usize {
        self.max_size
    }

    /// Look up a slot and mark it used at `stamp`.
    pub(crate) fn touch(&self, scoped_key: &str, stamp: u64) -> Option<&CacheEntry> {
        let slot = self.slots.get(scoped_key)?;
        slot.last_access.store(stamp, Ordering::Relaxed);
        Some(&slot.entry)
    }

    /// Look up a slot without changing its recency.
    pub(crate) fn peek(&self, scoped_key: &str) -> Option<&CacheEntry> {
        self.slots.get(scoped_key).map(|slot| &slot.entry)
    }

    /// Insert or replace. Returns how many slots were evicted to make room.
    pub(crate) fn insert(&mut self, scoped_key: String, entry: CacheEntry, stamp: u64) -> usize {
        let mut evicted = 0;
        if !self.slots.contains_key(&scoped_key) && self.slots.len() >= self.max_size {
            evicted = self.evict_to(self.eviction_target);
        }
        self.slots.insert(
            scoped_key,
            Slot {
                entry,
                last_access: AtomicU64::new(stamp),
            },
        );
        evicted
    }

    /// Insert only when the slot is empty or holds an entry stale at `now`.
    pub(crate) fn insert_if_absent(
        &mut self,
        scoped_key: String,
        entry: CacheEntry,
        stamp: u64,
        now: DateTime<Utc>,
    ) -> Backfill {
        if let Some(current) = self.touch(&scoped_key, stamp) {
            if current.is_fresh(now) {
                return Backfill::Kept(current.clone());
            }
        }
        Backfill::Inserted {
            evicted: self.insert(scoped_key, entry, stamp),
        }
    }

    pub(crate) fn remove(&mut self, scoped_key: &str) -> bool {
        self.slots.remove(scoped_key).is_some()
    }

    /// Drop every slot matching the optional key and data type filters.
    pub(crate) fn remove_matching(&mut self, key: Option<&str>, data_type: Option<DataType>) -> usize {
        let before = self.slots.len();
        match (key, data_type) {
            (None, None) => self.slots.clear(),
            (Some(k), Some(dt)) => {
                self.slots.remove(&dt.scoped_key(k));
            }
            _ => self.slots.retain(|_, slot| {
                let key_matches = key.map_or(true, |k| slot.entry.key == k);
                let type_matches = data_type.map_or(true, |dt| slot.entry.data_type == dt);
                !(key_matches && type_matches)
            }),
        }
        before - self.slots.len()
    }

    /// Evict least-recently-used slots until at most `target` remain.
    fn evict_to(&mut self, target: usize) -> usize {
        if self.slots.len() <= target {
            return 0;
        }
        let excess = self.slots.len() - target;
        let mut by_age: Vec<(u64, &String)> = self
            .slots
            .iter()
            .map(|(k, slot)| (slot.last_access.load(Ordering::Relaxed), k))
            .collect();
        if excess < by_age.len() {
            by_age.select_nth_unstable_by_key(excess - 1, |(stamp, _)| *stamp);
        }
        let victims: Vec<String> = by_age[..excess].iter().map(|(_, k)| (*k).clone()).collect();
        for key in &victims {
            self.slots.remove(key);
        }
        victims.len()
    }
}
