//! Upstream source trait and progress reporting.
//!
//! `DataSource` abstracts over where records come from (HTTP provider, CSV
//! snapshot, synthetic generator) so the fetcher can swap primary and
//! fallback and tests can pass plain closures. Sources know nothing about
//! caching or rate limiting; the fetcher wraps both around them.

use std::collections::HashMap;

use crate::cache::Payload;
use crate::error::FetchError;

pub trait DataSource: Send + Sync {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Fetch one record.
    fn fetch(&self, key: &str) -> Result<Payload, FetchError>;

    /// Whether `fetch_many` is worth calling.
    fn supports_bulk(&self) -> bool {
        false
    }

    /// Fetch several records in one upstream call.
    ///
    /// The returned map may omit keys; the fetcher falls back to per-key
    /// fetches for those.
    fn fetch_many(&self, _keys: &[String]) -> Result<HashMap<String, Payload>, FetchError> {
        Err(FetchError::Other(format!("source '{}' has no bulk endpoint", self.name())))
    }

    /// Limiter this source's calls acquire. `None` uses the fetcher's default.
    fn limiter(&self) -> Option<&str> {
        None
    }

    /// `false` for local sources that should skip the limiter entirely.
    fn rate_limited(&self) -> bool {
        true
    }
}

impl<F> DataSource for F
where
    F: Fn(&str) -> Result<Payload, FetchError> + Send + Sync,
{
    fn name(&self) -> &str {
        "fn"
    }

    fn fetch(&self, key: &str) -> Result<Payload, FetchError> {
        self(key)
    }
}

/// Progress callback for batch fetches. Always invoked on the thread that
/// called the batch method, never from a pool worker.
pub trait FetchProgress {
    /// Called after each key completes, successfully or not.
    fn on_progress(&self, completed: usize, total: usize);

    /// Called with the outcome of each key.
    fn on_key(&self, _key: &str, _error: Option<&str>) {}
}

impl<F> FetchProgress for F
where
    F: Fn(usize, usize),
{
    fn on_progress(&self, completed: usize, total: usize) {
        self(completed, total)
    }
}
