//! Ready-made task operation that refreshes a fixed key set.

use std::sync::Arc;
use tracing::warn;

use super::task::TaskOperation;
use crate::cache::DataType;
use crate::error::TaskError;
use crate::fetch::{BatchFetcher, DataSource};

/// Refreshes `keys` through the fetcher with primary/fallback sources.
///
/// The run fails only when every key failed; partial failures are logged
/// and the refreshed count is returned.
pub struct RefreshTask {
    fetcher: Arc<BatchFetcher>,
    keys: Vec<String>,
    data_type: DataType,
    primary: Arc<dyn DataSource>,
    fallback: Option<Arc<dyn DataSource>>,
    missing_only: bool,
}

impl RefreshTask {
    pub fn new(
        fetcher: Arc<BatchFetcher>,
        keys: Vec<String>,
        data_type: DataType,
        primary: Arc<dyn DataSource>,
    ) -> Self {
        Self {
            fetcher,
            keys,
            data_type,
            primary,
            fallback: None,
            missing_only: false,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn DataSource>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Only fetch keys the cache cannot serve. Suits warmup, where the
    /// durable tier may already hold fresh data from a previous process.
    pub fn missing_only(mut self) -> Self {
        self.missing_only = true;
        self
    }
}

impl TaskOperation for RefreshTask {
    fn run(&self) -> Result<usize, TaskError> {
        let fallback = self.fallback.as_deref();
        let result = if self.missing_only {
            self.fetcher
                .fetch_missing(&self.keys, self.data_type, self.primary.as_ref(), fallback)
        } else {
            self.fetcher
                .fetch_batch_with_fallback(&self.keys, self.data_type, self.primary.as_ref(), fallback)
        };

        if result.total > 0 && result.succeeded == 0 {
            let mut failed: Vec<(&String, &String)> = result.errors.iter().collect();
            failed.sort();
            let (key, error) = failed[0];
            return Err(TaskError::new(format!(
                "all {} keys failed ({key}: {error})",
                result.total
            )));
        }
        if result.failed > 0 {
            warn!(
                data_type = %self.data_type,
                failed = result.failed,
                total = result.total,
                "refresh completed with failures"
            );
        }
        Ok(result.succeeded)
    }
}
