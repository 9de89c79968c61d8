//! CSV snapshot source, the usual fallback when the HTTP provider is down.
//!
//! The snapshot has a header row and one observation per line:
//!
//! ```text
//! key,date,value
//! F001,2024-01-02,101.25
//! F001,2024-01-03,101.40
//! ```
//!
//! Rows are grouped per key and sorted by date. Each key's payload is
//! `{"key": .., "source": "csv", "points": [{"date": .., "value": ..}, ..]}`.

use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::source::DataSource;
use crate::cache::Payload;
use crate::error::{ConfigError, FetchError};

#[derive(Debug, Deserialize)]
struct Row {
    key: String,
    date: NaiveDate,
    value: f64,
}

type Series = BTreeMap<NaiveDate, f64>;

pub struct CsvSource {
    path: Option<PathBuf>,
    series: RwLock<HashMap<String, Series>>,
}

impl CsvSource {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let series = load(csv::Reader::from_path(path)?)?;
        info!(path = %path.display(), keys = series.len(), "loaded CSV snapshot");
        Ok(Self {
            path: Some(path.to_path_buf()),
            series: RwLock::new(series),
        })
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let series = load(csv::Reader::from_reader(reader))?;
        Ok(Self {
            path: None,
            series: RwLock::new(series),
        })
    }

    /// Re-read the snapshot file. Sources built from a reader keep their data.
    pub fn reload(&self) -> Result<usize, ConfigError> {
        let Some(path) = &self.path else {
            return Ok(self.len());
        };
        let series = load(csv::Reader::from_path(path)?)?;
        let keys = series.len();
        *self.series.write() = series;
        info!(path = %path.display(), keys, "reloaded CSV snapshot");
        Ok(keys)
    }

    /// Number of distinct keys in the snapshot.
    pub fn len(&self) -> usize {
        self.series.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.series.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

fn load<R: Read>(mut reader: csv::Reader<R>) -> Result<HashMap<String, Series>, ConfigError> {
    let mut series: HashMap<String, Series> = HashMap::new();
    for (line, row) in reader.deserialize::<Row>().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                // Malformed rows are skipped, not fatal.
                warn!(line = line + 2, error = %e, "skipping malformed CSV row");
                continue;
            }
        };
        if !row.value.is_finite() {
            warn!(key = %row.key, date = %row.date, "skipping non-finite value");
            continue;
        }
        series.entry(row.key).or_default().insert(row.date, row.value);
    }
    Ok(series)
}

fn to_payload(key: &str, series: &Series) -> Payload {
    let points: Vec<Payload> = series
        .iter()
        .map(|(date, value)| json!({ "date": date.to_string(), "value": value }))
        .collect();
    json!({ "key": key, "source": "csv", "points": points })
}

impl DataSource for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(&self, key: &str) -> Result<Payload, FetchError> {
        self.series
            .read()
            .get(key)
            .map(|s| to_payload(key, s))
            .ok_or_else(|| FetchError::NotFound {
                key: key.to_string(),
            })
    }

    fn supports_bulk(&self) -> bool {
        true
    }

    fn fetch_many(&self, keys: &[String]) -> Result<HashMap<String, Payload>, FetchError> {
        let series = self.series.read();
        Ok(keys
            .iter()
            .filter_map(|k| series.get(k).map(|s| (k.clone(), to_payload(k, s))))
            .collect())
    }

    /// Local reads never touch the upstream limiter.
    fn rate_limited(&self) -> bool {
        false
    }
}
