//! Cache records and the data-type tags that drive freshness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Opaque serialized record as produced by an upstream source.
pub type Payload = serde_json::Value;

/// Kind of record, which decides how long a cached copy stays fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Most recent NAV / quote for a fund.
    LatestValue,
    /// Full NAV history.
    History,
    /// Fund descriptors (name, manager, fees).
    Metadata,
    /// Performance indicators (returns, drawdown, sharpe).
    Indicator,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::LatestValue,
        DataType::History,
        DataType::Metadata,
        DataType::Indicator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::LatestValue => "latest_value",
            DataType::History => "history",
            DataType::Metadata => "metadata",
            DataType::Indicator => "indicator",
        }
    }

    /// Key used in both tiers: `{data_type}:{key}`.
    pub fn scoped_key(&self, key: &str) -> String {
        format!("{}:{key}", self.as_str())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|dt| dt.as_str() == s)
            .ok_or_else(|| format!("unknown data type '{s}'"))
    }
}

/// Freshness windows for one data type. `fast <= durable` always holds for
/// policies produced by a validated `SyncConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    pub fast: Duration,
    pub durable: Duration,
}

/// Which tier or provider produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// Written through after an upstream fetch.
    Upstream,
    /// Copied into the fast tier from a durable read.
    DurableTier,
}

/// A cached value as seen by callers of `TieredCache::get_entry`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Payload,
    pub data_type: DataType,
    pub expires_at: DateTime<Utc>,
    pub source: EntrySource,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// What the durable tier stores per scoped key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: String,
    pub data_type: DataType,
    pub value: Payload,
    pub expires_at: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_parses_its_own_name() {
        for dt in DataType::ALL {
            assert_eq!(dt.as_str().parse::<DataType>().unwrap(), dt);
        }
        assert!("nav".parse::<DataType>().is_err());
    }

    #[test]
    fn scoped_keys_do_not_collide_across_types() {
        assert_ne!(
            DataType::History.scoped_key("F001"),
            DataType::Metadata.scoped_key("F001")
        );
    }

    #[test]
    fn data_type_serializes_snake_case() {
        let json = serde_json::to_string(&DataType::LatestValue).unwrap();
        assert_eq!(json, "\"latest_value\"");
    }
}
