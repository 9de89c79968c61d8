//! Serializable sync configuration.
//!
//! Loaded from TOML. Every section has defaults, so an empty file is a valid
//! configuration. `validate` is the single place that rejects malformed
//! values; `from_toml` and `from_file` always call it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{DataType, TtlPolicy};
use crate::error::ConfigError;

/// Longest interval any fractional `*_seconds` field accepts: one year.
pub const MAX_SECONDS: f64 = 365.0 * 86_400.0;

/// Validate a fractional seconds field. Zero is allowed only for waits and
/// delays, never for periods.
fn check_seconds(field: &str, value: f64, allow_zero: bool) -> Result<Duration, ConfigError> {
    // NaN fails both comparisons.
    let lower_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if !lower_ok || value > MAX_SECONDS {
        let lower = if allow_zero { "[0" } else { "(0" };
        return Err(ConfigError::invalid(
            field,
            format!("must be in {lower}, {MAX_SECONDS}], got {value}"),
        ));
    }
    Duration::try_from_secs_f64(value).map_err(|e| ConfigError::invalid(field, e.to_string()))
}

/// Accessor conversion for a field that may not have been validated.
/// Out-of-range values saturate to the accepted bounds instead of panicking.
fn saturating_secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_SECONDS)).unwrap_or(Duration::ZERO)
}

/// Complete configuration for the sync core.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Default settings for any limiter without an explicit entry.
    pub rate_limit: RateLimitSettings,
    /// Per-endpoint limiter overrides, keyed by limiter name.
    pub limiters: BTreeMap<String, RateLimitSettings>,
    pub fetch: FetchSettings,
    pub cache: CacheSettings,
    pub breaker: BreakerSettings,
    pub scheduler: SchedulerSettings,
    pub warmup: WarmupSettings,
    pub sources: SourceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_calls_per_period: u32,
    pub period_seconds: f64,
    /// Fail with `RateLimitTimeout` instead of waiting longer than this.
    pub max_wait_seconds: Option<f64>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_calls_per_period: 10,
            period_seconds: 1.0,
            max_wait_seconds: None,
        }
    }
}

impl RateLimitSettings {
    pub fn period(&self) -> Duration {
        saturating_secs(self.period_seconds)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_seconds.map(saturating_secs)
    }

    pub(crate) fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.max_calls_per_period == 0 {
            return Err(ConfigError::invalid(
                &format!("{field}.max_calls_per_period"),
                "must be at least 1",
            ));
        }
        check_seconds(&format!("{field}.period_seconds"), self.period_seconds, false)?;
        if let Some(wait) = self.max_wait_seconds {
            check_seconds(&format!("{field}.max_wait_seconds"), wait, true)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchSettings {
    /// Attempts per key, including the first.
    pub max_retries: u32,
    /// Linear backoff unit: attempt `n` waits `n * retry_delay_seconds`.
    pub retry_delay_seconds: f64,
    pub max_workers: usize,
    /// Name of the limiter every upstream call acquires.
    pub limiter: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_seconds: 1.0,
            max_workers: 5,
            limiter: "upstream".to_string(),
        }
    }
}

impl FetchSettings {
    pub fn retry_delay(&self) -> Duration {
        saturating_secs(self.retry_delay_seconds)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TtlSettings {
    pub fast_seconds: u64,
    pub durable_seconds: u64,
}

impl From<TtlSettings> for TtlPolicy {
    fn from(t: TtlSettings) -> Self {
        TtlPolicy {
            fast: Duration::from_secs(t.fast_seconds),
            durable: Duration::from_secs(t.durable_seconds),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    pub max_fast_tier_size: usize,
    /// Eviction shrinks the fast tier to `max_fast_tier_size * ratio`.
    pub eviction_target_ratio: f64,
    pub ttl: BTreeMap<DataType, TtlSettings>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_fast_tier_size: 10_000,
            eviction_target_ratio: 0.8,
            ttl: DataType::ALL
                .into_iter()
                .map(|dt| (dt, default_ttl(dt)))
                .collect(),
        }
    }
}

impl CacheSettings {
    /// Freshness windows for a data type, falling back to built-in defaults
    /// when the config file omits it.
    pub fn ttl_policy(&self, data_type: DataType) -> TtlPolicy {
        self.ttl
            .get(&data_type)
            .copied()
            .unwrap_or_else(|| default_ttl(data_type))
            .into()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_fast_tier_size == 0 {
            return Err(ConfigError::invalid(
                "cache.max_fast_tier_size",
                "must be at least 1",
            ));
        }
        let ratio = self.eviction_target_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::invalid(
                "cache.eviction_target_ratio",
                format!("must be in (0, 1], got {ratio}"),
            ));
        }
        for (data_type, ttl) in &self.ttl {
            if ttl.fast_seconds == 0 {
                return Err(ConfigError::invalid(
                    &format!("cache.ttl.{data_type}.fast_seconds"),
                    "must be at least 1",
                ));
            }
            if ttl.fast_seconds > ttl.durable_seconds {
                return Err(ConfigError::TtlOrdering {
                    data_type: data_type.to_string(),
                    fast_secs: ttl.fast_seconds,
                    durable_secs: ttl.durable_seconds,
                });
            }
        }
        Ok(())
    }

    /// Entry count eviction shrinks to.
    pub fn eviction_target(&self) -> usize {
        let target = (self.max_fast_tier_size as f64 * self.eviction_target_ratio).floor() as usize;
        target.min(self.max_fast_tier_size.saturating_sub(1))
    }
}

fn default_ttl(data_type: DataType) -> TtlSettings {
    let (fast_seconds, durable_seconds) = match data_type {
        DataType::LatestValue => (300, 3_600),
        DataType::History => (3_600, 86_400),
        DataType::Metadata => (21_600, 604_800),
        DataType::Indicator => (1_800, 43_200),
    };
    TtlSettings {
        fast_seconds,
        durable_seconds,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerSettings {
    pub enabled: bool,
    /// Consecutive failed attempts before the breaker opens.
    pub failure_threshold: u32,
    pub cooldown_seconds: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            cooldown_seconds: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_millis: u64,
    pub stop_timeout_seconds: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_millis: 1_000,
            stop_timeout_seconds: 5.0,
        }
    }
}

impl SchedulerSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn stop_timeout(&self) -> Duration {
        saturating_secs(self.stop_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WarmupSettings {
    pub max_workers: usize,
    pub parallel: bool,
}

impl Default for WarmupSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            parallel: true,
        }
    }
}

/// Upstream sources the CLI wires up. Library users may build sources
/// directly and ignore this section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceSettings {
    pub http: Option<HttpSettings>,
    /// CSV snapshot used as the fallback source.
    pub csv_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpSettings {
    /// Per-key URL; `{key}` is replaced with the percent-encoded key.
    pub url_template: String,
    /// Optional bulk URL; `{keys}` is replaced with comma-joined keys.
    pub bulk_url_template: Option<String>,
    pub timeout_seconds: f64,
    pub user_agent: String,
    /// Limiter the source acquires instead of `fetch.limiter`.
    pub limiter: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            url_template: String::new(),
            bulk_url_template: None,
            timeout_seconds: 30.0,
            user_agent: concat!("navsync/", env!("CARGO_PKG_VERSION")).to_string(),
            limiter: None,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        saturating_secs(self.timeout_seconds)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.url_template.contains("{key}") {
            return Err(ConfigError::invalid(
                "sources.http.url_template",
                "must contain a `{key}` placeholder",
            ));
        }
        if let Some(bulk) = &self.bulk_url_template {
            if !bulk.contains("{keys}") {
                return Err(ConfigError::invalid(
                    "sources.http.bulk_url_template",
                    "must contain a `{keys}` placeholder",
                ));
            }
        }
        check_seconds("sources.http.timeout_seconds", self.timeout_seconds, false)?;
        Ok(())
    }
}

impl SyncConfig {
    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Limiter settings for a name: explicit override or the default section.
    pub fn limiter_settings(&self, name: &str) -> &RateLimitSettings {
        self.limiters.get(name).unwrap_or(&self.rate_limit)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rate_limit.validate("rate_limit")?;
        for (name, settings) in &self.limiters {
            settings.validate(&format!("limiters.{name}"))?;
        }

        if self.fetch.max_retries == 0 {
            return Err(ConfigError::invalid("fetch.max_retries", "must be at least 1"));
        }
        check_seconds("fetch.retry_delay_seconds", self.fetch.retry_delay_seconds, true)?;
        if self.fetch.max_workers == 0 {
            return Err(ConfigError::invalid("fetch.max_workers", "must be at least 1"));
        }
        if self.fetch.limiter.is_empty() {
            return Err(ConfigError::invalid("fetch.limiter", "must not be empty"));
        }

        self.cache.validate()?;

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.scheduler.tick_millis == 0 {
            return Err(ConfigError::invalid("scheduler.tick_millis", "must be at least 1"));
        }
        check_seconds(
            "scheduler.stop_timeout_seconds",
            self.scheduler.stop_timeout_seconds,
            true,
        )?;
        if self.warmup.max_workers == 0 {
            return Err(ConfigError::invalid("warmup.max_workers", "must be at least 1"));
        }
        if let Some(http) = &self.sources.http {
            http.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SyncConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = SyncConfig::from_toml("").unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn parses_overrides_and_named_limiters() {
        let config = SyncConfig::from_toml(
            r#"
            [rate_limit]
            max_calls_per_period = 5
            period_seconds = 2.0

            [limiters.fund_nav]
            max_calls_per_period = 2
            period_seconds = 1.0
            max_wait_seconds = 0.5

            [fetch]
            max_retries = 4
            max_workers = 8

            [cache]
            max_fast_tier_size = 100

            [cache.ttl.history]
            fast_seconds = 60
            durable_seconds = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limit.max_calls_per_period, 5);
        assert_eq!(config.limiter_settings("fund_nav").max_calls_per_period, 2);
        assert_eq!(
            config.limiter_settings("fund_nav").max_wait(),
            Some(Duration::from_millis(500))
        );
        assert_eq!(config.limiter_settings("other").max_calls_per_period, 5);
        assert_eq!(config.fetch.max_retries, 4);
        assert_eq!(config.fetch.retry_delay_seconds, 1.0);
        assert_eq!(
            config.cache.ttl_policy(DataType::History).fast,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn rejects_non_positive_period() {
        let err = SyncConfig::from_toml("[rate_limit]\nperiod_seconds = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "rate_limit.period_seconds"));
    }

    #[test]
    fn oversized_seconds_are_errors_not_panics() {
        let cases = [
            ("[rate_limit]\nperiod_seconds = 1e30\n", "rate_limit.period_seconds"),
            (
                "[limiters.nav]\nmax_wait_seconds = 1e300\n",
                "limiters.nav.max_wait_seconds",
            ),
            ("[fetch]\nretry_delay_seconds = 1e30\n", "fetch.retry_delay_seconds"),
            (
                "[scheduler]\nstop_timeout_seconds = 1e30\n",
                "scheduler.stop_timeout_seconds",
            ),
            (
                "[sources.http]\nurl_template = \"https://x/{key}\"\ntimeout_seconds = 1e30\n",
                "sources.http.timeout_seconds",
            ),
            ("[fetch]\nretry_delay_seconds = -1.0\n", "fetch.retry_delay_seconds"),
            ("[rate_limit]\nperiod_seconds = inf\n", "rate_limit.period_seconds"),
            ("[rate_limit]\nperiod_seconds = nan\n", "rate_limit.period_seconds"),
        ];
        for (text, expected) in cases {
            match SyncConfig::from_toml(text) {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected, "{text}"),
                other => panic!("{text}: unexpected {other:?}"),
            }
        }
        // One year is the inclusive upper bound.
        let config = SyncConfig::from_toml("[rate_limit]\nperiod_seconds = 31536000.0\n").unwrap();
        assert_eq!(config.rate_limit.period(), Duration::from_secs(31_536_000));
    }

    #[test]
    fn accessors_saturate_on_unvalidated_values() {
        let settings = RateLimitSettings {
            period_seconds: 1e30,
            max_wait_seconds: Some(f64::NAN),
            ..RateLimitSettings::default()
        };
        assert_eq!(settings.period(), Duration::from_secs(31_536_000));
        assert_eq!(settings.max_wait(), Some(Duration::ZERO));
        let fetch = FetchSettings {
            retry_delay_seconds: -5.0,
            ..FetchSettings::default()
        };
        assert_eq!(fetch.retry_delay(), Duration::ZERO);
    }

    #[test]
    fn rejects_fast_ttl_longer_than_durable() {
        let err = SyncConfig::from_toml(
            "[cache.ttl.latest_value]\nfast_seconds = 100\ndurable_seconds = 10\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::TtlOrdering { .. }));
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = SyncConfig::default();
        config.fetch.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn eviction_target_is_below_capacity() {
        let mut settings = CacheSettings {
            max_fast_tier_size: 10,
            eviction_target_ratio: 1.0,
            ..CacheSettings::default()
        };
        assert_eq!(settings.eviction_target(), 9);
        settings.eviction_target_ratio = 0.5;
        assert_eq!(settings.eviction_target(), 5);
    }

    #[test]
    fn http_source_needs_key_placeholder() {
        let err = SyncConfig::from_toml(
            "[sources.http]\nurl_template = \"https://nav.example/api/fund\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("sources.http.url_template"));

        let config = SyncConfig::from_toml(
            "[sources]\ncsv_path = \"navs.csv\"\n[sources.http]\nurl_template = \"https://nav.example/api/{key}\"\n",
        )
        .unwrap();
        let http = config.sources.http.unwrap();
        assert_eq!(http.timeout(), Duration::from_secs(30));
        assert_eq!(config.sources.csv_path, Some(PathBuf::from("navs.csv")));
    }

    #[test]
    fn toml_roundtrip_keeps_ttl_table() {
        let config = SyncConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(SyncConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn example_config_parses() {
        let config = SyncConfig::from_toml(include_str!("../../navsync.example.toml")).unwrap();
        assert_eq!(config.limiter_settings("fund_nav").max_calls_per_period, 2);
        assert_eq!(
            config.sources.http.as_ref().and_then(|h| h.limiter.as_deref()),
            Some("fund_nav")
        );
    }
}
