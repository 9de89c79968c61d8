//! Deterministic synthetic NAV source for demos, benchmarks and tests.
//!
//! Each key seeds its own RNG from a BLAKE3 hash of `(seed, key)`, so a key's
//! series is identical across runs and independent of fetch order or thread
//! count. Optional latency and failure injection exercise the fetcher's retry
//! and fallback paths without a network.

use chrono::{Days, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::source::DataSource;
use crate::cache::Payload;
use crate::error::FetchError;

#[derive(Debug, Clone)]
pub struct SyntheticSource {
    seed: u64,
    points: usize,
    start: NaiveDate,
    latency: Duration,
    failure_rate: f64,
    calls: std::sync::Arc<AtomicU64>,
}

impl SyntheticSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            points: 30,
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or(NaiveDate::MIN),
            latency: Duration::ZERO,
            failure_rate: 0.0,
            calls: Default::default(),
        }
    }

    /// Observations per key.
    pub fn with_points(mut self, points: usize) -> Self {
        self.points = points.max(1);
        self
    }

    /// Simulated per-call latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fraction of calls, in `[0, 1]`, that fail with `NetworkUnreachable`.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Total `fetch` calls served or failed so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn key_seed(&self, key: &str) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(key.as_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    /// The series for a key: a multiplicative random walk starting near 100.
    pub fn series(&self, key: &str) -> Payload {
        let mut rng = StdRng::seed_from_u64(self.key_seed(key));
        let mut nav = 50.0 + rng.gen::<f64>() * 100.0;
        let points: Vec<Payload> = (0..self.points)
            .map(|i| {
                nav *= 1.0 + rng.gen_range(-0.02..0.02);
                let date = self
                    .start
                    .checked_add_days(Days::new(i as u64))
                    .unwrap_or(self.start);
                json!({ "date": date.to_string(), "value": (nav * 10_000.0).round() / 10_000.0 })
            })
            .collect();
        json!({ "key": key, "source": "synthetic", "points": points })
    }
}

impl DataSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(&self, key: &str) -> Result<Payload, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if self.failure_rate > 0.0 {
            // Failures are a function of (key, call number), not thread timing.
            let mut rng = StdRng::seed_from_u64(self.key_seed(key) ^ call);
            if rng.gen::<f64>() < self.failure_rate {
                return Err(FetchError::NetworkUnreachable(format!(
                    "synthetic failure for {key}"
                )));
            }
        }
        Ok(self.series(key))
    }
}
