//! Circuit breaker for provider bans and sustained failure.
//!
//! An explicit block (HTTP 403) trips the breaker at once; otherwise it opens
//! after `failure_threshold` consecutive failed attempts. While open, every
//! upstream attempt is refused until the cooldown elapses, which keeps the
//! fetcher from hammering a provider that has already banned us.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::BreakerSettings;

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests are allowed.
    Closed,
    /// All requests are refused until the cooldown expires.
    Open { tripped_at: Instant },
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    trips: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    cooldown: Duration,
    failure_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                trips: 0,
            }),
            cooldown,
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub fn from_settings(settings: &BreakerSettings) -> Self {
        Self::new(
            settings.failure_threshold,
            Duration::from_secs(settings.cooldown_seconds),
        )
    }

    /// Whether a request may go out now. Closes an expired open breaker.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open { tripped_at } if tripped_at.elapsed() >= self.cooldown => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                info!("circuit breaker cooldown elapsed, closing");
                true
            }
            BreakerState::Open { .. } => false,
        }
    }

    pub fn record_success(&self) {
        self.inner.lock().consecutive_failures = 0;
    }

    /// Count a failed attempt, opening the breaker at the threshold.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.failure_threshold
            && matches!(inner.state, BreakerState::Closed)
        {
            warn!(
                failures = inner.consecutive_failures,
                cooldown = ?self.cooldown,
                "circuit breaker opened after consecutive failures"
            );
            Self::open(&mut inner);
        }
    }

    /// Open immediately (provider ban).
    pub fn trip(&self) {
        let mut inner = self.inner.lock();
        warn!(cooldown = ?self.cooldown, "circuit breaker tripped by provider block");
        Self::open(&mut inner);
    }

    fn open(inner: &mut Inner) {
        inner.state = BreakerState::Open {
            tripped_at: Instant::now(),
        };
        inner.trips += 1;
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// How many times the breaker has opened.
    pub fn trips(&self) -> u64 {
        self.inner.lock().trips
    }

    /// Remaining cooldown (zero when closed).
    pub fn remaining_cooldown(&self) -> Duration {
        match self.inner.lock().state {
            BreakerState::Closed => Duration::ZERO,
            BreakerState::Open { tripped_at } => self.cooldown.saturating_sub(tripped_at.elapsed()),
        }
    }
}
