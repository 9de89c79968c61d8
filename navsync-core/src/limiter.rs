//! Sliding-window rate limiting per named upstream endpoint.
//!
//! Each limiter keeps the instants of its recent calls in a deque guarded by
//! its own mutex. The registry map has a separate read/write lock that is only
//! held long enough to look up (or lazily create) a limiter, so two endpoint
//! families never contend on the same window.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{RateLimitSettings, SyncConfig};
use crate::error::{ConfigError, RateLimitTimeout};

/// Point-in-time view of one limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterStats {
    pub name: String,
    /// Calls currently inside the trailing window.
    pub window_calls: usize,
    pub max_calls: usize,
    pub period: Duration,
    pub total_calls: u64,
    /// Calls that had to wait at least once before being granted.
    pub throttled_calls: u64,
}

#[derive(Debug)]
struct WindowState {
    calls: VecDeque<Instant>,
    total_calls: u64,
    throttled_calls: u64,
}

/// A single sliding window.
#[derive(Debug)]
pub struct SlidingWindow {
    name: String,
    max_calls: usize,
    period: Duration,
    default_max_wait: Option<Duration>,
    state: Mutex<WindowState>,
}

impl SlidingWindow {
    pub fn new(name: impl Into<String>, max_calls: u32, period: Duration) -> Result<Self, ConfigError> {
        if max_calls == 0 {
            return Err(ConfigError::invalid("max_calls_per_period", "must be at least 1"));
        }
        if period.is_zero() {
            return Err(ConfigError::invalid("period_seconds", "must be positive"));
        }
        Ok(Self {
            name: name.into(),
            max_calls: max_calls as usize,
            period,
            default_max_wait: None,
            state: Mutex::new(WindowState {
                calls: VecDeque::with_capacity((max_calls as usize).min(1024)),
                total_calls: 0,
                throttled_calls: 0,
            }),
        })
    }

    fn from_settings(name: &str, settings: &RateLimitSettings) -> Result<Self, ConfigError> {
        settings.validate(&format!("limiters.{name}"))?;
        let mut window = Self::new(name, settings.max_calls_per_period, settings.period())?;
        window.default_max_wait = settings.max_wait();
        Ok(window)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait bound configured for this limiter, if any.
    pub fn default_max_wait(&self) -> Option<Duration> {
        self.default_max_wait
    }

    /// Block until a slot is free, then record the call.
    pub fn acquire(&self) {
        // Without a bound the wait never fails.
        let _ = self.acquire_bounded(None);
    }

    /// Like `acquire`, but give up once the cumulative wait would exceed
    /// `max_wait`. A timed-out call is not recorded in the window.
    pub fn acquire_timeout(&self, max_wait: Duration) -> Result<(), RateLimitTimeout> {
        self.acquire_bounded(Some(max_wait))
    }

    fn acquire_bounded(&self, max_wait: Option<Duration>) -> Result<(), RateLimitTimeout> {
        let started = Instant::now();
        let mut throttled = false;

        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                Self::prune(&mut state.calls, now, self.period);

                if state.calls.len() < self.max_calls {
                    state.calls.push_back(now);
                    state.total_calls += 1;
                    if throttled {
                        state.throttled_calls += 1;
                    }
                    return Ok(());
                }

                // Full window: the oldest call leaves it after `period`.
                let oldest = state.calls.front().copied().unwrap_or(now);
                self.period.saturating_sub(now.duration_since(oldest))
            };

            if let Some(bound) = max_wait {
                if started.elapsed() + wait > bound {
                    debug!(limiter = %self.name, ?bound, "rate limiter wait bound exceeded");
                    return Err(RateLimitTimeout {
                        limiter: self.name.clone(),
                        max_wait: bound,
                    });
                }
            }

            if !throttled {
                debug!(limiter = %self.name, ?wait, "rate limited, waiting for a slot");
            }
            throttled = true;
            // Re-check after the sleep: another caller may take the freed slot.
            std::thread::sleep(wait.max(Duration::from_millis(1)));
        }
    }

    pub fn stats(&self) -> LimiterStats {
        let state = self.state.lock();
        let now = Instant::now();
        let window_calls = state
            .calls
            .iter()
            .filter(|t| now.duration_since(**t) < self.period)
            .count();
        LimiterStats {
            name: self.name.clone(),
            window_calls,
            max_calls: self.max_calls,
            period: self.period,
            total_calls: state.total_calls,
            throttled_calls: state.throttled_calls,
        }
    }

    fn prune(calls: &mut VecDeque<Instant>, now: Instant, period: Duration) {
        while let Some(&front) = calls.front() {
            if now.duration_since(front) >= period {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Named, independent sliding-window limiters.
#[derive(Debug)]
pub struct RateLimiter {
    defaults: RateLimitSettings,
    limiters: RwLock<HashMap<String, Arc<SlidingWindow>>>,
}

impl RateLimiter {
    /// Registry whose unknown names get `defaults`.
    pub fn new(defaults: RateLimitSettings) -> Result<Self, ConfigError> {
        // Validate once so lazy creation below cannot fail.
        SlidingWindow::from_settings("default", &defaults)?;
        Ok(Self {
            defaults,
            limiters: RwLock::new(HashMap::new()),
        })
    }

    /// Registry preloaded with every `[limiters.*]` entry of the config.
    pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        let registry = Self::new(config.rate_limit.clone())?;
        for (name, settings) in &config.limiters {
            registry.register_settings(name, settings)?;
        }
        Ok(registry)
    }

    /// Install (or replace) the settings for one name.
    pub fn register(&self, name: &str, max_calls: u32, period: Duration) -> Result<(), ConfigError> {
        let window = SlidingWindow::new(name, max_calls, period)?;
        self.limiters.write().insert(name.to_string(), Arc::new(window));
        Ok(())
    }

    fn register_settings(&self, name: &str, settings: &RateLimitSettings) -> Result<(), ConfigError> {
        let window = SlidingWindow::from_settings(name, settings)?;
        self.limiters.write().insert(name.to_string(), Arc::new(window));
        Ok(())
    }

    /// The window for `name`, created with default settings on first use.
    pub fn limiter(&self, name: &str) -> Arc<SlidingWindow> {
        if let Some(existing) = self.limiters.read().get(name) {
            return Arc::clone(existing);
        }
        let mut map = self.limiters.write();
        let window = map.entry(name.to_string()).or_insert_with(|| {
            let window = SlidingWindow::from_settings(name, &self.defaults)
                .unwrap_or_else(|_| unreachable!("defaults validated in RateLimiter::new"));
            Arc::new(window)
        });
        Arc::clone(window)
    }

    /// Block until `name` grants a slot.
    pub fn acquire(&self, name: &str) {
        self.limiter(name).acquire();
    }

    /// Bounded acquire on `name`.
    pub fn acquire_timeout(&self, name: &str, max_wait: Duration) -> Result<(), RateLimitTimeout> {
        self.limiter(name).acquire_timeout(max_wait)
    }

    /// Stats for a registered limiter. Unknown names report `None` rather
    /// than being created.
    pub fn stats(&self, name: &str) -> Option<LimiterStats> {
        self.limiters.read().get(name).map(|w| w.stats())
    }

    /// Stats for every known limiter, sorted by name.
    pub fn all_stats(&self) -> Vec<LimiterStats> {
        let mut stats: Vec<LimiterStats> = self.limiters.read().values().map(|w| w.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}
