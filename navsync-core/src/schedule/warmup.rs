//! One-shot prioritized cache warmup at process start.
//!
//! Tasks run in descending priority (ties keep registration order). Each task
//! runs on a helper thread bounded by its timeout; an overrun is reported as
//! a timed-out failure while the operation itself keeps going in the
//! background. The first `warmup` call does the work, concurrent callers
//! block until it finishes, and later calls get the stored report until
//! `reset` clears it.

use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::cmp::Reverse;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::task::{run_guarded, FetchTask};
use crate::config::WarmupSettings;
use crate::error::{ConfigError, SchedulerError, TaskError};

#[derive(Debug, Clone, Serialize)]
pub struct WarmupResult {
    pub name: String,
    pub priority: i32,
    pub success: bool,
    pub items: usize,
    pub error: Option<String>,
    pub timed_out: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmupReport {
    /// Serial runs are in priority order; parallel runs in completion order.
    pub results: Vec<WarmupResult>,
    pub parallel: bool,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub items: usize,
    pub duration_ms: u64,
}

impl WarmupReport {
    fn new(results: Vec<WarmupResult>, parallel: bool, elapsed: Duration) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            timed_out: results.iter().filter(|r| r.timed_out).count(),
            items: results.iter().map(|r| r.items).sum(),
            duration_ms: elapsed.as_millis() as u64,
            parallel,
            results,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn result(&self, name: &str) -> Option<&WarmupResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmupStatus {
    pub registered: usize,
    pub running: bool,
    pub completed: bool,
    pub last_report: Option<WarmupReport>,
}

enum RunState {
    Pending,
    Running,
    Done(WarmupReport),
}

pub struct Warmup {
    tasks: Mutex<Vec<FetchTask>>,
    state: Mutex<RunState>,
    finished: Condvar,
    pool: ThreadPool,
    settings: WarmupSettings,
}

impl Warmup {
    pub fn new(settings: WarmupSettings) -> Result<Self, ConfigError> {
        if settings.max_workers == 0 {
            return Err(ConfigError::invalid("warmup.max_workers", "must be at least 1"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(settings.max_workers)
            .thread_name(|i| format!("navsync-warmup-{i}"))
            .build()?;
        Ok(Self {
            tasks: Mutex::new(Vec::new()),
            state: Mutex::new(RunState::Pending),
            finished: Condvar::new(),
            pool,
            settings,
        })
    }

    pub fn register_task(&self, task: FetchTask) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.lock();
        if tasks.iter().any(|t| t.name == task.name) {
            return Err(SchedulerError::DuplicateTask(task.name));
        }
        debug!(task = %task.name, priority = task.priority, enabled = task.enabled, "registered warmup task");
        tasks.push(task);
        Ok(())
    }

    /// Run warmup with the configured parallelism.
    pub fn run(&self) -> WarmupReport {
        self.warmup(self.settings.parallel)
    }

    /// Run every enabled task once and return the report. Idempotent until
    /// `reset`.
    pub fn warmup(&self, parallel: bool) -> WarmupReport {
        {
            let mut state = self.state.lock();
            loop {
                if let RunState::Done(report) = &*state {
                    return report.clone();
                }
                if matches!(*state, RunState::Pending) {
                    break;
                }
                self.finished.wait(&mut state);
            }
            *state = RunState::Running;
        }

        let guard = RunGuard::new(self);
        let report = self.execute(parallel);
        guard.finish(report.clone());
        report
    }

    /// Forget the stored report so the next `warmup` runs again. Has no
    /// effect while a run is in progress.
    pub fn reset(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, RunState::Running) {
            return false;
        }
        *state = RunState::Pending;
        true
    }

    pub fn status(&self) -> WarmupStatus {
        let registered = self.tasks.lock().len();
        let state = self.state.lock();
        let (running, last_report) = match &*state {
            RunState::Pending => (false, None),
            RunState::Running => (true, None),
            RunState::Done(report) => (false, Some(report.clone())),
        };
        WarmupStatus {
            registered,
            running,
            completed: last_report.is_some(),
            last_report,
        }
    }

    fn execute(&self, parallel: bool) -> WarmupReport {
        let started = Instant::now();
        let mut tasks: Vec<FetchTask> = self
            .tasks
            .lock()
            .iter()
            .filter(|t| t.enabled)
            .cloned()
            .collect();
        // Stable: equal priorities keep registration order.
        tasks.sort_by_key(|t| Reverse(t.priority));
        info!(tasks = tasks.len(), parallel, "starting cache warmup");

        let results = if parallel && tasks.len() > 1 {
            self.execute_parallel(&tasks)
        } else {
            tasks.iter().map(run_with_timeout).collect()
        };

        let report = WarmupReport::new(results, parallel, started.elapsed());
        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            timed_out = report.timed_out,
            items = report.items,
            duration_ms = report.duration_ms,
            "cache warmup complete"
        );
        report
    }

    fn execute_parallel(&self, tasks: &[FetchTask]) -> Vec<WarmupResult> {
        let (tx, rx) = mpsc::channel();
        let mut results = Vec::with_capacity(tasks.len());
        self.pool.in_place_scope(|scope| {
            for task in tasks {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let _ = tx.send(run_with_timeout(task));
                });
            }
            drop(tx);
            results.extend(rx);
        });
        results
    }
}

/// Owns the `Running` state for one run. Dropped without `finish` (the run
/// unwound), it puts the state back to `Pending` and wakes blocked callers.
struct RunGuard<'a> {
    warmup: &'a Warmup,
    finished: bool,
}

impl<'a> RunGuard<'a> {
    fn new(warmup: &'a Warmup) -> Self {
        Self {
            warmup,
            finished: false,
        }
    }

    fn finish(mut self, report: WarmupReport) {
        *self.warmup.state.lock() = RunState::Done(report);
        self.warmup.finished.notify_all();
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("warmup run did not complete, state reset to pending");
            *self.warmup.state.lock() = RunState::Pending;
            self.warmup.finished.notify_all();
        }
    }
}

fn run_with_timeout(task: &FetchTask) -> WarmupResult {
    let started = Instant::now();
    let (tx, rx) = mpsc::channel();
    let operation = Arc::clone(&task.operation);
    let spawned = thread::Builder::new()
        .name(format!("warmup-{}", task.name))
        .spawn(move || {
            let _ = tx.send(run_guarded(operation.as_ref()));
        });

    let (outcome, timed_out) = match spawned {
        Err(e) => (Err(TaskError::new(format!("failed to spawn task thread: {e}"))), false),
        Ok(_) => match rx.recv_timeout(task.timeout) {
            Ok(outcome) => (outcome, false),
            Err(RecvTimeoutError::Timeout) => (
                Err(TaskError::new(format!("timed out after {:?}", task.timeout))),
                true,
            ),
            Err(RecvTimeoutError::Disconnected) => {
                (Err(TaskError::new("task thread exited without a result")), false)
            }
        },
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(items) => {
            info!(task = %task.name, priority = task.priority, items, duration_ms, "warmup task complete");
            WarmupResult {
                name: task.name.clone(),
                priority: task.priority,
                success: true,
                items,
                error: None,
                timed_out: false,
                duration_ms,
            }
        }
        Err(e) => {
            warn!(task = %task.name, priority = task.priority, error = %e, timed_out, "warmup task failed");
            WarmupResult {
                name: task.name.clone(),
                priority: task.priority,
                success: false,
                items: 0,
                error: Some(e.message),
                timed_out,
                duration_ms,
            }
        }
    }
}
