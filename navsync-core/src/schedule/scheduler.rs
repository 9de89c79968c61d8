//! Interval scheduler with a dedicated loop thread.
//!
//! Tasks live in a table guarded by one mutex, kept in registration order.
//! Each tick the loop marks every enabled task whose `next_run` has passed as
//! `Due`, then runs them one at a time on the loop thread. The table lock is
//! never held while an operation runs, so `status`, `force_run` and
//! registration stay responsive during long refreshes.
//!
//! After every run, success or failure, `last_run` is the completion time and
//! `next_run = last_run + interval`. A failing task is retried on its normal
//! cadence, never sooner.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::task::{run_guarded, TaskOperation};
use crate::clock::{to_chrono, Clock, SystemClock};
use crate::config::SchedulerSettings;
use crate::error::{ConfigError, SchedulerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Idle,
    Due,
    Running,
}

/// Snapshot of one scheduled task.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTask {
    pub name: String,
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub run_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    /// Items refreshed by the last successful run.
    pub last_items: Option<usize>,
    pub last_duration_ms: Option<u64>,
    pub enabled: bool,
    pub phase: TaskPhase,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

struct TaskSlot {
    /// Unique per registration; a removed and re-registered name gets a new id.
    id: u64,
    state: ScheduledTask,
    operation: Arc<dyn TaskOperation>,
}

struct Shared {
    tasks: Mutex<Vec<TaskSlot>>,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
}

struct LoopHandle {
    stop: Arc<AtomicBool>,
    wake: mpsc::Sender<()>,
    exited: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    settings: SchedulerSettings,
    worker: Mutex<Option<LoopHandle>>,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: SchedulerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tasks: Mutex::new(Vec::new()),
                clock,
                next_id: AtomicU64::new(0),
            }),
            settings,
            worker: Mutex::new(None),
        }
    }

    /// Register a task whose first run is due immediately.
    pub fn register_task(
        &self,
        name: impl Into<String>,
        interval: Duration,
        operation: impl TaskOperation + 'static,
    ) -> Result<(), SchedulerError> {
        self.insert(name.into(), interval, Arc::new(operation), false)
    }

    /// Register a task whose first run is one interval from now.
    pub fn register_task_delayed(
        &self,
        name: impl Into<String>,
        interval: Duration,
        operation: impl TaskOperation + 'static,
    ) -> Result<(), SchedulerError> {
        self.insert(name.into(), interval, Arc::new(operation), true)
    }

    fn insert(
        &self,
        name: String,
        interval: Duration,
        operation: Arc<dyn TaskOperation>,
        delayed: bool,
    ) -> Result<(), SchedulerError> {
        if interval.is_zero() {
            return Err(ConfigError::invalid(&format!("scheduler task '{name}' interval"), "must be positive").into());
        }
        let mut tasks = self.shared.tasks.lock();
        if tasks.iter().any(|t| t.state.name == name) {
            return Err(SchedulerError::DuplicateTask(name));
        }
        let now = self.shared.clock.now();
        let next_run = if delayed { now + to_chrono(interval) } else { now };
        info!(task = %name, interval = ?interval, %next_run, "registered scheduled task");
        tasks.push(TaskSlot {
            id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
            state: ScheduledTask {
                name,
                interval,
                last_run: None,
                next_run,
                run_count: 0,
                error_count: 0,
                last_error: None,
                last_items: None,
                last_duration_ms: None,
                enabled: true,
                phase: TaskPhase::Idle,
            },
            operation,
        });
        Ok(())
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), SchedulerError> {
        let mut tasks = self.shared.tasks.lock();
        let slot = tasks
            .iter_mut()
            .find(|t| t.state.name == name)
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))?;
        slot.state.enabled = enabled;
        debug!(task = name, enabled, "task enabled flag changed");
        Ok(())
    }

    /// Remove a task. A run already in progress finishes but is not recorded.
    pub fn remove_task(&self, name: &str) -> Result<(), SchedulerError> {
        let mut tasks = self.shared.tasks.lock();
        let before = tasks.len();
        tasks.retain(|t| t.state.name != name);
        if tasks.len() == before {
            return Err(SchedulerError::UnknownTask(name.to_string()));
        }
        info!(task = name, "removed scheduled task");
        Ok(())
    }

    /// Spawn the loop thread.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (wake_tx, wake_rx) = mpsc::channel::<()>();
        let (exited_tx, exited_rx) = mpsc::channel::<()>();
        let shared = Arc::clone(&self.shared);
        let tick = self.settings.tick();
        let loop_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("navsync-scheduler".into())
            .spawn(move || {
                // Dropped on exit, which disconnects the receiver in `stop`.
                let _exited = exited_tx;
                run_loop(&shared, tick, &loop_stop, &wake_rx);
            })?;

        info!(tick = ?tick, "scheduler started");
        *worker = Some(LoopHandle {
            stop,
            wake: wake_tx,
            exited: exited_rx,
            handle,
        });
        Ok(())
    }

    /// Signal the loop and wait up to the configured timeout for it to exit.
    /// Returns `false` if the loop was still busy when the timeout elapsed;
    /// the thread is then detached and exits after its current task.
    pub fn stop(&self) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return true;
        };
        worker.stop.store(true, Ordering::SeqCst);
        let _ = worker.wake.send(());

        let timeout = self.settings.stop_timeout();
        match worker.exited.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?timeout, "scheduler loop did not stop in time, detaching");
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    warn!("scheduler loop thread panicked");
                }
                info!("scheduler stopped");
                true
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Run one task (or every enabled task) now on the calling thread.
    ///
    /// A named task runs even when disabled. Tasks already running are
    /// skipped. Returns how many tasks ran.
    pub fn force_run(&self, name: Option<&str>) -> Result<usize, SchedulerError> {
        match name {
            Some(name) => {
                let id = self
                    .shared
                    .tasks
                    .lock()
                    .iter()
                    .find(|t| t.state.name == name)
                    .map(|t| t.id)
                    .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))?;
                Ok(usize::from(self.shared.run_task(id, false)))
            }
            None => {
                let ids: Vec<u64> = self
                    .shared
                    .tasks
                    .lock()
                    .iter()
                    .filter(|t| t.state.enabled)
                    .map(|t| t.id)
                    .collect();
                Ok(ids
                    .into_iter()
                    .filter(|&id| self.shared.run_task(id, false))
                    .count())
            }
        }
    }

    /// Run whatever is due right now, as one loop tick would.
    pub fn run_pending(&self) -> usize {
        self.shared.run_due()
    }

    pub fn status(&self) -> Vec<ScheduledTask> {
        self.shared
            .tasks
            .lock()
            .iter()
            .map(|t| t.state.clone())
            .collect()
    }

    pub fn task(&self, name: &str) -> Option<ScheduledTask> {
        self.shared
            .tasks
            .lock()
            .iter()
            .find(|t| t.state.name == name)
            .map(|t| t.state.clone())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

fn run_loop(shared: &Shared, tick: Duration, stop: &AtomicBool, wake: &mpsc::Receiver<()>) {
    debug!("scheduler loop running");
    while !stop.load(Ordering::SeqCst) {
        shared.run_due();
        match wake.recv_timeout(tick) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("scheduler loop exiting");
}

impl Shared {
    fn run_due(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<u64> = {
            let mut tasks = self.tasks.lock();
            tasks
                .iter_mut()
                .filter(|t| t.state.enabled && t.state.phase == TaskPhase::Idle && t.state.next_run <= now)
                .map(|t| {
                    t.state.phase = TaskPhase::Due;
                    t.id
                })
                .collect()
        };
        due.into_iter().filter(|&id| self.run_task(id, true)).count()
    }

    /// Run a task if it is not already running. With `from_tick`, the task
    /// must still be `Due` (a concurrent `force_run` may have taken it).
    /// Completion is recorded only on the slot with this `id`.
    fn run_task(&self, id: u64, from_tick: bool) -> bool {
        let (name, operation) = {
            let mut tasks = self.tasks.lock();
            let Some(slot) = tasks.iter_mut().find(|t| t.id == id) else {
                return false;
            };
            let runnable = match slot.state.phase {
                TaskPhase::Running => false,
                TaskPhase::Due => true,
                TaskPhase::Idle => !from_tick,
            };
            if !runnable {
                debug!(task = %slot.state.name, "task already running, skipped");
                return false;
            }
            slot.state.phase = TaskPhase::Running;
            (slot.state.name.clone(), Arc::clone(&slot.operation))
        };
        let name = name.as_str();

        let started = Instant::now();
        let outcome = run_guarded(operation.as_ref());
        let elapsed = started.elapsed();
        let finished = self.clock.now();

        let mut tasks = self.tasks.lock();
        let Some(slot) = tasks.iter_mut().find(|t| t.id == id) else {
            debug!(task = name, "task removed while running, result dropped");
            return true;
        };
        let state = &mut slot.state;
        state.phase = TaskPhase::Idle;
        state.run_count += 1;
        state.last_run = Some(finished);
        state.next_run = finished + to_chrono(state.interval);
        state.last_duration_ms = Some(elapsed.as_millis() as u64);
        match outcome {
            Ok(items) => {
                state.last_items = Some(items);
                state.last_error = None;
                info!(task = name, items, elapsed_ms = elapsed.as_millis() as u64, "scheduled task complete");
            }
            Err(e) => {
                state.error_count += 1;
                warn!(task = name, error = %e, errors = state.error_count, "scheduled task failed");
                state.last_error = Some(e.message);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TaskError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    fn manual() -> (Scheduler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let scheduler = Scheduler::with_clock(SchedulerSettings::default(), clock.clone());
        (scheduler, clock)
    }

    fn counter_op(counter: &Arc<AtomicUsize>) -> impl TaskOperation + 'static {
        let counter = Arc::clone(counter);
        move || -> Result<usize, TaskError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
    }

    #[test]
    fn first_run_is_due_immediately() {
        let (scheduler, _) = manual();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task("navs", Duration::from_secs(60), counter_op(&runs))
            .unwrap();
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(scheduler.run_pending(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delayed_registration_waits_one_interval() {
        let (scheduler, clock) = manual();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task_delayed("navs", Duration::from_secs(60), counter_op(&runs))
            .unwrap();
        assert_eq!(scheduler.run_pending(), 0);
        clock.advance(Duration::from_secs(60));
        assert_eq!(scheduler.run_pending(), 1);
    }

    #[test]
    fn failure_keeps_normal_cadence() {
        let (scheduler, clock) = manual();
        let failing = || -> Result<usize, TaskError> { Err(TaskError::new("upstream down")) };
        scheduler
            .register_task("navs", Duration::from_secs(60), failing)
            .unwrap();
        let registered_at = clock.now();

        scheduler.run_pending();
        let task = scheduler.task("navs").unwrap();
        assert_eq!(task.run_count, 1);
        assert_eq!(task.error_count, 1);
        assert_eq!(task.last_error.as_deref(), Some("upstream down"));
        assert_eq!(task.next_run, registered_at + chrono::Duration::seconds(60));

        clock.advance(Duration::from_secs(59));
        assert_eq!(scheduler.run_pending(), 0);
        clock.advance(Duration::from_secs(1));
        assert_eq!(scheduler.run_pending(), 1);
    }

    #[test]
    fn disabled_tasks_are_not_due() {
        let (scheduler, _) = manual();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task("navs", Duration::from_secs(60), counter_op(&runs))
            .unwrap();
        scheduler.set_enabled("navs", false).unwrap();
        assert_eq!(scheduler.run_pending(), 0);
        // An explicit force_run still runs it.
        assert_eq!(scheduler.force_run(Some("navs")).unwrap(), 1);
        assert_eq!(scheduler.force_run(None).unwrap(), 0);
    }

    #[test]
    fn force_run_updates_schedule() {
        let (scheduler, clock) = manual();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task_delayed("a", Duration::from_secs(60), counter_op(&runs))
            .unwrap();
        scheduler
            .register_task_delayed("b", Duration::from_secs(60), counter_op(&runs))
            .unwrap();
        clock.advance(Duration::from_secs(10));
        assert_eq!(scheduler.force_run(None).unwrap(), 2);

        let a = scheduler.task("a").unwrap();
        assert_eq!(a.run_count, 1);
        assert_eq!(a.last_items, Some(1));
        assert_eq!(a.next_run, clock.now() + chrono::Duration::seconds(60));
    }

    #[test]
    fn duplicate_and_unknown_names() {
        let (scheduler, _) = manual();
        let op = || -> Result<usize, TaskError> { Ok(0) };
        scheduler.register_task("a", Duration::from_secs(1), op).unwrap();
        assert!(matches!(
            scheduler.register_task("a", Duration::from_secs(1), op),
            Err(SchedulerError::DuplicateTask(_))
        ));
        assert!(matches!(
            scheduler.force_run(Some("zzz")),
            Err(SchedulerError::UnknownTask(_))
        ));
        assert!(scheduler.remove_task("zzz").is_err());
        scheduler.remove_task("a").unwrap();
        assert!(scheduler.status().is_empty());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let (scheduler, _) = manual();
        let op = || -> Result<usize, TaskError> { Ok(0) };
        assert!(matches!(
            scheduler.register_task("a", Duration::ZERO, op),
            Err(SchedulerError::Config(_))
        ));
    }

    #[test]
    fn panicking_task_is_recorded() {
        let (scheduler, _) = manual();
        let op = || -> Result<usize, TaskError> { panic!("bad payload") };
        scheduler.register_task("a", Duration::from_secs(1), op).unwrap();
        scheduler.run_pending();
        let task = scheduler.task("a").unwrap();
        assert_eq!(task.error_count, 1);
        assert_eq!(task.phase, TaskPhase::Idle);
        assert!(task.last_error.unwrap().contains("bad payload"));
    }

    #[test]
    fn removed_task_run_does_not_touch_its_replacement() {
        let (scheduler, _) = manual();
        let gate = Arc::new(Barrier::new(2));
        let op_gate = Arc::clone(&gate);
        scheduler
            .register_task("navs", Duration::from_secs(60), move || -> Result<usize, TaskError> {
                op_gate.wait();
                op_gate.wait();
                Ok(5)
            })
            .unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        thread::scope(|s| {
            let old_run = s.spawn(|| scheduler.force_run(Some("navs")));
            gate.wait();
            scheduler.remove_task("navs").unwrap();
            scheduler
                .register_task_delayed("navs", Duration::from_secs(60), counter_op(&runs))
                .unwrap();
            gate.wait();
            assert_eq!(old_run.join().unwrap().unwrap(), 1);
        });

        let task = scheduler.task("navs").unwrap();
        assert_eq!(task.phase, TaskPhase::Idle);
        assert_eq!(task.run_count, 0);
        assert_eq!(task.last_run, None);
        assert_eq!(task.last_items, None);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn start_twice_is_an_error_and_stop_joins() {
        let scheduler = Scheduler::new(SchedulerSettings {
            tick_millis: 10,
            stop_timeout_seconds: 2.0,
        });
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task("navs", Duration::from_secs(3600), counter_op(&runs))
            .unwrap();
        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyRunning)));

        let deadline = Instant::now() + Duration::from_secs(2);
        while runs.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(scheduler.stop());
        assert!(!scheduler.is_running());
        // Restart after a clean stop is allowed.
        scheduler.start().unwrap();
        assert!(scheduler.stop());
    }
}
