//! Task operations shared by the scheduler and warmup.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::error::TaskError;

/// Warmup task timeout when none is given.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// A unit of refresh work. Returns how many items it refreshed.
pub trait TaskOperation: Send + Sync {
    fn run(&self) -> Result<usize, TaskError>;
}

impl<F> TaskOperation for F
where
    F: Fn() -> Result<usize, TaskError> + Send + Sync,
{
    fn run(&self) -> Result<usize, TaskError> {
        self()
    }
}

/// Run an operation, turning a panic into a task error.
pub(crate) fn run_guarded(op: &dyn TaskOperation) -> Result<usize, TaskError> {
    match panic::catch_unwind(AssertUnwindSafe(|| op.run())) {
        Ok(outcome) => outcome,
        Err(payload) => Err(TaskError::new(format!(
            "task panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// A warmup task. Immutable once registered.
#[derive(Clone)]
pub struct FetchTask {
    pub name: String,
    /// Higher runs first.
    pub priority: i32,
    pub operation: Arc<dyn TaskOperation>,
    pub timeout: Duration,
    pub enabled: bool,
}

impl FetchTask {
    pub fn new(name: impl Into<String>, priority: i32, operation: impl TaskOperation + 'static) -> Self {
        Self {
            name: name.into(),
            priority,
            operation: Arc::new(operation),
            timeout: DEFAULT_TASK_TIMEOUT,
            enabled: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl fmt::Debug for FetchTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchTask")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_operations() {
        let op = || -> Result<usize, TaskError> { Ok(3) };
        assert_eq!(run_guarded(&op).unwrap(), 3);
    }

    #[test]
    fn panics_become_task_errors() {
        let op = || -> Result<usize, TaskError> { panic!("upstream exploded") };
        let err = run_guarded(&op).unwrap_err();
        assert_eq!(err.message, "task panicked: upstream exploded");

        let formatted = || -> Result<usize, TaskError> { panic!("code {}", 7) };
        assert_eq!(run_guarded(&formatted).unwrap_err().message, "task panicked: code 7");
    }

    #[test]
    fn fetch_task_defaults() {
        let task = FetchTask::new("navs", 10, || -> Result<usize, TaskError> { Ok(0) });
        assert!(task.enabled);
        assert_eq!(task.timeout, DEFAULT_TASK_TIMEOUT);
        let task = task.with_timeout(Duration::from_secs(1)).enabled(false);
        assert!(!task.enabled);
        assert!(format!("{task:?}").contains("navs"));
    }
}
