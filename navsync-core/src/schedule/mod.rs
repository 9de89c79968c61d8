//! Background refresh scheduling and startup warmup.

pub mod refresh;
pub mod scheduler;
pub mod task;
pub mod warmup;

pub use refresh::RefreshTask;
pub use scheduler::{ScheduledTask, Scheduler, TaskPhase};
pub use task::{FetchTask, TaskOperation, DEFAULT_TASK_TIMEOUT};
pub use warmup::{Warmup, WarmupReport, WarmupResult, WarmupStatus};
