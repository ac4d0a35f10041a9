//! Leader-side scheduling: turning schedules into jobs and jobs into
//! dispatches.
//!
//! Every task here is gated on leadership and tolerates running twice across
//! a failover, since store writes are conditional on the row version.

pub mod dispatcher;
pub mod evaluator;
pub mod job;
pub mod planner;
pub mod retry;
pub mod scanner;
pub mod schedule;

pub use dispatcher::JobDispatcher;
pub use job::{DeadLetter, Job, JobStatus, LogEntry, LogLevel, ScheduleType};
pub use planner::JobPlanner;
pub use retry::{move_to_dead_letter, RetryScanner};
pub use scanner::{JobQueueScanner, ScheduleScanner};
pub use schedule::{CronSchedule, IntervalSchedule, Recurring};
