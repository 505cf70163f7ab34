//! Cross-cutting infrastructure for Fazt: the worker pool and the
//! background task scheduler. Kept separate from the server crate so both
//! can be exercised with lightweight unit tests that don't need a listener.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod scheduler;
pub mod worker;

pub use scheduler::{CronSchedule, RetryPolicy, Scheduler, Task, TaskId, TaskSchedulerBuilder};
pub use worker::{Priority, WorkerPool};

// vim: ts=4
