//! Notification delivery: channel providers, the job queue and the runner
//! that drains it.

pub mod backoff;
pub mod dispatcher;
pub mod fetcher;
pub mod memory;
pub mod producer;
pub mod providers;
pub mod runner;
pub mod store;

pub use dispatcher::{DispatchOutcome, Dispatcher, FailureReason};
pub use runner::{NotificationRunner, RunReport};
pub use store::{JobStore, PgJobStore};
