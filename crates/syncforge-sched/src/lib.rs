//! Trigger scheduling: a minimal cron-capable execution engine, a trigger
//! lifecycle listener with dangling-trigger reaping, and the admin job
//! runner for lightweight maintenance tasks.

pub mod admin;
pub mod engine;
pub mod listener;
pub mod trigger;

pub use admin::AdminJobRunner;
pub use engine::{JobDescriptor, JobHandler, JobOutcome, JobRun, TriggerScheduler};
pub use listener::{FireDecision, TriggerListener};
pub use trigger::{JobKey, MisfirePolicy, TriggerSpec};
