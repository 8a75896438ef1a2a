//! Generic lightweight maintenance jobs on top of the trigger engine.
//!
//! Admin jobs mirror policy operations to the paired cluster, clean up the
//! store, and run other recurring chores. A job that finishes its work
//! returns [`JobOutcome::Deregister`] and is removed from the scheduler;
//! one that needs another attempt returns [`JobOutcome::Continue`] and is
//! retried at its next firing.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use syncforge_common::error::SyncforgeError;
use syncforge_common::now_millis;

use crate::engine::{JobDescriptor, TriggerScheduler};
use crate::trigger::TriggerSpec;

/// Schedules admin jobs and keeps re-registration idempotent.
pub struct AdminJobRunner {
    scheduler: Arc<TriggerScheduler>,
}

impl AdminJobRunner {
    pub fn new(scheduler: Arc<TriggerScheduler>) -> Self {
        Self { scheduler }
    }

    /// Remove any existing registration for this job. Returns true when
    /// the name/group is free afterwards.
    pub fn check_and_delete(&self, name: &str, group: &str) -> bool {
        if self.scheduler.check_exists(name, group) {
            info!(job = %format!("{group}/{name}"), "removing existing admin job");
            self.scheduler.delete(name, group)
        } else {
            true
        }
    }

    /// Register an admin job firing every `frequency_secs`, replacing any
    /// previous registration of the same name/group. The job keeps firing
    /// until its handler reports `Deregister`.
    pub fn check_and_schedule(
        &self,
        descriptor: JobDescriptor,
        frequency_secs: u64,
    ) -> Result<(), SyncforgeError> {
        let name = descriptor.key.name.clone();
        let group = descriptor.key.group.clone();
        if !self.check_and_delete(&name, &group) {
            return Err(SyncforgeError::Scheduler(format!(
                "unable to replace admin job {group}/{name}"
            )));
        }
        self.scheduler.add_job(descriptor, true)?;
        let spec = TriggerSpec::recurring(&name, &group, None, None, frequency_secs);
        self.scheduler.schedule(spec)?;
        info!(job = %format!("{group}/{name}"), frequency_secs, "admin job scheduled");
        Ok(())
    }

    /// Register an admin job that fires once after `delay`.
    pub fn schedule_once(
        &self,
        descriptor: JobDescriptor,
        delay: Duration,
    ) -> Result<(), SyncforgeError> {
        let name = descriptor.key.name.clone();
        let group = descriptor.key.group.clone();
        if !self.check_and_delete(&name, &group) {
            return Err(SyncforgeError::Scheduler(format!(
                "unable to replace admin job {group}/{name}"
            )));
        }
        self.scheduler.add_job(descriptor, true)?;
        let fire_at = now_millis() + delay.as_millis() as u64;
        let spec = TriggerSpec::one_shot(&name, &group, Some(fire_at));
        self.scheduler.schedule(spec)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{JobHandler, JobOutcome, JobRun};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyThenDoneHandler {
        fires: Arc<AtomicUsize>,
        succeed_on: usize,
    }

    #[async_trait]
    impl JobHandler for FlakyThenDoneHandler {
        async fn execute(&self, _run: JobRun) -> Result<JobOutcome, SyncforgeError> {
            let fire = self.fires.fetch_add(1, Ordering::SeqCst) + 1;
            if fire >= self.succeed_on {
                Ok(JobOutcome::Deregister)
            } else {
                Ok(JobOutcome::Continue)
            }
        }
    }

    fn runner() -> (AdminJobRunner, Arc<TriggerScheduler>) {
        let scheduler = Arc::new(TriggerScheduler::new(
            Duration::from_millis(50),
            Duration::from_millis(2_000),
        ));
        scheduler.start();
        (AdminJobRunner::new(scheduler.clone()), scheduler)
    }

    #[tokio::test]
    async fn test_admin_job_retries_until_done_then_deregisters() {
        let (runner, scheduler) = runner();
        let fires = Arc::new(AtomicUsize::new(0));
        scheduler.register_handler(
            "sync",
            Arc::new(FlakyThenDoneHandler {
                fires: fires.clone(),
                succeed_on: 3,
            }),
        );
        // sub-second cadence for the test: schedule the trigger directly
        runner.check_and_delete("status-sync", "SYNC");
        scheduler
            .add_job(JobDescriptor::new("status-sync", "SYNC", "sync"), true)
            .unwrap();
        scheduler
            .schedule(TriggerSpec {
                key: crate::trigger::JobKey::new("status-sync", "SYNC"),
                start_time_ms: None,
                end_time_ms: None,
                frequency_ms: 60,
                misfire: crate::trigger::MisfirePolicy::FireNow,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 3);
        assert!(!scheduler.check_exists("status-sync", "SYNC"));
    }

    #[tokio::test]
    async fn test_check_and_schedule_replaces_existing() {
        let (runner, scheduler) = runner();
        let fires = Arc::new(AtomicUsize::new(0));
        scheduler.register_handler(
            "sync",
            Arc::new(FlakyThenDoneHandler {
                fires: fires.clone(),
                succeed_on: usize::MAX,
            }),
        );

        let descriptor = JobDescriptor::new("cleanup", "HOUSEKEEPING", "sync");
        runner.check_and_schedule(descriptor.clone(), 3_600).unwrap();
        assert!(scheduler.check_exists("cleanup", "HOUSEKEEPING"));
        // re-registering the same job must not error on the duplicate trigger
        runner.check_and_schedule(descriptor, 3_600).unwrap();
        assert!(scheduler.check_exists("cleanup", "HOUSEKEEPING"));
    }

    #[tokio::test]
    async fn test_check_and_delete_absent_is_true() {
        let (runner, _scheduler) = runner();
        assert!(runner.check_and_delete("ghost", "SYNC"));
    }

    #[tokio::test]
    async fn test_schedule_once_fires_once() {
        let (runner, scheduler) = runner();
        let fires = Arc::new(AtomicUsize::new(0));
        scheduler.register_handler(
            "sync",
            Arc::new(FlakyThenDoneHandler {
                fires: fires.clone(),
                succeed_on: usize::MAX,
            }),
        );
        runner
            .schedule_once(
                JobDescriptor::new("delete-sync", "SYNC", "sync"),
                Duration::from_millis(50),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);
    }
}
