//! The trigger execution engine.
//!
//! A minimal scheduling facade: job definitions are registered as
//! serializable-shaped descriptors (ids plus a handler-registry key, never
//! live object references), triggers fire them onto tokio workers, and a
//! background reaper removes dangling one-shot triggers left behind by
//! process downtime. Single active scheduler process per cluster side; no
//! leader election.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use syncforge_common::error::SyncforgeError;
use syncforge_common::now_millis;

use crate::listener::{is_dangling, FireDecision, LoggingListener, TriggerListener};
use crate::trigger::{JobKey, MisfirePolicy, TriggerSpec};

/// What the engine should do with the job after a firing completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Keep the registration; fire again on the next trigger.
    Continue,
    /// Remove the job and its trigger; used by self-deregistering admin
    /// jobs once their work is done.
    Deregister,
}

/// One firing handed to a [`JobHandler`].
#[derive(Debug, Clone)]
pub struct JobRun {
    pub key: JobKey,
    /// The fire time this run was scheduled for, in epoch milliseconds.
    pub scheduled_for_ms: u64,
    /// Payload copied from the job descriptor.
    pub payload: HashMap<String, String>,
    /// Interruption flag; long-running work must poll this at safe points.
    pub interrupt: Arc<AtomicBool>,
}

/// Executes firings for one handler-registry key.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, run: JobRun) -> Result<JobOutcome, SyncforgeError>;
}

/// A registered job definition: ids and a registry lookup, inspectable and
/// persist-safe.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub key: JobKey,
    /// Handler-registry key resolved at fire time.
    pub handler: String,
    pub payload: HashMap<String, String>,
}

impl JobDescriptor {
    pub fn new(name: &str, group: &str, handler: &str) -> Self {
        Self {
            key: JobKey::new(name, group),
            handler: handler.to_string(),
            payload: HashMap::new(),
        }
    }

    pub fn with_payload(mut self, key: &str, value: &str) -> Self {
        self.payload.insert(key.to_string(), value.to_string());
        self
    }
}

struct TriggerState {
    spec: TriggerSpec,
    /// First fire time, fixed at registration; used for dangling detection.
    fire_at_ms: u64,
    suspended: AtomicBool,
    ever_started: AtomicBool,
    cancel: Notify,
}

struct RunningEntry {
    interrupt: Arc<AtomicBool>,
    active: usize,
}

struct SchedulerInner {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
    jobs: DashMap<JobKey, JobDescriptor>,
    triggers: DashMap<JobKey, Arc<TriggerState>>,
    running: DashMap<JobKey, RunningEntry>,
    listener: Mutex<Arc<dyn TriggerListener>>,
    started: watch::Sender<bool>,
    shutdown: AtomicBool,
    misfire_threshold_ms: u64,
    reaper_interval: Duration,
}

impl SchedulerInner {
    fn listener(&self) -> Arc<dyn TriggerListener> {
        self.listener.lock().unwrap().clone()
    }

    fn clear_trigger(&self, key: &JobKey) -> bool {
        match self.triggers.remove(key) {
            Some((_, state)) => {
                state.cancel.notify_one();
                true
            }
            None => false,
        }
    }

    fn remove_job_and_trigger(&self, key: &JobKey) -> bool {
        let had_job = self.jobs.remove(key).is_some();
        let had_trigger = self.clear_trigger(key);
        had_job || had_trigger
    }

    fn mark_running(&self, key: &JobKey) -> Arc<AtomicBool> {
        let mut entry = self.running.entry(key.clone()).or_insert_with(|| RunningEntry {
            interrupt: Arc::new(AtomicBool::new(false)),
            active: 0,
        });
        entry.active += 1;
        entry.interrupt.clone()
    }

    fn finish_running(&self, key: &JobKey) {
        if let dashmap::mapref::entry::Entry::Occupied(mut occupied) =
            self.running.entry(key.clone())
        {
            occupied.get_mut().active -= 1;
            if occupied.get().active == 0 {
                occupied.remove();
            }
        }
    }

    fn dispatch(self: &Arc<Self>, key: &JobKey, scheduled_for_ms: u64) {
        let descriptor = match self.jobs.get(key) {
            Some(d) => d.value().clone(),
            None => {
                warn!(trigger = %key, "no job definition at fire time");
                return;
            }
        };
        let handler = match self.handlers.get(&descriptor.handler) {
            Some(h) => h.value().clone(),
            None => {
                warn!(trigger = %key, handler = %descriptor.handler, "no handler registered");
                self.listener().trigger_completed(key, false);
                return;
            }
        };

        let interrupt = self.mark_running(key);
        let run = JobRun {
            key: key.clone(),
            scheduled_for_ms,
            payload: descriptor.payload,
            interrupt,
        };
        let inner = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let result = handler.execute(run).await;
            inner.finish_running(&key);
            match result {
                Ok(JobOutcome::Continue) => inner.listener().trigger_completed(&key, true),
                Ok(JobOutcome::Deregister) => {
                    debug!(trigger = %key, "job deregistered itself");
                    inner.remove_job_and_trigger(&key);
                    inner.listener().trigger_completed(&key, true);
                }
                Err(e) => {
                    warn!(trigger = %key, error = %e, "job execution failed");
                    inner.listener().trigger_completed(&key, false);
                }
            }
        });
    }
}

/// Thin wrapper over the cron-style execution engine: register, suspend,
/// resume and delete recurring or bounded triggers.
pub struct TriggerScheduler {
    inner: Arc<SchedulerInner>,
}

impl TriggerScheduler {
    /// Create an engine. Must be called within a tokio runtime; the
    /// dangling-trigger reaper starts immediately so triggers registered
    /// before [`start`](Self::start) are still recovered.
    pub fn new(reaper_interval: Duration, misfire_threshold: Duration) -> Self {
        let (started, _) = watch::channel(false);
        let inner = Arc::new(SchedulerInner {
            handlers: DashMap::new(),
            jobs: DashMap::new(),
            triggers: DashMap::new(),
            running: DashMap::new(),
            listener: Mutex::new(Arc::new(LoggingListener) as Arc<dyn TriggerListener>),
            started,
            shutdown: AtomicBool::new(false),
            misfire_threshold_ms: misfire_threshold.as_millis() as u64,
            reaper_interval,
        });
        tokio::spawn(run_reaper(inner.clone()));
        Self { inner }
    }

    /// Register the handler behind a handler-registry key.
    pub fn register_handler(&self, key: &str, handler: Arc<dyn JobHandler>) {
        self.inner.handlers.insert(key.to_string(), handler);
    }

    /// Install the lifecycle listener; replaces the default logging one.
    pub fn set_listener(&self, listener: Arc<dyn TriggerListener>) {
        *self.inner.listener.lock().unwrap() = listener;
    }

    /// Begin dispatching fires. Triggers registered earlier start firing
    /// from here.
    pub fn start(&self) {
        self.inner.started.send_replace(true);
        info!("trigger scheduler started");
    }

    pub fn is_started(&self) -> bool {
        *self.inner.started.borrow()
    }

    /// Register a runnable job definition without a trigger.
    pub fn add_job(
        &self,
        descriptor: JobDescriptor,
        replace_existing: bool,
    ) -> Result<(), SyncforgeError> {
        if !replace_existing && self.inner.jobs.contains_key(&descriptor.key) {
            return Err(SyncforgeError::Scheduler(format!(
                "job already exists: {}",
                descriptor.key
            )));
        }
        self.inner.jobs.insert(descriptor.key.clone(), descriptor);
        Ok(())
    }

    /// Register a trigger for a previously added job. Returns the trigger
    /// id. A group+name pair maps to at most one active trigger.
    pub fn schedule(&self, spec: TriggerSpec) -> Result<String, SyncforgeError> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(SyncforgeError::Scheduler(
                "scheduler is shut down".to_string(),
            ));
        }
        let now = now_millis();
        spec.validate(now)?;
        if !self.inner.jobs.contains_key(&spec.key) {
            return Err(SyncforgeError::Scheduler(format!(
                "no job definition for trigger {}",
                spec.key
            )));
        }
        if self.inner.triggers.contains_key(&spec.key) {
            return Err(SyncforgeError::Scheduler(format!(
                "trigger already exists: {}",
                spec.key
            )));
        }

        let key = spec.key.clone();
        let state = Arc::new(TriggerState {
            fire_at_ms: spec.first_fire(now),
            spec,
            suspended: AtomicBool::new(false),
            ever_started: AtomicBool::new(false),
            cancel: Notify::new(),
        });
        self.inner.triggers.insert(key.clone(), state.clone());
        tokio::spawn(run_trigger(self.inner.clone(), state));
        debug!(trigger = %key, "trigger registered");
        Ok(key.to_string())
    }

    /// Pause firing without losing the job definition or its data.
    pub fn suspend(&self, name: &str, group: &str) -> Result<(), SyncforgeError> {
        let key = JobKey::new(name, group);
        match self.inner.triggers.get(&key) {
            Some(state) => {
                state.suspended.store(true, Ordering::SeqCst);
                Ok(())
            }
            None => Err(SyncforgeError::Scheduler(format!(
                "no trigger to suspend: {key}"
            ))),
        }
    }

    /// Resume a suspended trigger.
    pub fn resume(&self, name: &str, group: &str) -> Result<(), SyncforgeError> {
        let key = JobKey::new(name, group);
        match self.inner.triggers.get(&key) {
            Some(state) => {
                state.suspended.store(false, Ordering::SeqCst);
                Ok(())
            }
            None => Err(SyncforgeError::Scheduler(format!(
                "no trigger to resume: {key}"
            ))),
        }
    }

    /// Remove job and trigger. Returns false if neither was present.
    pub fn delete(&self, name: &str, group: &str) -> bool {
        let key = JobKey::new(name, group);
        let removed = self.inner.remove_job_and_trigger(&key);
        if removed {
            info!(trigger = %key, "deleted job and trigger");
        }
        removed
    }

    pub fn check_exists(&self, name: &str, group: &str) -> bool {
        let key = JobKey::new(name, group);
        self.inner.jobs.contains_key(&key) || self.inner.triggers.contains_key(&key)
    }

    /// Signal interruption to a currently running firing. Returns false if
    /// nothing is running under this key.
    pub fn interrupt(&self, name: &str, group: &str) -> bool {
        let key = JobKey::new(name, group);
        match self.inner.running.get(&key) {
            Some(entry) => {
                entry.interrupt.store(true, Ordering::SeqCst);
                info!(trigger = %key, "interrupt requested");
                true
            }
            None => false,
        }
    }

    /// Stop firing and interrupt running jobs. Does not wait for them.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.started.send_replace(false);
        for entry in self.inner.triggers.iter() {
            entry.value().cancel.notify_one();
        }
        self.inner.triggers.clear();
        for entry in self.inner.running.iter() {
            entry.value().interrupt.store(true, Ordering::SeqCst);
        }
        info!("trigger scheduler shut down");
    }
}

async fn run_trigger(inner: Arc<SchedulerInner>, state: Arc<TriggerState>) {
    let key = state.spec.key.clone();

    // Hold until the engine starts; a dangling one-shot is reaped out from
    // under this wait.
    let mut started = inner.started.subscribe();
    while !*started.borrow() {
        tokio::select! {
            _ = state.cancel.notified() => return,
            changed = started.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }

    let mut next = state.fire_at_ms;
    loop {
        if inner.shutdown.load(Ordering::SeqCst) || !inner.triggers.contains_key(&key) {
            return;
        }
        let now = now_millis();
        if next > now {
            let sleep = Duration::from_millis(next - now);
            tokio::select! {
                _ = state.cancel.notified() => return,
                _ = tokio::time::sleep(sleep) => {}
            }
        }
        if inner.shutdown.load(Ordering::SeqCst) || !inner.triggers.contains_key(&key) {
            return;
        }

        if state.suspended.load(Ordering::SeqCst) {
            match state.spec.next_after(next) {
                Some(n) => {
                    next = n;
                    continue;
                }
                None => {
                    inner.clear_trigger(&key);
                    return;
                }
            }
        }

        let now = now_millis();
        let late = now > next + inner.misfire_threshold_ms;
        if late {
            inner.listener().trigger_misfired(&key);
            if state.spec.is_one_shot() {
                // window fully elapsed without the job starting
                warn!(trigger = %key, "one-shot trigger missed its window, removing");
                inner.remove_job_and_trigger(&key);
                return;
            }
            if state.spec.misfire == MisfirePolicy::Skip {
                // wait for the next aligned fire instead of catching up
                match state.spec.next_after(now) {
                    Some(n) => {
                        next = n;
                        continue;
                    }
                    None => {
                        inner.clear_trigger(&key);
                        return;
                    }
                }
            }
            // FireNow: fire once, then realign to the current time
        }

        match inner.listener().trigger_fired(&key) {
            FireDecision::Veto => {}
            FireDecision::RemoveTrigger => {
                info!(trigger = %key, "listener removed trigger");
                inner.remove_job_and_trigger(&key);
                return;
            }
            FireDecision::Proceed => {
                state.ever_started.store(true, Ordering::SeqCst);
                inner.dispatch(&key, next);
            }
        }

        // a late FireNow realigns so the backlog is not replayed
        let fired_at = if late { now } else { next };
        match state.spec.next_after(fired_at) {
            Some(n) => next = n,
            None => {
                // one-shot fired, or end time reached; job definition stays
                inner.clear_trigger(&key);
                return;
            }
        }
    }
}

async fn run_reaper(inner: Arc<SchedulerInner>) {
    let mut ticks = tokio::time::interval(inner.reaper_interval);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = now_millis();
        let dangling: Vec<JobKey> = inner
            .triggers
            .iter()
            .filter(|entry| {
                is_dangling(
                    &entry.value().spec,
                    entry.value().fire_at_ms,
                    entry.value().ever_started.load(Ordering::SeqCst),
                    now,
                    inner.misfire_threshold_ms,
                )
            })
            .map(|entry| entry.key().clone())
            .collect();
        for key in dangling {
            warn!(trigger = %key, "reaping dangling trigger");
            inner.listener().trigger_misfired(&key);
            inner.remove_job_and_trigger(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const HANDLER: &str = "test";

    struct CountingHandler {
        fires: Arc<AtomicUsize>,
        outcome: JobOutcome,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn execute(&self, _run: JobRun) -> Result<JobOutcome, SyncforgeError> {
            self.fires.fetch_add(1, Ordering::SeqCst);
            Ok(self.outcome)
        }
    }

    fn scheduler() -> TriggerScheduler {
        TriggerScheduler::new(Duration::from_millis(50), Duration::from_millis(2_000))
    }

    fn counting(scheduler: &TriggerScheduler, outcome: JobOutcome) -> Arc<AtomicUsize> {
        let fires = Arc::new(AtomicUsize::new(0));
        scheduler.register_handler(
            HANDLER,
            Arc::new(CountingHandler {
                fires: fires.clone(),
                outcome,
            }),
        );
        fires
    }

    fn spec_every_ms(name: &str, frequency_ms: u64) -> TriggerSpec {
        TriggerSpec {
            key: JobKey::new(name, "POLICY"),
            start_time_ms: None,
            end_time_ms: None,
            frequency_ms,
            misfire: MisfirePolicy::FireNow,
        }
    }

    #[tokio::test]
    async fn test_schedule_requires_job_definition() {
        let scheduler = scheduler();
        let result = scheduler.schedule(spec_every_ms("orphan", 100));
        assert!(matches!(result, Err(SyncforgeError::Scheduler(_))));
    }

    #[tokio::test]
    async fn test_add_job_duplicate_requires_replace_flag() {
        let scheduler = scheduler();
        let descriptor = JobDescriptor::new("p1", "POLICY", HANDLER);
        scheduler.add_job(descriptor.clone(), false).unwrap();
        assert!(scheduler.add_job(descriptor.clone(), false).is_err());
        assert!(scheduler.add_job(descriptor, true).is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_trigger_rejected() {
        let scheduler = scheduler();
        counting(&scheduler, JobOutcome::Continue);
        scheduler
            .add_job(JobDescriptor::new("p1", "POLICY", HANDLER), false)
            .unwrap();
        scheduler.schedule(spec_every_ms("p1", 100)).unwrap();
        assert!(scheduler.schedule(spec_every_ms("p1", 100)).is_err());
    }

    #[tokio::test]
    async fn test_recurring_trigger_fires_repeatedly() {
        let scheduler = scheduler();
        let fires = counting(&scheduler, JobOutcome::Continue);
        scheduler
            .add_job(JobDescriptor::new("p1", "POLICY", HANDLER), false)
            .unwrap();
        scheduler.schedule(spec_every_ms("p1", 60)).unwrap();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(fires.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_no_fires_before_start() {
        let scheduler = scheduler();
        let fires = counting(&scheduler, JobOutcome::Continue);
        scheduler
            .add_job(JobDescriptor::new("p1", "POLICY", HANDLER), false)
            .unwrap();
        scheduler.schedule(spec_every_ms("p1", 50)).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_suspend_and_resume() {
        let scheduler = scheduler();
        let fires = counting(&scheduler, JobOutcome::Continue);
        scheduler
            .add_job(JobDescriptor::new("p1", "POLICY", HANDLER), false)
            .unwrap();
        scheduler.schedule(spec_every_ms("p1", 50)).unwrap();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.suspend("p1", "POLICY").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let while_suspended = fires.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(fires.load(Ordering::SeqCst) <= while_suspended + 1);

        scheduler.resume("p1", "POLICY").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fires.load(Ordering::SeqCst) > while_suspended);
    }

    #[tokio::test]
    async fn test_suspend_unknown_trigger_errors() {
        let scheduler = scheduler();
        assert!(scheduler.suspend("ghost", "POLICY").is_err());
        assert!(scheduler.resume("ghost", "POLICY").is_err());
    }

    #[tokio::test]
    async fn test_delete_removes_job_and_trigger() {
        let scheduler = scheduler();
        let fires = counting(&scheduler, JobOutcome::Continue);
        scheduler
            .add_job(JobDescriptor::new("p1", "POLICY", HANDLER), false)
            .unwrap();
        scheduler.schedule(spec_every_ms("p1", 50)).unwrap();
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(scheduler.delete("p1", "POLICY"));
        assert!(!scheduler.check_exists("p1", "POLICY"));
        let after_delete = fires.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fires.load(Ordering::SeqCst), after_delete);
    }

    #[tokio::test]
    async fn test_delete_absent_returns_false() {
        let scheduler = scheduler();
        assert!(!scheduler.delete("ghost", "POLICY"));
    }

    #[tokio::test]
    async fn test_one_shot_fires_once_keeps_job() {
        let scheduler = scheduler();
        let fires = counting(&scheduler, JobOutcome::Continue);
        scheduler
            .add_job(JobDescriptor::new("once", "ADMIN", HANDLER), false)
            .unwrap();
        scheduler.start();
        scheduler
            .schedule(TriggerSpec::one_shot("once", "ADMIN", None))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        // trigger consumed; the definition stays registered
        assert!(scheduler.check_exists("once", "ADMIN"));
    }

    #[tokio::test]
    async fn test_deregister_outcome_removes_registration() {
        let scheduler = scheduler();
        let fires = counting(&scheduler, JobOutcome::Deregister);
        scheduler
            .add_job(JobDescriptor::new("sync", "POLICY", HANDLER), false)
            .unwrap();
        scheduler.schedule(spec_every_ms("sync", 50)).unwrap();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert!(!scheduler.check_exists("sync", "POLICY"));
    }

    #[tokio::test]
    async fn test_end_time_bounds_firing() {
        let scheduler = scheduler();
        let fires = counting(&scheduler, JobOutcome::Continue);
        scheduler
            .add_job(JobDescriptor::new("p1", "POLICY", HANDLER), false)
            .unwrap();
        let now = now_millis();
        scheduler
            .schedule(TriggerSpec {
                key: JobKey::new("p1", "POLICY"),
                start_time_ms: None,
                end_time_ms: Some(now + 120),
                frequency_ms: 50,
                misfire: MisfirePolicy::FireNow,
            })
            .unwrap();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(400)).await;
        let total = fires.load(Ordering::SeqCst);
        assert!(total >= 1 && total <= 3, "fired {total} times");
    }

    #[tokio::test]
    async fn test_interrupt_running_job() {
        struct BlockingHandler {
            saw_interrupt: Arc<AtomicBool>,
        }

        #[async_trait]
        impl JobHandler for BlockingHandler {
            async fn execute(&self, run: JobRun) -> Result<JobOutcome, SyncforgeError> {
                for _ in 0..100 {
                    if run.interrupt.load(Ordering::SeqCst) {
                        self.saw_interrupt.store(true, Ordering::SeqCst);
                        return Ok(JobOutcome::Continue);
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Ok(JobOutcome::Continue)
            }
        }

        let scheduler = scheduler();
        let saw_interrupt = Arc::new(AtomicBool::new(false));
        scheduler.register_handler(
            HANDLER,
            Arc::new(BlockingHandler {
                saw_interrupt: saw_interrupt.clone(),
            }),
        );
        scheduler
            .add_job(JobDescriptor::new("p1", "POLICY", HANDLER), false)
            .unwrap();
        scheduler.schedule(spec_every_ms("p1", 5_000)).unwrap();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(scheduler.interrupt("p1", "POLICY"));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(saw_interrupt.load(Ordering::SeqCst));
        // nothing left running
        assert!(!scheduler.interrupt("p1", "POLICY"));
    }

    #[tokio::test]
    async fn test_interrupt_idle_returns_false() {
        let scheduler = scheduler();
        assert!(!scheduler.interrupt("ghost", "POLICY"));
    }

    #[tokio::test]
    async fn test_dangling_one_shot_is_reaped() {
        // short misfire threshold so the window elapses quickly
        let scheduler =
            TriggerScheduler::new(Duration::from_millis(40), Duration::from_millis(100));
        let fires = counting(&scheduler, JobOutcome::Continue);
        scheduler
            .add_job(JobDescriptor::new("stale", "ADMIN", HANDLER), false)
            .unwrap();
        scheduler
            .schedule(TriggerSpec::one_shot(
                "stale",
                "ADMIN",
                Some(now_millis() + 150),
            ))
            .unwrap();
        // scheduler never starts: simulated outage across the fire window

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!scheduler.check_exists("stale", "ADMIN"));
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_listener_remove_trigger_decision() {
        struct RemovingListener;
        impl TriggerListener for RemovingListener {
            fn trigger_fired(&self, _key: &JobKey) -> FireDecision {
                FireDecision::RemoveTrigger
            }
        }

        let scheduler = scheduler();
        let fires = counting(&scheduler, JobOutcome::Continue);
        scheduler.set_listener(Arc::new(RemovingListener));
        scheduler
            .add_job(JobDescriptor::new("gone", "POLICY", HANDLER), false)
            .unwrap();
        scheduler.schedule(spec_every_ms("gone", 50)).unwrap();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 0);
        assert!(!scheduler.check_exists("gone", "POLICY"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_firing() {
        let scheduler = scheduler();
        let fires = counting(&scheduler, JobOutcome::Continue);
        scheduler
            .add_job(JobDescriptor::new("p1", "POLICY", HANDLER), false)
            .unwrap();
        scheduler.schedule(spec_every_ms("p1", 50)).unwrap();
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(120)).await;

        scheduler.shutdown();
        let at_shutdown = fires.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(fires.load(Ordering::SeqCst) <= at_shutdown + 1);
        assert!(scheduler.schedule(spec_every_ms("p2", 50)).is_err());
    }
}
