//! Trigger lifecycle hooks.
//!
//! The listener observes every firing and completion, can veto a firing or
//! ask for the trigger's removal (e.g. when the owning policy no longer
//! exists), and supplies the dangling-trigger predicate used by the
//! engine's reaper.

use crate::trigger::{JobKey, TriggerSpec};

/// Decision returned by [`TriggerListener::trigger_fired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    /// Run the job.
    Proceed,
    /// Skip this firing, keep the trigger.
    Veto,
    /// Delete the job and trigger instead of firing.
    RemoveTrigger,
}

/// Hooks invoked by the scheduler around each firing.
pub trait TriggerListener: Send + Sync {
    /// Called before the job is dispatched.
    fn trigger_fired(&self, _key: &JobKey) -> FireDecision {
        FireDecision::Proceed
    }

    /// Called after the dispatched job finishes.
    fn trigger_completed(&self, _key: &JobKey, _success: bool) {}

    /// Called when a fire time is missed beyond the misfire threshold.
    fn trigger_misfired(&self, _key: &JobKey) {}
}

/// Listener that only logs; used when no listener is installed.
pub struct LoggingListener;

impl TriggerListener for LoggingListener {
    fn trigger_fired(&self, key: &JobKey) -> FireDecision {
        tracing::debug!(trigger = %key, "trigger fired");
        FireDecision::Proceed
    }

    fn trigger_completed(&self, key: &JobKey, success: bool) {
        tracing::debug!(trigger = %key, success, "trigger completed");
    }

    fn trigger_misfired(&self, key: &JobKey) {
        tracing::info!(trigger = %key, "trigger misfired");
    }
}

/// A one-shot trigger whose fire window has fully elapsed without the job
/// ever starting. Left behind by process downtime; must be removed rather
/// than left to fire indefinitely.
pub fn is_dangling(spec: &TriggerSpec, fire_at_ms: u64, ever_started: bool, now_ms: u64, misfire_threshold_ms: u64) -> bool {
    spec.is_one_shot() && !ever_started && now_ms > fire_at_ms + misfire_threshold_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TriggerSpec;

    #[test]
    fn test_elapsed_unstarted_one_shot_is_dangling() {
        let spec = TriggerSpec::one_shot("sync", "ADMIN", Some(1_000));
        assert!(is_dangling(&spec, 1_000, false, 3_000, 500));
    }

    #[test]
    fn test_one_shot_within_window_is_not_dangling() {
        let spec = TriggerSpec::one_shot("sync", "ADMIN", Some(1_000));
        assert!(!is_dangling(&spec, 1_000, false, 1_200, 500));
    }

    #[test]
    fn test_started_one_shot_is_not_dangling() {
        let spec = TriggerSpec::one_shot("sync", "ADMIN", Some(1_000));
        assert!(!is_dangling(&spec, 1_000, true, 10_000, 500));
    }

    #[test]
    fn test_recurring_is_never_dangling() {
        let spec = TriggerSpec::recurring("p", "POLICY", Some(1_000), None, 60);
        assert!(!is_dangling(&spec, 1_000, false, 1_000_000, 500));
    }

    #[test]
    fn test_default_listener_proceeds() {
        struct Nop;
        impl TriggerListener for Nop {}
        let key = JobKey::new("p", "POLICY");
        assert_eq!(Nop.trigger_fired(&key), FireDecision::Proceed);
    }
}
