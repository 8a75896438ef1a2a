//! Trigger definitions and fire-time arithmetic.

use std::fmt;

use syncforge_common::error::SyncforgeError;

/// Identifies a job and its triggers within the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    pub fn new(name: &str, group: &str) -> Self {
        Self {
            name: name.to_string(),
            group: group.to_string(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}

/// What to do when a fire time is missed by more than the misfire
/// threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisfirePolicy {
    /// Fire immediately, then return to the normal cadence.
    FireNow,
    /// Skip the missed firing and wait for the next aligned one.
    Skip,
}

/// A registered trigger: start, optional end, frequency, misfire policy.
///
/// `frequency_ms == 0` marks a one-shot trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
    pub key: JobKey,
    pub start_time_ms: Option<u64>,
    pub end_time_ms: Option<u64>,
    pub frequency_ms: u64,
    pub misfire: MisfirePolicy,
}

impl TriggerSpec {
    /// A never-ending (when `end_time_ms` is None) recurring trigger.
    pub fn recurring(
        name: &str,
        group: &str,
        start_time_ms: Option<u64>,
        end_time_ms: Option<u64>,
        frequency_secs: u64,
    ) -> Self {
        Self {
            key: JobKey::new(name, group),
            start_time_ms,
            end_time_ms,
            frequency_ms: frequency_secs * 1000,
            misfire: MisfirePolicy::FireNow,
        }
    }

    /// A trigger that fires exactly once, at `start_time_ms` (or
    /// immediately when None).
    pub fn one_shot(name: &str, group: &str, start_time_ms: Option<u64>) -> Self {
        Self {
            key: JobKey::new(name, group),
            start_time_ms,
            end_time_ms: None,
            frequency_ms: 0,
            misfire: MisfirePolicy::Skip,
        }
    }

    pub fn is_one_shot(&self) -> bool {
        self.frequency_ms == 0
    }

    /// Reject windows that can never fire.
    pub fn validate(&self, now_ms: u64) -> Result<(), SyncforgeError> {
        if let (Some(start), Some(end)) = (self.start_time_ms, self.end_time_ms) {
            if end < start {
                return Err(SyncforgeError::Scheduler(format!(
                    "trigger {} end time precedes start time",
                    self.key
                )));
            }
        }
        if self.is_one_shot() {
            if let Some(start) = self.start_time_ms {
                if start < now_ms {
                    return Err(SyncforgeError::Scheduler(format!(
                        "one-shot trigger {} start time is already in the past",
                        self.key
                    )));
                }
            }
        }
        Ok(())
    }

    /// The first fire time at or after registration.
    pub fn first_fire(&self, now_ms: u64) -> u64 {
        self.start_time_ms.unwrap_or(now_ms)
    }

    /// The fire time after `fired_at`, or None when the trigger is done
    /// (one-shot, or past its end time).
    pub fn next_after(&self, fired_at: u64) -> Option<u64> {
        if self.is_one_shot() {
            return None;
        }
        let next = fired_at + self.frequency_ms;
        match self.end_time_ms {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_display() {
        let key = JobKey::new("daily-backup", "POLICY");
        assert_eq!(key.to_string(), "POLICY/daily-backup");
    }

    #[test]
    fn test_end_before_start_rejected() {
        let spec = TriggerSpec::recurring("p", "POLICY", Some(2_000), Some(1_000), 60);
        assert!(matches!(
            spec.validate(0),
            Err(SyncforgeError::Scheduler(_))
        ));
    }

    #[test]
    fn test_one_shot_in_past_rejected() {
        let spec = TriggerSpec::one_shot("sync", "ADMIN", Some(1_000));
        assert!(spec.validate(5_000).is_err());
        assert!(spec.validate(500).is_ok());
    }

    #[test]
    fn test_recurring_in_past_allowed() {
        // a recurring trigger with a past start simply begins firing now
        let spec = TriggerSpec::recurring("p", "POLICY", Some(1_000), None, 60);
        assert!(spec.validate(5_000).is_ok());
    }

    #[test]
    fn test_one_shot_without_start_allowed() {
        let spec = TriggerSpec::one_shot("sync", "ADMIN", None);
        assert!(spec.validate(5_000).is_ok());
        assert!(spec.is_one_shot());
    }

    #[test]
    fn test_first_fire_defaults_to_now() {
        let spec = TriggerSpec::recurring("p", "POLICY", None, None, 60);
        assert_eq!(spec.first_fire(42_000), 42_000);

        let spec = TriggerSpec::recurring("p", "POLICY", Some(50_000), None, 60);
        assert_eq!(spec.first_fire(42_000), 50_000);
    }

    #[test]
    fn test_next_after_advances_by_frequency() {
        let spec = TriggerSpec::recurring("p", "POLICY", None, None, 60);
        assert_eq!(spec.next_after(100_000), Some(160_000));
    }

    #[test]
    fn test_next_after_respects_end_time() {
        let spec = TriggerSpec::recurring("p", "POLICY", None, Some(150_000), 60);
        assert_eq!(spec.next_after(100_000), None);
        let spec = TriggerSpec::recurring("p", "POLICY", None, Some(200_000), 60);
        assert_eq!(spec.next_after(100_000), Some(160_000));
    }

    #[test]
    fn test_one_shot_has_no_next() {
        let spec = TriggerSpec::one_shot("sync", "ADMIN", Some(1_000));
        assert_eq!(spec.next_after(1_000), None);
    }
}
