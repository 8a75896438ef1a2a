//! Instance records: one per policy execution.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one policy execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Running,
    Succeeded,
    Failed,
    Killed,
    /// Skipped because a previous instance of the same policy was still running.
    Ignored,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceStatus::Running)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Succeeded => "SUCCEEDED",
            InstanceStatus::Failed => "FAILED",
            InstanceStatus::Killed => "KILLED",
            InstanceStatus::Ignored => "IGNORED",
        };
        f.write_str(s)
    }
}

/// Outcome of one step within an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Succeeded,
    Failed,
    Killed,
}

/// Record of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub status: StepStatus,
    pub message: String,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    /// Attempts consumed, including the successful one.
    pub attempts: u32,
}

/// One concrete execution of a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub policy_id: String,
    pub policy_name: String,
    pub status: InstanceStatus,
    pub message: String,
    pub start_time_ms: u64,
    pub end_time_ms: Option<u64>,
    pub steps: Vec<StepResult>,
}

impl Instance {
    pub fn new(policy_id: &str, policy_name: &str, start_time_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            policy_id: policy_id.to_string(),
            policy_name: policy_name.to_string(),
            status: InstanceStatus::Running,
            message: String::new(),
            start_time_ms,
            end_time_ms: None,
            steps: Vec::new(),
        }
    }

    /// Record the terminal status with a human-readable message.
    pub fn finish(&mut self, status: InstanceStatus, message: &str, end_time_ms: u64) {
        self.status = status;
        self.message = message.to_string();
        self.end_time_ms = Some(end_time_ms);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn record_step(&mut self, step: StepResult) {
        self.steps.push(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_instance_is_running() {
        let instance = Instance::new("/dc1/c1/p1/0/1000/000000001", "p1", 5_000);
        assert_eq!(instance.status, InstanceStatus::Running);
        assert!(!instance.is_terminal());
        assert!(instance.end_time_ms.is_none());
        assert!(!instance.id.is_empty());
    }

    #[test]
    fn test_instance_ids_are_unique() {
        let a = Instance::new("p", "p", 0);
        let b = Instance::new("p", "p", 0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_finish_records_terminal_status() {
        let mut instance = Instance::new("p", "p", 5_000);
        instance.finish(InstanceStatus::Succeeded, "all steps succeeded", 9_000);
        assert!(instance.is_terminal());
        assert_eq!(instance.status, InstanceStatus::Succeeded);
        assert_eq!(instance.end_time_ms, Some(9_000));
        assert_eq!(instance.message, "all steps succeeded");
    }

    #[test]
    fn test_all_non_running_statuses_are_terminal() {
        assert!(InstanceStatus::Succeeded.is_terminal());
        assert!(InstanceStatus::Failed.is_terminal());
        assert!(InstanceStatus::Killed.is_terminal());
        assert!(InstanceStatus::Ignored.is_terminal());
        assert!(!InstanceStatus::Running.is_terminal());
    }

    #[test]
    fn test_record_step_preserves_order() {
        let mut instance = Instance::new("p", "p", 0);
        for name in ["ranger-export", "snapshot-copy", "ranger-import"] {
            instance.record_step(StepResult {
                step_name: name.to_string(),
                status: StepStatus::Succeeded,
                message: String::new(),
                start_time_ms: 0,
                end_time_ms: 1,
                attempts: 1,
            });
        }
        let names: Vec<&str> = instance.steps.iter().map(|s| s.step_name.as_str()).collect();
        assert_eq!(names, vec!["ranger-export", "snapshot-copy", "ranger-import"]);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(InstanceStatus::Ignored.to_string(), "IGNORED");
        assert_eq!(InstanceStatus::Killed.to_string(), "KILLED");
    }
}
