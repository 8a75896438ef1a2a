//! In-memory registry of instance records.
//!
//! Instances are kept for status queries and audit until housekeeping
//! purges them together with their retired policy.

use std::sync::Mutex;

use syncforge_common::instance::{Instance, InstanceStatus};

/// Registry of all instance records known to this server process.
#[derive(Debug, Default)]
pub struct InstanceStore {
    instances: Mutex<Vec<Instance>>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, instance: Instance) {
        self.instances.lock().unwrap().push(instance);
    }

    /// Replace the record with the same id.
    pub fn update(&self, instance: Instance) {
        let mut instances = self.instances.lock().unwrap();
        if let Some(existing) = instances.iter_mut().find(|i| i.id == instance.id) {
            *existing = instance;
        }
    }

    pub fn get(&self, instance_id: &str) -> Option<Instance> {
        self.instances
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.id == instance_id)
            .cloned()
    }

    /// Instances of one policy, most recent first.
    pub fn list_for_policy(&self, policy_name: &str) -> Vec<Instance> {
        let mut matching: Vec<Instance> = self
            .instances
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.policy_name == policy_name)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.start_time_ms.cmp(&a.start_time_ms));
        matching
    }

    /// True when an instance of this policy is still running.
    pub fn has_running(&self, policy_name: &str) -> bool {
        self.instances
            .lock()
            .unwrap()
            .iter()
            .any(|i| i.policy_name == policy_name && i.status == InstanceStatus::Running)
    }

    /// Drop all records of one policy. Returns how many were removed.
    pub fn purge_for_policy(&self, policy_name: &str) -> usize {
        let mut instances = self.instances.lock().unwrap();
        let before = instances.len();
        instances.retain(|i| i.policy_name != policy_name);
        before - instances.len()
    }

    pub fn count(&self) -> usize {
        self.instances.lock().unwrap().len()
    }
}
