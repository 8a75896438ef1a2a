//! Replication steps and the per-instance job context.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kinds of work a step can perform. The step vocabulary is fixed; this is
/// not a general workflow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    /// The core snapshot-diff incremental copy.
    SnapshotCopy,
    /// Plugin metadata export against the source cluster.
    PluginExport,
    /// Plugin metadata import against the target cluster.
    PluginImport,
}

/// Well-known property keys carried in step property bags.
pub mod step_keys {
    pub const PLUGIN_NAME: &str = "pluginName";
    pub const SOURCE_CLUSTER: &str = "sourceCluster";
    pub const TARGET_CLUSTER: &str = "targetCluster";
    pub const SOURCE_DATASET: &str = "sourceDataset";
    pub const TARGET_DATASET: &str = "targetDataset";
    /// Staging path produced by an export step, consumed by the matching import.
    pub const STAGING_PATH: &str = "stagingPath";
}

/// A named, typed unit of work with a property bag. Step templates are
/// static per policy; only the job context varies per instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationStep {
    pub name: String,
    pub kind: StepKind,
    pub properties: HashMap<String, String>,
}

impl ReplicationStep {
    pub fn new(name: &str, kind: StepKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|s| s.as_str())
    }
}

/// Mutable key/value state threaded through the steps of a single instance.
/// Scoped to one instance and discarded at completion.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub instance_id: String,
    values: HashMap<String, String>,
    interrupt: Arc<AtomicBool>,
}

impl JobContext {
    pub fn new(instance_id: &str) -> Self {
        Self::with_interrupt(instance_id, Arc::new(AtomicBool::new(false)))
    }

    /// A context sharing an externally owned interrupt flag (e.g. the
    /// scheduler's per-job flag).
    pub fn with_interrupt(instance_id: &str, interrupt: Arc<AtomicBool>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            values: HashMap::new(),
            interrupt,
        }
    }

    pub fn put(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Shared flag polled at safe points by long-running steps.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn trigger_interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn should_interrupt(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_property_bag() {
        let step = ReplicationStep::new("snapshot-copy", StepKind::SnapshotCopy)
            .with_property(step_keys::SOURCE_DATASET, "/data/a")
            .with_property(step_keys::TARGET_DATASET, "/data/b");
        assert_eq!(step.property(step_keys::SOURCE_DATASET), Some("/data/a"));
        assert_eq!(step.property("missing"), None);
    }

    #[test]
    fn test_context_put_get() {
        let mut ctx = JobContext::new("instance-1");
        assert_eq!(ctx.get(step_keys::STAGING_PATH), None);
        ctx.put(step_keys::STAGING_PATH, "/staging/atlas/1");
        assert_eq!(ctx.get(step_keys::STAGING_PATH), Some("/staging/atlas/1"));
    }

    #[test]
    fn test_interrupt_flag_is_shared() {
        let ctx = JobContext::new("instance-1");
        let flag = ctx.interrupt_flag();
        assert!(!ctx.should_interrupt());
        flag.store(true, Ordering::SeqCst);
        assert!(ctx.should_interrupt());
    }

    #[test]
    fn test_trigger_interrupt_visible_through_clone_of_flag() {
        let ctx = JobContext::new("instance-1");
        let flag = ctx.interrupt_flag();
        ctx.trigger_interrupt();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_step_serde_round_trip() {
        let step = ReplicationStep::new("atlas-export", StepKind::PluginExport)
            .with_property(step_keys::PLUGIN_NAME, "atlas");
        let json = serde_json::to_string(&step).unwrap();
        let back: ReplicationStep = serde_json::from_str(&json).unwrap();
        assert_eq!(step, back);
    }
}
