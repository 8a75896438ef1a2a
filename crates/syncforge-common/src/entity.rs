//! Replication entities: clusters and policies.
//!
//! Both are owned by the configuration store and persisted as one JSON
//! record per entity. Clusters must be registered before any policy that
//! references them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::SyncforgeError;

/// Entity types persisted by the configuration store, in restore order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Cluster,
    Policy,
}

impl EntityType {
    /// Restore order: clusters are loaded before the policies that
    /// reference them.
    pub const LOAD_ORDER: [EntityType; 2] = [EntityType::Cluster, EntityType::Policy];

    /// Directory name under the store root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            EntityType::Cluster => "CLUSTER",
            EntityType::Policy => "POLICY",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A registered cluster endpoint pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub data_center: String,
    /// Filesystem endpoint (e.g. hdfs://nn:8020).
    pub fs_endpoint: String,
    /// Peer orchestrator endpoint used for cross-cluster sync.
    pub peer_endpoint: String,
    pub tags: Vec<String>,
}

impl Cluster {
    pub fn new(name: &str, data_center: &str, fs_endpoint: &str, peer_endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            data_center: data_center.to_string(),
            fs_endpoint: fs_endpoint.to_string(),
            peer_endpoint: peer_endpoint.to_string(),
            tags: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), SyncforgeError> {
        if !is_valid_entity_name(&self.name) {
            return Err(SyncforgeError::Validation(format!(
                "invalid cluster name: {:?}",
                self.name
            )));
        }
        if self.fs_endpoint.is_empty() {
            return Err(SyncforgeError::Validation(
                "cluster fs_endpoint must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounded retry behavior for failed replication steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySpec {
    /// Maximum attempts per step, including the first.
    pub attempts: u32,
    /// Delay between attempts, in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 120_000,
        }
    }
}

/// Snapshot retention parameters for one side of a replication pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSpec {
    /// Snapshots older than this are eviction candidates, in milliseconds.
    pub age_limit_ms: u64,
    /// Hard floor: at least this many snapshots always survive.
    pub retain_count: usize,
}

impl Default for RetentionSpec {
    fn default() -> Self {
        Self {
            age_limit_ms: 3 * 24 * 60 * 60 * 1000,
            retain_count: 3,
        }
    }
}

/// Lifecycle status of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyStatus {
    Submitted,
    Scheduled,
    Suspended,
    /// Soft-deleted; kept for asynchronous housekeeping.
    Retired,
}

impl fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyStatus::Submitted => "SUBMITTED",
            PolicyStatus::Scheduled => "SCHEDULED",
            PolicyStatus::Suspended => "SUSPENDED",
            PolicyStatus::Retired => "RETIRED",
        };
        f.write_str(s)
    }
}

/// A declarative source-to-target replication relationship and its schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Globally unique id assigned at submit; empty until then.
    pub id: String,
    pub name: String,
    pub source_cluster: String,
    pub target_cluster: String,
    pub source_dataset: String,
    pub target_dataset: String,
    pub frequency_secs: u64,
    pub start_time_ms: Option<u64>,
    pub end_time_ms: Option<u64>,
    pub retry: RetrySpec,
    pub source_retention: RetentionSpec,
    pub target_retention: RetentionSpec,
    /// Names of plugins enabled for this policy; empty means all registered.
    pub plugins: Vec<String>,
    /// Maximum parallel copy tasks handed to the bulk-copy engine.
    pub max_maps: u32,
    /// Per-task bandwidth cap handed to the bulk-copy engine, in MB/s.
    pub bandwidth_mb: u32,
    pub status: PolicyStatus,
    pub retirement_time_ms: Option<u64>,
    /// Free-form properties forwarded into step property bags.
    pub custom_properties: HashMap<String, String>,
}

impl Policy {
    pub fn new(name: &str, source_cluster: &str, target_cluster: &str) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            source_cluster: source_cluster.to_string(),
            target_cluster: target_cluster.to_string(),
            source_dataset: String::new(),
            target_dataset: String::new(),
            frequency_secs: 24 * 60 * 60,
            start_time_ms: None,
            end_time_ms: None,
            retry: RetrySpec::default(),
            source_retention: RetentionSpec::default(),
            target_retention: RetentionSpec::default(),
            plugins: Vec::new(),
            max_maps: 5,
            bandwidth_mb: 100,
            status: PolicyStatus::Submitted,
            retirement_time_ms: None,
            custom_properties: HashMap::new(),
        }
    }

    /// Reject malformed definitions before any state change.
    pub fn validate(&self, min_frequency_secs: u64) -> Result<(), SyncforgeError> {
        if !is_valid_entity_name(&self.name) {
            return Err(SyncforgeError::Validation(format!(
                "invalid policy name: {:?}",
                self.name
            )));
        }
        if self.frequency_secs < min_frequency_secs {
            return Err(SyncforgeError::Validation(format!(
                "frequency {}s is below the minimum of {}s",
                self.frequency_secs, min_frequency_secs
            )));
        }
        if self.source_cluster.is_empty() || self.target_cluster.is_empty() {
            return Err(SyncforgeError::Validation(
                "source and target clusters are required".to_string(),
            ));
        }
        if self.source_dataset.is_empty() || self.target_dataset.is_empty() {
            return Err(SyncforgeError::Validation(
                "source and target datasets are required".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_time_ms, self.end_time_ms) {
            if end <= start {
                return Err(SyncforgeError::Validation(
                    "policy end time must be after start time".to_string(),
                ));
            }
        }
        if self.retry.attempts == 0 {
            return Err(SyncforgeError::Validation(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_retired(&self) -> bool {
        self.status == PolicyStatus::Retired
    }

    /// Mark the policy retired at the given instant.
    pub fn retire(&mut self, now_ms: u64) {
        self.status = PolicyStatus::Retired;
        self.retirement_time_ms = Some(now_ms);
    }
}

/// The union of all persisted entities, keyed by (type, name) in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Entity {
    Cluster(Cluster),
    Policy(Policy),
}

impl Entity {
    pub fn name(&self) -> &str {
        match self {
            Entity::Cluster(c) => &c.name,
            Entity::Policy(p) => &p.name,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Entity::Cluster(_) => EntityType::Cluster,
            Entity::Policy(_) => EntityType::Policy,
        }
    }
}

fn is_valid_entity_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
