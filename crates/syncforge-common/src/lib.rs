//! Syncforge shared types: error taxonomy, runtime configuration, replication
//! entities (policies, clusters), instance records, job steps and the policy
//! id generator.

pub mod config;
pub mod entity;
pub mod error;
pub mod ids;
pub mod instance;
pub mod job;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
