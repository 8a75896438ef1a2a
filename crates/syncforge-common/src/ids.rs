//! Policy id generation.
//!
//! Ids have the persisted, user-visible format
//! `/<dataCenter>/<clusterName>/<policyName>/<serverIndex>/<serverStartTimeMillis>/<counter>`
//! where the counter is zero-padded to nine digits, increments per server
//! process lifetime and is never reused.

use std::sync::atomic::{AtomicU64, Ordering};

const COUNTER_WIDTH: usize = 9;

/// Generates unique, monotonically increasing policy ids for one server
/// process.
#[derive(Debug)]
pub struct PolicyIdGenerator {
    server_index: u32,
    server_start_time_ms: u64,
    counter: AtomicU64,
}

impl PolicyIdGenerator {
    pub fn new(server_index: u32, server_start_time_ms: u64) -> Self {
        Self {
            server_index,
            server_start_time_ms,
            counter: AtomicU64::new(1),
        }
    }

    /// Produce the next policy id.
    pub fn generate(&self, data_center: &str, cluster_name: &str, policy_name: &str) -> String {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        format!(
            "/{}/{}/{}/{}/{}/{:0width$}",
            data_center,
            cluster_name,
            policy_name,
            self.server_index,
            self.server_start_time_ms,
            counter,
            width = COUNTER_WIDTH
        )
    }

    /// Counter value the next id will carry.
    pub fn next_counter(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

/// Extract the counter field from a generated policy id.
pub fn id_counter(policy_id: &str) -> Option<u64> {
    policy_id.rsplit('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_format() {
        let ids = PolicyIdGenerator::new(0, 1_700_000_000_000);
        let id = ids.generate("dc1", "primary", "daily-backup");
        assert_eq!(id, "/dc1/primary/daily-backup/0/1700000000000/000000001");
    }

    #[test]
    fn test_counter_is_strictly_increasing_and_padded() {
        let ids = PolicyIdGenerator::new(1, 42);
        let mut previous = 0;
        for _ in 0..5 {
            let id = ids.generate("dc1", "primary", "p");
            let counter_field = id.rsplit('/').next().unwrap();
            assert_eq!(counter_field.len(), 9);
            let counter: u64 = counter_field.parse().unwrap();
            assert!(counter > previous);
            previous = counter;
        }
    }

    #[test]
    fn test_counter_never_reused_across_policies() {
        let ids = PolicyIdGenerator::new(0, 42);
        let a = id_counter(&ids.generate("dc1", "c1", "policy-a")).unwrap();
        let b = id_counter(&ids.generate("dc2", "c2", "policy-b")).unwrap();
        assert_ne!(a, b);
        assert_eq!(b, a + 1);
    }

    #[test]
    fn test_id_counter_parse() {
        assert_eq!(
            id_counter("/dc1/primary/p/0/1700000000000/000000042"),
            Some(42)
        );
        assert_eq!(id_counter("not-an-id"), None);
    }

    #[test]
    fn test_next_counter_starts_at_one() {
        let ids = PolicyIdGenerator::new(0, 0);
        assert_eq!(ids.next_counter(), 1);
        ids.generate("dc", "c", "p");
        assert_eq!(ids.next_counter(), 2);
    }
}
