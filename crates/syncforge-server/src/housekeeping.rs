//! Periodic cleanup of retired policies and their instance records.
//!
//! Delete only retires a policy; the hard purge happens here, once the
//! record is older than the configured retirement age.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use syncforge_common::entity::{Entity, EntityType};
use syncforge_common::error::SyncforgeError;
use syncforge_common::now_millis;
use syncforge_sched::{JobHandler, JobOutcome, JobRun};
use syncforge_store::ConfigurationStore;

use crate::instances::InstanceStore;

/// Scheduler group for the cleanup job.
pub const HOUSEKEEPING_GROUP: &str = "HOUSEKEEPING";
/// Handler-registry key for the cleanup handler.
pub const HANDLER_HOUSEKEEPING: &str = "store-cleanup";
/// Job name of the recurring cleanup registration.
pub const CLEANUP_JOB_NAME: &str = "retired-cleanup";

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Purges policies retired longer ago than the retirement age, together
/// with their instances.
pub struct HousekeepingHandler {
    store: Arc<ConfigurationStore>,
    instances: Arc<InstanceStore>,
    retired_older_than_ms: u64,
}

impl HousekeepingHandler {
    pub fn new(
        store: Arc<ConfigurationStore>,
        instances: Arc<InstanceStore>,
        retired_older_than_days: u64,
    ) -> Self {
        Self {
            store,
            instances,
            retired_older_than_ms: retired_older_than_days * DAY_MS,
        }
    }

    /// One cleanup pass. Returns the number of policies purged.
    pub fn run_once(&self, now_ms: u64) -> Result<usize, SyncforgeError> {
        let cleanup_before = now_ms.saturating_sub(self.retired_older_than_ms);
        let mut purged = 0;
        for entity in self.store.entities(EntityType::Policy) {
            let Entity::Policy(policy) = entity else {
                continue;
            };
            let Some(retired_at) = policy.retirement_time_ms else {
                continue;
            };
            if !policy.is_retired() || retired_at > cleanup_before {
                continue;
            }
            let removed_instances = self.instances.purge_for_policy(&policy.name);
            self.store.remove(EntityType::Policy, &policy.name)?;
            info!(
                policy = %policy.name,
                instances = removed_instances,
                "purged retired policy"
            );
            purged += 1;
        }
        Ok(purged)
    }
}

#[async_trait]
impl JobHandler for HousekeepingHandler {
    async fn execute(&self, _run: JobRun) -> Result<JobOutcome, SyncforgeError> {
        let purged = self.run_once(now_millis())?;
        if purged > 0 {
            info!(purged, "housekeeping pass finished");
        }
        Ok(JobOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use syncforge_common::entity::Policy;
    use syncforge_common::instance::Instance;

    fn store() -> (tempfile::TempDir, Arc<ConfigurationStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ConfigurationStore::open(dir.path().to_path_buf(), 4, Duration::from_secs(30))
                .unwrap(),
        );
        (dir, store)
    }

    fn retired_policy(name: &str, retired_at: u64) -> Entity {
        let mut policy = Policy::new(name, "src", "dst");
        policy.source_dataset = "/data".to_string();
        policy.target_dataset = "/data".to_string();
        policy.retire(retired_at);
        Entity::Policy(policy)
    }

    #[test]
    fn test_old_retired_policy_is_purged_with_instances() {
        let (_dir, store) = store();
        let instances = Arc::new(InstanceStore::new());
        let now = 100 * DAY_MS;

        store.publish(retired_policy("old", 10 * DAY_MS)).unwrap();
        instances.insert(Instance::new("id", "old", 10 * DAY_MS));

        let handler = HousekeepingHandler::new(store.clone(), instances.clone(), 7);
        let purged = handler.run_once(now).unwrap();

        assert_eq!(purged, 1);
        assert!(store.get_policy("old").is_none());
        assert_eq!(instances.count(), 0);
    }

    #[test]
    fn test_recently_retired_policy_is_kept() {
        let (_dir, store) = store();
        let instances = Arc::new(InstanceStore::new());
        let now = 100 * DAY_MS;

        store.publish(retired_policy("fresh", now - DAY_MS)).unwrap();

        let handler = HousekeepingHandler::new(store.clone(), instances, 7);
        let purged = handler.run_once(now).unwrap();

        assert_eq!(purged, 0);
        assert!(store.get_policy("fresh").is_some());
    }

    #[test]
    fn test_active_policy_is_never_purged() {
        let (_dir, store) = store();
        let instances = Arc::new(InstanceStore::new());

        let mut policy = Policy::new("active", "src", "dst");
        policy.source_dataset = "/data".to_string();
        policy.target_dataset = "/data".to_string();
        store.publish(Entity::Policy(policy)).unwrap();

        let handler = HousekeepingHandler::new(store.clone(), instances, 0);
        let purged = handler.run_once(now_millis()).unwrap();

        assert_eq!(purged, 0);
        assert!(store.get_policy("active").is_some());
    }

    #[test]
    fn test_zero_retention_purges_immediately() {
        let (_dir, store) = store();
        let instances = Arc::new(InstanceStore::new());
        let now = now_millis();

        store.publish(retired_policy("gone", now - 1)).unwrap();
        let handler = HousekeepingHandler::new(store.clone(), instances, 0);
        assert_eq!(handler.run_once(now).unwrap(), 1);
    }
}
