//! The policy job orchestrator.
//!
//! Client operations enter here, take the entity lock, read or write the
//! configuration store and mutate triggers in the scheduler. Policy state
//! machine: SUBMITTED -> SCHEDULED <-> SUSPENDED, with SCHEDULED/SUSPENDED
//! -> RETIRED terminal.

use std::sync::Arc;

use tracing::{info, warn};

use syncforge_common::config::SyncforgeConfig;
use syncforge_common::entity::{Entity, Policy, PolicyStatus};
use syncforge_common::error::SyncforgeError;
use syncforge_common::ids::PolicyIdGenerator;
use syncforge_common::instance::Instance;
use syncforge_common::now_millis;
use syncforge_repl::orderer::build_steps;
use syncforge_repl::plugin::PluginRegistry;
use syncforge_repl::snapshot::SnapshotReplicator;
use syncforge_sched::{
    AdminJobRunner, FireDecision, JobDescriptor, JobKey, TriggerListener, TriggerScheduler,
    TriggerSpec,
};
use syncforge_store::{ConfigurationStore, EntityLockManager, RestoreReport};

use crate::executor::{InstanceExecutor, InterruptCache, HANDLER_POLICY_INSTANCE};
use crate::housekeeping::{
    HousekeepingHandler, CLEANUP_JOB_NAME, HANDLER_HOUSEKEEPING, HOUSEKEEPING_GROUP,
};
use crate::instances::InstanceStore;
use crate::peer_sync::{PeerClient, PeerSync, PeerSyncHandler, HANDLER_PEER_SYNC};

/// Scheduler group for policy triggers.
pub const POLICY_GROUP: &str = "POLICY";

/// How often a queued peer-sync job retries delivery, in seconds.
const PEER_SYNC_RETRY_SECS: u64 = 60;

/// Removes triggers whose policy no longer exists in the store.
struct PolicyTriggerListener {
    store: Arc<ConfigurationStore>,
}

impl TriggerListener for PolicyTriggerListener {
    fn trigger_fired(&self, key: &JobKey) -> FireDecision {
        if key.group != POLICY_GROUP {
            return FireDecision::Proceed;
        }
        match self.store.get_policy(&key.name) {
            Some(policy) if !policy.is_retired() => FireDecision::Proceed,
            _ => {
                warn!(policy = %key.name, "policy gone or retired, removing trigger");
                FireDecision::RemoveTrigger
            }
        }
    }
}

/// Wires the orchestrator and registers its handlers with the scheduler.
pub struct OrchestratorBuilder {
    config: SyncforgeConfig,
    store: Arc<ConfigurationStore>,
    scheduler: Arc<TriggerScheduler>,
    replicator: Arc<SnapshotReplicator>,
    plugins: Arc<PluginRegistry>,
    peer_client: Option<Arc<dyn PeerClient>>,
}

impl OrchestratorBuilder {
    pub fn new(
        config: SyncforgeConfig,
        store: Arc<ConfigurationStore>,
        scheduler: Arc<TriggerScheduler>,
        replicator: Arc<SnapshotReplicator>,
    ) -> Self {
        Self {
            config,
            store,
            scheduler,
            replicator,
            plugins: Arc::new(PluginRegistry::new()),
            peer_client: None,
        }
    }

    /// Install the explicit plugin registration table.
    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = Arc::new(plugins);
        self
    }

    /// Install the client used to mirror operations to the paired cluster.
    pub fn with_peer_client(mut self, client: Arc<dyn PeerClient>) -> Self {
        self.peer_client = Some(client);
        self
    }

    pub fn build(self) -> PolicyJobOrchestrator {
        let instances = Arc::new(InstanceStore::new());
        let interrupts = Arc::new(InterruptCache::new());

        let executor = InstanceExecutor::new(
            self.store.clone(),
            instances.clone(),
            interrupts.clone(),
            self.replicator,
            self.plugins.clone(),
        );
        self.scheduler
            .register_handler(HANDLER_POLICY_INSTANCE, Arc::new(executor));
        self.scheduler.set_listener(Arc::new(PolicyTriggerListener {
            store: self.store.clone(),
        }));

        let housekeeping = HousekeepingHandler::new(
            self.store.clone(),
            instances.clone(),
            self.config.housekeeping.retired_older_than_days,
        );
        self.scheduler
            .register_handler(HANDLER_HOUSEKEEPING, Arc::new(housekeeping));

        let admin = Arc::new(AdminJobRunner::new(self.scheduler.clone()));
        let peer_sync = self.peer_client.map(|client| {
            self.scheduler
                .register_handler(HANDLER_PEER_SYNC, Arc::new(PeerSyncHandler::new(client)));
            PeerSync::new(admin.clone(), PEER_SYNC_RETRY_SECS)
        });

        let ids = PolicyIdGenerator::new(self.config.server.server_index, now_millis());
        PolicyJobOrchestrator {
            config: self.config,
            store: self.store,
            locks: Arc::new(EntityLockManager::new()),
            scheduler: self.scheduler,
            admin,
            plugins: self.plugins,
            instances,
            interrupts,
            ids,
            peer_sync,
        }
    }
}

/// Top-level coordinator for the policy lifecycle.
pub struct PolicyJobOrchestrator {
    config: SyncforgeConfig,
    store: Arc<ConfigurationStore>,
    locks: Arc<EntityLockManager>,
    scheduler: Arc<TriggerScheduler>,
    admin: Arc<AdminJobRunner>,
    plugins: Arc<PluginRegistry>,
    instances: Arc<InstanceStore>,
    interrupts: Arc<InterruptCache>,
    ids: PolicyIdGenerator,
    peer_sync: Option<PeerSync>,
}

impl PolicyJobOrchestrator {
    /// Restore the store, re-register triggers for restored policies,
    /// schedule housekeeping and start the scheduler.
    pub async fn start(&self) -> Result<RestoreReport, SyncforgeError> {
        let report = self.store.restore().await?;

        for entity in self.store.entities(syncforge_common::entity::EntityType::Policy) {
            let Entity::Policy(policy) = entity else {
                continue;
            };
            match policy.status {
                PolicyStatus::Scheduled | PolicyStatus::Suspended => {
                    // policies scheduled earlier in this process already
                    // have a live trigger
                    if self.scheduler.check_exists(&policy.name, POLICY_GROUP) {
                        continue;
                    }
                    self.register_trigger(&policy)?;
                    if policy.status == PolicyStatus::Suspended {
                        self.scheduler.suspend(&policy.name, POLICY_GROUP)?;
                    }
                }
                PolicyStatus::Submitted | PolicyStatus::Retired => {}
            }
        }

        self.admin.check_and_schedule(
            JobDescriptor::new(CLEANUP_JOB_NAME, HOUSEKEEPING_GROUP, HANDLER_HOUSEKEEPING),
            self.config.housekeeping.cleanup_frequency_hours * 3600,
        )?;

        self.scheduler.start();
        info!(
            clusters = report.clusters,
            policies = report.policies,
            "orchestrator started"
        );
        Ok(report)
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        info!("orchestrator shut down");
    }

    /// Register a cluster definition.
    pub fn submit_cluster(&self, cluster: syncforge_common::entity::Cluster) -> Result<(), SyncforgeError> {
        cluster.validate()?;
        let name = cluster.name.clone();
        if !self.locks.acquire(&name, "SUBMIT_CLUSTER") {
            return Err(SyncforgeError::LockContention(name));
        }
        let result = self.store.publish(Entity::Cluster(cluster));
        self.locks.release(&name);
        result
    }

    /// Validate and persist a new policy. Fails with AlreadyExists when a
    /// policy of the same name is registered.
    pub fn submit(&self, policy: Policy) -> Result<Policy, SyncforgeError> {
        policy.validate(self.config.scheduler.min_frequency_secs)?;
        let source = self
            .store
            .get_cluster(&policy.source_cluster)
            .ok_or_else(|| {
                SyncforgeError::Validation(format!(
                    "source cluster {} is not registered",
                    policy.source_cluster
                ))
            })?;
        if self.store.get_cluster(&policy.target_cluster).is_none() {
            return Err(SyncforgeError::Validation(format!(
                "target cluster {} is not registered",
                policy.target_cluster
            )));
        }

        let name = policy.name.clone();
        if !self.locks.acquire(&name, "SUBMIT") {
            return Err(SyncforgeError::LockContention(name));
        }
        let result = self.do_submit(policy, &source.data_center, &source.name);
        self.locks.release(&name);
        result
    }

    fn do_submit(
        &self,
        mut policy: Policy,
        data_center: &str,
        cluster_name: &str,
    ) -> Result<Policy, SyncforgeError> {
        policy.id = self.ids.generate(data_center, cluster_name, &policy.name);
        policy.status = PolicyStatus::Submitted;
        policy.retirement_time_ms = None;
        self.store.publish(Entity::Policy(policy.clone()))?;
        info!(policy = %policy.name, id = %policy.id, "policy submitted");
        Ok(policy)
    }

    /// Register the recurring trigger and transition SUBMITTED -> SCHEDULED.
    pub fn schedule(&self, name: &str) -> Result<(), SyncforgeError> {
        if !self.locks.acquire(name, "SCHEDULE") {
            return Err(SyncforgeError::LockContention(name.to_string()));
        }
        let result = self.do_schedule(name);
        self.locks.release(name);
        result
    }

    fn do_schedule(&self, name: &str) -> Result<(), SyncforgeError> {
        let policy = self
            .store
            .get_policy(name)
            .ok_or_else(|| SyncforgeError::NotFound(format!("policy {name}")))?;
        if policy.status != PolicyStatus::Submitted {
            return Err(SyncforgeError::Validation(format!(
                "policy {name} is {}, expected SUBMITTED",
                policy.status
            )));
        }

        // Step templates are static per policy; building them here surfaces
        // a cyclic plugin dependency before any instance runs.
        build_steps(&policy, self.plugins())?;

        let prior = policy.status;
        self.update_policy(name, |p| p.status = PolicyStatus::Scheduled)?;
        if let Err(e) = self.register_trigger(&policy) {
            // roll the record back to its prior status
            warn!(policy = %name, error = %e, "trigger registration failed, rolling back");
            let _ = self.update_policy(name, |p| p.status = prior);
            self.scheduler.delete(name, POLICY_GROUP);
            return Err(e);
        }
        info!(policy = %name, "policy scheduled");
        Ok(())
    }

    fn register_trigger(&self, policy: &Policy) -> Result<(), SyncforgeError> {
        self.scheduler.add_job(
            JobDescriptor::new(&policy.name, POLICY_GROUP, HANDLER_POLICY_INSTANCE),
            true,
        )?;
        let spec = TriggerSpec::recurring(
            &policy.name,
            POLICY_GROUP,
            policy.start_time_ms,
            policy.end_time_ms,
            policy.frequency_secs,
        );
        self.scheduler.schedule(spec)?;
        Ok(())
    }

    /// Pause the policy's trigger. Idempotent.
    pub fn suspend(&self, name: &str) -> Result<(), SyncforgeError> {
        if !self.locks.acquire(name, "SUSPEND") {
            return Err(SyncforgeError::LockContention(name.to_string()));
        }
        let result = self.do_suspend(name);
        self.locks.release(name);
        result
    }

    fn do_suspend(&self, name: &str) -> Result<(), SyncforgeError> {
        let policy = self
            .store
            .get_policy(name)
            .ok_or_else(|| SyncforgeError::NotFound(format!("policy {name}")))?;
        match policy.status {
            PolicyStatus::Suspended => Ok(()),
            PolicyStatus::Scheduled => {
                self.scheduler.suspend(name, POLICY_GROUP)?;
                self.update_policy(name, |p| p.status = PolicyStatus::Suspended)?;
                self.queue_status_sync(name, PolicyStatus::Suspended);
                info!(policy = %name, "policy suspended");
                Ok(())
            }
            other => Err(SyncforgeError::Validation(format!(
                "cannot suspend policy {name} in state {other}"
            ))),
        }
    }

    /// Resume a suspended policy's trigger. Idempotent.
    pub fn resume(&self, name: &str) -> Result<(), SyncforgeError> {
        if !self.locks.acquire(name, "RESUME") {
            return Err(SyncforgeError::LockContention(name.to_string()));
        }
        let result = self.do_resume(name);
        self.locks.release(name);
        result
    }

    fn do_resume(&self, name: &str) -> Result<(), SyncforgeError> {
        let policy = self
            .store
            .get_policy(name)
            .ok_or_else(|| SyncforgeError::NotFound(format!("policy {name}")))?;
        match policy.status {
            PolicyStatus::Scheduled => Ok(()),
            PolicyStatus::Suspended => {
                self.scheduler.resume(name, POLICY_GROUP)?;
                self.update_policy(name, |p| p.status = PolicyStatus::Scheduled)?;
                self.queue_status_sync(name, PolicyStatus::Scheduled);
                info!(policy = %name, "policy resumed");
                Ok(())
            }
            other => Err(SyncforgeError::Validation(format!(
                "cannot resume policy {name} in state {other}"
            ))),
        }
    }

    /// Delete the trigger and retire the policy. The record is kept with a
    /// retirement timestamp for asynchronous housekeeping.
    pub fn delete(&self, name: &str) -> Result<(), SyncforgeError> {
        if !self.locks.acquire(name, "DELETE") {
            return Err(SyncforgeError::LockContention(name.to_string()));
        }
        let result = self.do_delete(name);
        self.locks.release(name);
        result
    }

    fn do_delete(&self, name: &str) -> Result<(), SyncforgeError> {
        let policy = self
            .store
            .get_policy(name)
            .ok_or_else(|| SyncforgeError::NotFound(format!("policy {name}")))?;
        if policy.is_retired() {
            return Ok(());
        }
        self.scheduler.delete(name, POLICY_GROUP);
        self.update_policy(name, |p| p.retire(now_millis()))?;
        self.queue_delete_sync(name);
        info!(policy = %name, "policy retired");
        Ok(())
    }

    pub fn get_policy(&self, name: &str) -> Result<Policy, SyncforgeError> {
        self.store
            .get_policy(name)
            .ok_or_else(|| SyncforgeError::NotFound(format!("policy {name}")))
    }

    pub fn get_status(&self, name: &str) -> Result<PolicyStatus, SyncforgeError> {
        Ok(self.get_policy(name)?.status)
    }

    /// Instances of one policy, most recent first.
    pub fn list_instances(&self, name: &str) -> Result<Vec<Instance>, SyncforgeError> {
        self.get_policy(name)?;
        Ok(self.instances.list_for_policy(name))
    }

    /// Signal interruption of the policy's running instance; when none is
    /// running yet, register the interrupt so the next instance start
    /// observes it.
    pub fn abort_instance(&self, name: &str) -> Result<bool, SyncforgeError> {
        self.get_policy(name)?;
        if self.scheduler.interrupt(name, POLICY_GROUP) {
            return Ok(true);
        }
        Ok(self.interrupts.register(name))
    }

    /// The entity lock registry, for surfacing in-progress operations.
    pub fn entity_locks(&self) -> Arc<EntityLockManager> {
        self.locks.clone()
    }

    fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    fn update_policy<F: FnOnce(&mut Policy)>(
        &self,
        name: &str,
        mutate: F,
    ) -> Result<(), SyncforgeError> {
        let entity = self
            .store
            .get(syncforge_common::entity::EntityType::Policy, name)
            .ok_or_else(|| SyncforgeError::NotFound(format!("policy {name}")))?;
        let mut staged = self.store.initiate_update(entity)?;
        if let Entity::Policy(policy) = staged.entity_mut() {
            mutate(policy);
        }
        self.store.commit_update(staged)
    }

    fn queue_status_sync(&self, name: &str, status: PolicyStatus) {
        if let Some(sync) = &self.peer_sync {
            if let Err(e) = sync.queue_status(name, status) {
                warn!(policy = %name, error = %e, "unable to queue status sync");
            }
        }
    }

    fn queue_delete_sync(&self, name: &str) {
        if let Some(sync) = &self.peer_sync {
            if let Err(e) = sync.queue_delete(name) {
                warn!(policy = %name, error = %e, "unable to queue delete sync");
            }
        }
    }
}
