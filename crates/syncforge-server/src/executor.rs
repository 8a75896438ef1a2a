//! Instance execution: runs the ordered step list for one trigger fire.
//!
//! Each fire produces a new instance and job context. Step failures are
//! retried per the policy retry spec (synchronous, fixed delay, bounded
//! attempts); interruption is observed between steps and before every
//! retry, and the instance always ends in a terminal status.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, warn};

use syncforge_common::entity::Policy;
use syncforge_common::error::SyncforgeError;
use syncforge_common::instance::{Instance, InstanceStatus, StepResult, StepStatus};
use syncforge_common::job::{step_keys, JobContext, ReplicationStep, StepKind};
use syncforge_common::now_millis;
use syncforge_repl::orderer::build_steps;
use syncforge_repl::plugin::PluginRegistry;
use syncforge_repl::snapshot::{SnapshotJob, SnapshotReplicator};
use syncforge_sched::{JobHandler, JobOutcome, JobRun};
use syncforge_store::ConfigurationStore;

use crate::instances::InstanceStore;

/// Handler-registry key for policy instance execution.
pub const HANDLER_POLICY_INSTANCE: &str = "policy-instance";

/// Interrupts registered before the instance reaches a safe point, so an
/// abort issued while no step is running still takes effect at start.
#[derive(Debug, Default)]
pub struct InterruptCache {
    pending: DashMap<String, ()>,
}

impl InterruptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending interrupt for a policy. Returns false if one was
    /// already registered.
    pub fn register(&self, policy_name: &str) -> bool {
        self.pending.insert(policy_name.to_string(), ()).is_none()
    }

    /// Consume a pending interrupt, if any.
    pub fn take(&self, policy_name: &str) -> bool {
        self.pending.remove(policy_name).is_some()
    }
}

/// Executes one policy instance per trigger fire.
pub struct InstanceExecutor {
    store: Arc<ConfigurationStore>,
    instances: Arc<InstanceStore>,
    interrupts: Arc<InterruptCache>,
    replicator: Arc<SnapshotReplicator>,
    plugins: Arc<PluginRegistry>,
}

impl InstanceExecutor {
    pub fn new(
        store: Arc<ConfigurationStore>,
        instances: Arc<InstanceStore>,
        interrupts: Arc<InterruptCache>,
        replicator: Arc<SnapshotReplicator>,
        plugins: Arc<PluginRegistry>,
    ) -> Self {
        Self {
            store,
            instances,
            interrupts,
            replicator,
            plugins,
        }
    }

    async fn run_steps(
        &self,
        policy: &Policy,
        instance: &mut Instance,
        ctx: &mut JobContext,
    ) -> Result<(), SyncforgeError> {
        let steps = build_steps(policy, &self.plugins)?;
        for step in steps {
            let start = now_millis();
            let mut attempts = 0;
            let outcome = loop {
                attempts += 1;
                match self.run_step(&step, policy, ctx).await {
                    Ok(()) => break Ok(()),
                    Err(e) if e.is_retryable() && attempts < policy.retry.attempts => {
                        warn!(
                            policy = %policy.name,
                            step = %step.name,
                            attempt = attempts,
                            error = %e,
                            "step failed, retrying after delay"
                        );
                        tokio::time::sleep(Duration::from_millis(policy.retry.delay_ms)).await;
                        if ctx.should_interrupt() {
                            break Err(SyncforgeError::Interrupted(format!(
                                "instance {} interrupted before retry",
                                instance.id
                            )));
                        }
                    }
                    Err(e) => break Err(e),
                }
            };

            match outcome {
                Ok(()) => instance.record_step(StepResult {
                    step_name: step.name.clone(),
                    status: StepStatus::Succeeded,
                    message: String::new(),
                    start_time_ms: start,
                    end_time_ms: now_millis(),
                    attempts,
                }),
                Err(e) => {
                    let status = if matches!(e, SyncforgeError::Interrupted(_)) {
                        StepStatus::Killed
                    } else {
                        StepStatus::Failed
                    };
                    instance.record_step(StepResult {
                        step_name: step.name.clone(),
                        status,
                        message: e.to_string(),
                        start_time_ms: start,
                        end_time_ms: now_millis(),
                        attempts,
                    });
                    if status == StepStatus::Failed && self.ignores_failures(&step) {
                        warn!(
                            policy = %policy.name,
                            step = %step.name,
                            "ignoring step failure per plugin flag"
                        );
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn run_step(
        &self,
        step: &ReplicationStep,
        policy: &Policy,
        ctx: &mut JobContext,
    ) -> Result<(), SyncforgeError> {
        match step.kind {
            StepKind::SnapshotCopy => {
                let job = SnapshotJob::from_policy(policy);
                let interrupt = ctx.interrupt_flag();
                let report = self.replicator.run(&job, &interrupt).await?;
                info!(
                    policy = %policy.name,
                    snapshot = %report.snapshot_name,
                    diff_base = report.diff_base.as_deref().unwrap_or("<full>"),
                    "copy step finished"
                );
                Ok(())
            }
            StepKind::PluginExport => {
                let name = plugin_name(step)?;
                let plugin = self.plugins.get(&name).ok_or_else(|| {
                    SyncforgeError::Replication(format!("plugin {name} is not registered"))
                })?;
                let staging = plugin.export_data(&policy.source_dataset).await?;
                ctx.put(&staging_key(&name), &staging);
                Ok(())
            }
            StepKind::PluginImport => {
                let name = plugin_name(step)?;
                let plugin = self.plugins.get(&name).ok_or_else(|| {
                    SyncforgeError::Replication(format!("plugin {name} is not registered"))
                })?;
                let staging = ctx
                    .get(&staging_key(&name))
                    .ok_or_else(|| {
                        SyncforgeError::Replication(format!(
                            "no staging path recorded by {name} export"
                        ))
                    })?
                    .to_string();
                plugin.import_data(&policy.target_dataset, &staging).await
            }
        }
    }

    fn ignores_failures(&self, step: &ReplicationStep) -> bool {
        match step.kind {
            StepKind::SnapshotCopy => false,
            StepKind::PluginExport | StepKind::PluginImport => step
                .property(step_keys::PLUGIN_NAME)
                .and_then(|name| self.plugins.info(name))
                .map(|info| info.ignore_failures)
                .unwrap_or(false),
        }
    }
}

fn plugin_name(step: &ReplicationStep) -> Result<String, SyncforgeError> {
    step.property(step_keys::PLUGIN_NAME)
        .map(|s| s.to_string())
        .ok_or_else(|| {
            SyncforgeError::Validation(format!("step {} is missing its plugin name", step.name))
        })
}

fn staging_key(plugin: &str) -> String {
    format!("{plugin}.{}", step_keys::STAGING_PATH)
}

#[async_trait]
impl JobHandler for InstanceExecutor {
    async fn execute(&self, run: JobRun) -> Result<JobOutcome, SyncforgeError> {
        let policy_name = run.key.name.clone();
        let policy = self.store.get_policy(&policy_name).ok_or_else(|| {
            SyncforgeError::NotFound(format!("policy {policy_name} is gone from the store"))
        })?;

        let now = now_millis();
        if self.instances.has_running(&policy_name) {
            let mut instance = Instance::new(&policy.id, &policy_name, now);
            instance.finish(
                InstanceStatus::Ignored,
                "previous instance still running",
                now,
            );
            warn!(policy = %policy_name, "overlapping fire ignored");
            self.instances.insert(instance);
            return Ok(JobOutcome::Continue);
        }

        let mut instance = Instance::new(&policy.id, &policy_name, now);
        self.instances.insert(instance.clone());
        info!(policy = %policy_name, instance = %instance.id, "instance started");

        if self.interrupts.take(&policy_name) {
            run.interrupt.store(true, Ordering::SeqCst);
        }
        let mut ctx = JobContext::with_interrupt(&instance.id, run.interrupt.clone());

        let result = self.run_steps(&policy, &mut instance, &mut ctx).await;
        let finished = now_millis();
        match result {
            Ok(()) => instance.finish(InstanceStatus::Succeeded, "all steps succeeded", finished),
            Err(SyncforgeError::Interrupted(msg)) => {
                instance.finish(InstanceStatus::Killed, &format!("interrupted: {msg}"), finished)
            }
            Err(e) => instance.finish(InstanceStatus::Failed, &e.to_string(), finished),
        }
        info!(
            policy = %policy_name,
            instance = %instance.id,
            status = %instance.status,
            "instance finished"
        );
        self.instances.update(instance);
        Ok(JobOutcome::Continue)
    }
}
