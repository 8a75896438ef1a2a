//! Cross-cluster mirroring of policy operations.
//!
//! Status changes and deletes are never pushed to the paired cluster
//! inline: they are queued as admin jobs so a temporarily unreachable
//! remote does not block the local operation, and delivery is retried on
//! every firing until the remote acknowledges, at which point the job
//! deregisters itself.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use syncforge_common::entity::PolicyStatus;
use syncforge_common::error::SyncforgeError;
use syncforge_sched::{AdminJobRunner, JobDescriptor, JobHandler, JobOutcome, JobRun};

/// Scheduler group for cross-cluster sync jobs.
pub const SYNC_GROUP: &str = "SYNC";
/// Handler-registry key for the peer sync handler.
pub const HANDLER_PEER_SYNC: &str = "peer-sync";

const KEY_POLICY: &str = "policy";
const KEY_OPERATION: &str = "operation";
const KEY_STATUS: &str = "status";
const OP_STATUS: &str = "status";
const OP_DELETE: &str = "delete";

/// Client boundary to the paired cluster's orchestrator.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Mirror a policy status change to the peer.
    async fn sync_status(
        &self,
        policy_name: &str,
        status: PolicyStatus,
    ) -> Result<(), SyncforgeError>;

    /// Mirror a policy delete to the peer.
    async fn sync_delete(&self, policy_name: &str) -> Result<(), SyncforgeError>;
}

/// Queues sync jobs for the admin runner.
pub struct PeerSync {
    admin: Arc<AdminJobRunner>,
    retry_frequency_secs: u64,
}

impl PeerSync {
    pub fn new(admin: Arc<AdminJobRunner>, retry_frequency_secs: u64) -> Self {
        Self {
            admin,
            retry_frequency_secs,
        }
    }

    /// Queue a status-change mirror for `policy_name`.
    pub fn queue_status(
        &self,
        policy_name: &str,
        status: PolicyStatus,
    ) -> Result<(), SyncforgeError> {
        let descriptor =
            JobDescriptor::new(&format!("status-{policy_name}"), SYNC_GROUP, HANDLER_PEER_SYNC)
                .with_payload(KEY_POLICY, policy_name)
                .with_payload(KEY_OPERATION, OP_STATUS)
                .with_payload(KEY_STATUS, &status.to_string());
        self.admin
            .check_and_schedule(descriptor, self.retry_frequency_secs)
    }

    /// Queue a delete mirror for `policy_name`.
    pub fn queue_delete(&self, policy_name: &str) -> Result<(), SyncforgeError> {
        let descriptor =
            JobDescriptor::new(&format!("delete-{policy_name}"), SYNC_GROUP, HANDLER_PEER_SYNC)
                .with_payload(KEY_POLICY, policy_name)
                .with_payload(KEY_OPERATION, OP_DELETE);
        self.admin
            .check_and_schedule(descriptor, self.retry_frequency_secs)
    }
}

/// Admin job handler delivering queued sync operations to the peer.
pub struct PeerSyncHandler {
    client: Arc<dyn PeerClient>,
}

impl PeerSyncHandler {
    pub fn new(client: Arc<dyn PeerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobHandler for PeerSyncHandler {
    async fn execute(&self, run: JobRun) -> Result<JobOutcome, SyncforgeError> {
        let policy = run.payload.get(KEY_POLICY).cloned().ok_or_else(|| {
            SyncforgeError::Validation("sync job payload is missing the policy name".to_string())
        })?;
        let operation = run.payload.get(KEY_OPERATION).cloned().unwrap_or_default();

        let result = match operation.as_str() {
            OP_DELETE => self.client.sync_delete(&policy).await,
            OP_STATUS => {
                let status = run
                    .payload
                    .get(KEY_STATUS)
                    .and_then(|s| parse_status(s))
                    .ok_or_else(|| {
                        SyncforgeError::Validation(format!(
                            "sync job for {policy} carries an unknown status"
                        ))
                    })?;
                self.client.sync_status(&policy, status).await
            }
            other => {
                return Err(SyncforgeError::Validation(format!(
                    "unknown sync operation: {other}"
                )))
            }
        };

        match result {
            Ok(()) => {
                info!(policy = %policy, operation = %operation, "peer sync delivered");
                Ok(JobOutcome::Deregister)
            }
            Err(e) => {
                // keep the registration; retried at the next firing
                warn!(policy = %policy, operation = %operation, error = %e, "peer sync failed");
                Ok(JobOutcome::Continue)
            }
        }
    }
}

fn parse_status(raw: &str) -> Option<PolicyStatus> {
    match raw {
        "SUBMITTED" => Some(PolicyStatus::Submitted),
        "SCHEDULED" => Some(PolicyStatus::Scheduled),
        "SUSPENDED" => Some(PolicyStatus::Suspended),
        "RETIRED" => Some(PolicyStatus::Retired),
        _ => None,
    }
}
