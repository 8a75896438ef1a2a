//! The bulk-copy collaborator boundary.
//!
//! The distributed copy engine itself is external; the replication engine
//! only submits a request, polls the returned job for completion and kills
//! it on interruption.

use std::sync::Arc;

use async_trait::async_trait;

use syncforge_common::error::SyncforgeError;

/// One bulk-copy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    /// Source paths to copy from.
    pub source_paths: Vec<String>,
    /// Target path to copy into.
    pub target_path: String,
    /// Snapshot to diff against for an incremental copy; None means a full
    /// copy.
    pub diff_base: Option<String>,
    /// Snapshot the copy reads from on the source.
    pub source_snapshot: String,
    /// Maximum parallel copy tasks.
    pub max_maps: u32,
    /// Per-task bandwidth cap in MB/s.
    pub bandwidth_mb: u32,
}

/// Handle to a running bulk-copy job.
#[async_trait]
pub trait CopyJob: Send + Sync {
    /// Whether the job has finished, successfully or not.
    async fn is_complete(&self) -> bool;

    /// Whether the job finished successfully. Meaningful only after
    /// [`is_complete`](Self::is_complete) returns true.
    async fn is_successful(&self) -> bool;

    /// Ask the job to stop as soon as possible.
    async fn kill(&self);
}

/// Submits bulk-copy jobs.
#[async_trait]
pub trait CopyEngine: Send + Sync {
    /// Start a copy and return a pollable, killable handle.
    async fn copy(&self, request: CopyRequest) -> Result<Arc<dyn CopyJob>, SyncforgeError>;
}
