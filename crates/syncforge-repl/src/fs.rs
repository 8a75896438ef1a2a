//! The snapshot-capable filesystem surface used by the replication engine.
//!
//! Snapshots are not persisted by syncforge; they are discovered by listing
//! the storage system at use time.

use async_trait::async_trait;

use syncforge_common::error::SyncforgeError;

/// One snapshot discovered on a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Snapshot name, unique within its owning path.
    pub name: String,
    /// Last modification time, in epoch milliseconds.
    pub modification_time_ms: u64,
}

/// An HDFS-style filesystem that supports directory snapshots.
#[async_trait]
pub trait SnapshotableFs: Send + Sync {
    /// Whether `path` exists.
    async fn exists(&self, path: &str) -> Result<bool, SyncforgeError>;

    /// Whether snapshots may be taken of `path`.
    async fn is_snapshottable(&self, path: &str) -> Result<bool, SyncforgeError>;

    /// All snapshots currently present on `path`.
    async fn list_snapshots(&self, path: &str) -> Result<Vec<SnapshotInfo>, SyncforgeError>;

    /// Create a snapshot named `name` on `path`.
    async fn create_snapshot(&self, path: &str, name: &str) -> Result<(), SyncforgeError>;

    /// Delete the snapshot named `name` from `path`.
    async fn delete_snapshot(&self, path: &str, name: &str) -> Result<(), SyncforgeError>;
}

/// Delete `name` if present, then create it. Makes snapshot creation
/// idempotent across retried instances.
pub async fn check_and_create_snapshot(
    fs: &dyn SnapshotableFs,
    path: &str,
    name: &str,
) -> Result<(), SyncforgeError> {
    let existing = fs.list_snapshots(path).await?;
    if existing.iter().any(|s| s.name == name) {
        tracing::info!(path, snapshot = name, "deleting stale snapshot before re-create");
        fs.delete_snapshot(path, name).await?;
    }
    fs.create_snapshot(path, name).await
}
