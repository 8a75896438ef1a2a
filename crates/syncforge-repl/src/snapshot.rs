//! One execution of a snapshot-diff incremental copy.
//!
//! The sequence is: precondition check, source snapshot creation, diff-base
//! selection, bulk copy, target snapshot creation, then eviction on both
//! sides. The whole sequence for a dataset path runs under a per-path lock;
//! both the storage system and the diff-base selection assume no concurrent
//! mutation of the snapshot set mid-computation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use syncforge_common::entity::{Policy, RetentionSpec};
use syncforge_common::error::SyncforgeError;
use syncforge_common::now_millis;

use crate::copier::{CopyEngine, CopyRequest};
use crate::fs::{check_and_create_snapshot, SnapshotableFs};

/// Prefix of snapshots created by syncforge.
pub const SNAPSHOT_PREFIX: &str = "syncforge-snapshot-";

/// Inputs for one snapshot replication run, extracted from a policy.
#[derive(Debug, Clone)]
pub struct SnapshotJob {
    /// Owning policy name; embedded in snapshot names.
    pub policy_name: String,
    /// Source cluster name, used to scope the dataset path lock.
    pub source_cluster: String,
    /// Target cluster name, used to scope the dataset path lock.
    pub target_cluster: String,
    /// Dataset path on the source cluster.
    pub source_path: String,
    /// Dataset path on the target cluster.
    pub target_path: String,
    /// Source-side eviction parameters.
    pub source_retention: RetentionSpec,
    /// Target-side eviction parameters.
    pub target_retention: RetentionSpec,
    /// Maximum parallel copy tasks.
    pub max_maps: u32,
    /// Per-task bandwidth cap in MB/s.
    pub bandwidth_mb: u32,
}

impl SnapshotJob {
    /// Build the job inputs from a policy definition.
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            policy_name: policy.name.clone(),
            source_cluster: policy.source_cluster.clone(),
            target_cluster: policy.target_cluster.clone(),
            source_path: policy.source_dataset.clone(),
            target_path: policy.target_dataset.clone(),
            source_retention: policy.source_retention,
            target_retention: policy.target_retention,
            max_maps: policy.max_maps,
            bandwidth_mb: policy.bandwidth_mb,
        }
    }
}

/// What one replication run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationReport {
    /// Name of the snapshot created on the source (and, on success, on the
    /// target).
    pub snapshot_name: String,
    /// Diff base used for the copy; None means a full copy.
    pub diff_base: Option<String>,
    /// Snapshots evicted from the source after the copy.
    pub source_evicted: usize,
    /// Snapshots evicted from the target after the copy.
    pub target_evicted: usize,
}

#[derive(Default)]
struct PathLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    fn get(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Executes snapshot-diff incremental copies between a source and target
/// filesystem pair.
pub struct SnapshotReplicator {
    source_fs: Arc<dyn SnapshotableFs>,
    target_fs: Arc<dyn SnapshotableFs>,
    copier: Arc<dyn CopyEngine>,
    path_locks: PathLocks,
    poll_interval: Duration,
}

impl SnapshotReplicator {
    /// A replicator over the given filesystem pair and copy engine.
    pub fn new(
        source_fs: Arc<dyn SnapshotableFs>,
        target_fs: Arc<dyn SnapshotableFs>,
        copier: Arc<dyn CopyEngine>,
    ) -> Self {
        Self {
            source_fs,
            target_fs,
            copier,
            path_locks: PathLocks::default(),
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Override how often the running copy job is polled.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run one replication instance. `interrupt` is polled at safe points;
    /// an observed interrupt kills the copy and surfaces as
    /// [`SyncforgeError::Interrupted`].
    pub async fn run(
        &self,
        job: &SnapshotJob,
        interrupt: &AtomicBool,
    ) -> Result<ReplicationReport, SyncforgeError> {
        // Serialize all snapshot-set mutation per dataset path. Lock keys
        // are sorted so overlapping pairs always acquire in the same order.
        let mut keys = vec![
            format!("{}:{}", job.source_cluster, job.source_path),
            format!("{}:{}", job.target_cluster, job.target_path),
        ];
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.path_locks.get(key).lock_owned().await);
        }

        check_interrupt(interrupt, "before precondition check")?;
        self.check_preconditions(job).await?;

        let snapshot_name = format!("{SNAPSHOT_PREFIX}{}-{}", job.policy_name, now_millis());
        check_and_create_snapshot(self.source_fs.as_ref(), &job.source_path, &snapshot_name)
            .await?;
        info!(policy = %job.policy_name, snapshot = %snapshot_name, "created source snapshot");

        let diff_base = self.find_latest_replicated_snapshot(job).await?;
        match &diff_base {
            Some(base) => debug!(policy = %job.policy_name, diff_base = %base, "incremental copy"),
            None => debug!(policy = %job.policy_name, "no common snapshot, full copy"),
        }

        check_interrupt(interrupt, "before bulk copy")?;
        self.run_copy(job, &snapshot_name, diff_base.clone(), interrupt)
            .await?;

        // matching target snapshot so future runs can diff against it
        check_and_create_snapshot(self.target_fs.as_ref(), &job.target_path, &snapshot_name)
            .await?;
        info!(policy = %job.policy_name, snapshot = %snapshot_name, "created target snapshot");

        let now = now_millis();
        let source_evicted = evict_snapshots(
            self.source_fs.as_ref(),
            &job.source_path,
            &job.source_retention,
            now,
        )
        .await?;
        let target_evicted = evict_snapshots(
            self.target_fs.as_ref(),
            &job.target_path,
            &job.target_retention,
            now,
        )
        .await?;

        Ok(ReplicationReport {
            snapshot_name,
            diff_base,
            source_evicted,
            target_evicted,
        })
    }

    async fn check_preconditions(&self, job: &SnapshotJob) -> Result<(), SyncforgeError> {
        for (fs, path, side) in [
            (&self.source_fs, &job.source_path, "source"),
            (&self.target_fs, &job.target_path, "target"),
        ] {
            if !fs.exists(path).await? {
                return Err(SyncforgeError::Validation(format!(
                    "{side} path {path} does not exist"
                )));
            }
            if !fs.is_snapshottable(path).await? {
                return Err(SyncforgeError::Validation(format!(
                    "{side} path {path} does not allow snapshots"
                )));
            }
        }
        Ok(())
    }

    /// The snapshot present on both sides with the most recent target-side
    /// modification time; None when the intersection is empty.
    async fn find_latest_replicated_snapshot(
        &self,
        job: &SnapshotJob,
    ) -> Result<Option<String>, SyncforgeError> {
        let source_names: HashSet<String> = self
            .source_fs
            .list_snapshots(&job.source_path)
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();

        let mut target_snapshots = self.target_fs.list_snapshots(&job.target_path).await?;
        target_snapshots.sort_by(|a, b| b.modification_time_ms.cmp(&a.modification_time_ms));

        Ok(target_snapshots
            .into_iter()
            .find(|s| source_names.contains(&s.name))
            .map(|s| s.name))
    }

    async fn run_copy(
        &self,
        job: &SnapshotJob,
        snapshot_name: &str,
        diff_base: Option<String>,
        interrupt: &AtomicBool,
    ) -> Result<(), SyncforgeError> {
        let request = CopyRequest {
            source_paths: vec![job.source_path.clone()],
            target_path: job.target_path.clone(),
            diff_base,
            source_snapshot: snapshot_name.to_string(),
            max_maps: job.max_maps,
            bandwidth_mb: job.bandwidth_mb,
        };
        let copy_job = self.copier.copy(request).await?;
        loop {
            if interrupt.load(Ordering::SeqCst) {
                copy_job.kill().await;
                return Err(SyncforgeError::Interrupted(format!(
                    "bulk copy for {} killed",
                    job.policy_name
                )));
            }
            if copy_job.is_complete().await {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        if !copy_job.is_successful().await {
            return Err(SyncforgeError::Replication(format!(
                "bulk copy {} -> {} failed",
                job.source_path, job.target_path
            )));
        }
        Ok(())
    }
}

/// Evict snapshots older than the age limit while always retaining the
/// newest `retain_count` regardless of age. Skipped entirely when the
/// snapshot count is already at or below the floor. Returns the number of
/// snapshots deleted.
pub async fn evict_snapshots(
    fs: &dyn SnapshotableFs,
    path: &str,
    retention: &RetentionSpec,
    now_ms: u64,
) -> Result<usize, SyncforgeError> {
    let mut snapshots = fs.list_snapshots(path).await?;
    if snapshots.len() <= retention.retain_count {
        debug!(
            path,
            count = snapshots.len(),
            floor = retention.retain_count,
            "no eviction needed"
        );
        return Ok(0);
    }

    snapshots.sort_by_key(|s| s.modification_time_ms);
    let eviction_time = now_ms.saturating_sub(retention.age_limit_ms);

    let candidates = snapshots.len() - retention.retain_count;
    let mut deleted = 0;
    for snapshot in &snapshots[..candidates] {
        if snapshot.modification_time_ms < eviction_time {
            info!(path, snapshot = %snapshot.name, "evicting snapshot");
            fs.delete_snapshot(path, &snapshot.name).await?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

fn check_interrupt(interrupt: &AtomicBool, at: &str) -> Result<(), SyncforgeError> {
    if interrupt.load(Ordering::SeqCst) {
        Err(SyncforgeError::Interrupted(at.to_string()))
    } else {
        Ok(())
    }
}
