//! In-memory implementations of the filesystem and copy-engine seams.
//!
//! Used by tests and the local demo wiring; production deployments plug in
//! real cluster-backed implementations.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use syncforge_common::error::SyncforgeError;
use syncforge_common::now_millis;

use crate::copier::{CopyEngine, CopyJob, CopyRequest};
use crate::fs::{SnapshotableFs, SnapshotInfo};

#[derive(Debug, Default)]
struct DirState {
    snapshottable: bool,
    /// snapshot name -> modification time (ms)
    snapshots: BTreeMap<String, u64>,
}

/// An in-memory [`SnapshotableFs`].
#[derive(Debug, Default)]
pub struct MemoryFs {
    dirs: Mutex<HashMap<String, DirState>>,
}

impl MemoryFs {
    /// An empty filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a directory, optionally snapshot-capable.
    pub fn add_dir(&self, path: &str, snapshottable: bool) {
        let mut dirs = self.dirs.lock().unwrap();
        dirs.insert(
            path.to_string(),
            DirState {
                snapshottable,
                snapshots: BTreeMap::new(),
            },
        );
    }

    /// Overwrite a snapshot's modification time; test hook for ordering
    /// scenarios.
    pub fn set_snapshot_mtime(&self, path: &str, name: &str, mtime_ms: u64) {
        let mut dirs = self.dirs.lock().unwrap();
        if let Some(dir) = dirs.get_mut(path) {
            if let Some(mtime) = dir.snapshots.get_mut(name) {
                *mtime = mtime_ms;
            }
        }
    }

    /// Snapshot names currently present on `path`, sorted.
    pub fn snapshot_names(&self, path: &str) -> Vec<String> {
        let dirs = self.dirs.lock().unwrap();
        dirs.get(path)
            .map(|d| d.snapshots.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SnapshotableFs for MemoryFs {
    async fn exists(&self, path: &str) -> Result<bool, SyncforgeError> {
        Ok(self.dirs.lock().unwrap().contains_key(path))
    }

    async fn is_snapshottable(&self, path: &str) -> Result<bool, SyncforgeError> {
        Ok(self
            .dirs
            .lock()
            .unwrap()
            .get(path)
            .map(|d| d.snapshottable)
            .unwrap_or(false))
    }

    async fn list_snapshots(&self, path: &str) -> Result<Vec<SnapshotInfo>, SyncforgeError> {
        let dirs = self.dirs.lock().unwrap();
        let dir = dirs
            .get(path)
            .ok_or_else(|| SyncforgeError::Replication(format!("no such path: {path}")))?;
        Ok(dir
            .snapshots
            .iter()
            .map(|(name, mtime)| SnapshotInfo {
                name: name.clone(),
                modification_time_ms: *mtime,
            })
            .collect())
    }

    async fn create_snapshot(&self, path: &str, name: &str) -> Result<(), SyncforgeError> {
        let mut dirs = self.dirs.lock().unwrap();
        let dir = dirs
            .get_mut(path)
            .ok_or_else(|| SyncforgeError::Replication(format!("no such path: {path}")))?;
        if !dir.snapshottable {
            return Err(SyncforgeError::Replication(format!(
                "{path} does not allow snapshots"
            )));
        }
        dir.snapshots.insert(name.to_string(), now_millis());
        Ok(())
    }

    async fn delete_snapshot(&self, path: &str, name: &str) -> Result<(), SyncforgeError> {
        let mut dirs = self.dirs.lock().unwrap();
        let dir = dirs
            .get_mut(path)
            .ok_or_else(|| SyncforgeError::Replication(format!("no such path: {path}")))?;
        if dir.snapshots.remove(name).is_none() {
            return Err(SyncforgeError::Replication(format!(
                "no such snapshot {name} on {path}"
            )));
        }
        Ok(())
    }
}

/// Job handle produced by [`MemoryCopyEngine`].
#[derive(Debug)]
pub struct MemoryCopyJob {
    finishes_at: Instant,
    success: bool,
    killed: AtomicBool,
}

impl MemoryCopyJob {
    /// Whether [`CopyJob::kill`] was called.
    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CopyJob for MemoryCopyJob {
    async fn is_complete(&self) -> bool {
        self.was_killed() || Instant::now() >= self.finishes_at
    }

    async fn is_successful(&self) -> bool {
        !self.was_killed() && self.success && Instant::now() >= self.finishes_at
    }

    async fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }
}

/// An in-memory [`CopyEngine`] that records requests and completes after a
/// configurable delay.
#[derive(Debug, Default)]
pub struct MemoryCopyEngine {
    requests: Mutex<Vec<CopyRequest>>,
    jobs: Mutex<Vec<Arc<MemoryCopyJob>>>,
    fail_remaining: AtomicU32,
    delay: Mutex<Duration>,
}

impl MemoryCopyEngine {
    /// An engine whose copies complete immediately and successfully.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make copies take `delay` before completing.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Fail the next `n` copy jobs.
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Every request submitted so far.
    pub fn requests(&self) -> Vec<CopyRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests submitted so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The most recently created job handle.
    pub fn last_job(&self) -> Option<Arc<MemoryCopyJob>> {
        self.jobs.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CopyEngine for MemoryCopyEngine {
    async fn copy(&self, request: CopyRequest) -> Result<Arc<dyn CopyJob>, SyncforgeError> {
        self.requests.lock().unwrap().push(request);
        let fail = {
            let remaining = self.fail_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
                true
            } else {
                false
            }
        };
        let job = Arc::new(MemoryCopyJob {
            finishes_at: Instant::now() + *self.delay.lock().unwrap(),
            success: !fail,
            killed: AtomicBool::new(false),
        });
        self.jobs.lock().unwrap().push(job.clone());
        Ok(job)
    }
}
