//! Test environment: a complete orchestrator assembly over in-memory seams.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use syncforge_common::config::SyncforgeConfig;
use syncforge_common::entity::{Cluster, Policy, PolicyStatus};
use syncforge_common::error::SyncforgeError;
use syncforge_repl::memory::{MemoryCopyEngine, MemoryFs};
use syncforge_repl::plugin::{Plugin, PluginInfo, PluginRegistry, PluginStatus};
use syncforge_repl::snapshot::SnapshotReplicator;
use syncforge_sched::TriggerScheduler;
use syncforge_server::peer_sync::PeerClient;
use syncforge_server::{OrchestratorBuilder, PolicyJobOrchestrator};
use syncforge_store::ConfigurationStore;

/// A plugin that records its export/import calls.
pub struct RecordingPlugin {
    info: PluginInfo,
    /// (dataset, staging_path) pairs seen by import_data.
    pub imports: Mutex<Vec<(String, String)>>,
    /// Fail this many export calls before succeeding.
    pub fail_exports: AtomicU32,
}

impl RecordingPlugin {
    pub fn named(name: &str, dependencies: &[&str]) -> Self {
        Self {
            info: PluginInfo {
                name: name.to_string(),
                version: "1.0".to_string(),
                dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                staging_dir: format!("/staging/{name}"),
                ignore_failures: false,
            },
            imports: Mutex::new(Vec::new()),
            fail_exports: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Plugin for RecordingPlugin {
    fn register(&self) -> PluginInfo {
        self.info.clone()
    }

    fn is_enabled(&self, _cluster_name: &str) -> bool {
        true
    }

    async fn export_data(&self, dataset: &str) -> Result<String, SyncforgeError> {
        if self.fail_exports.load(Ordering::SeqCst) > 0 {
            self.fail_exports.fetch_sub(1, Ordering::SeqCst);
            return Err(SyncforgeError::Replication(format!(
                "{} export failed",
                self.info.name
            )));
        }
        Ok(format!("{}{dataset}", self.info.staging_dir))
    }

    async fn import_data(&self, dataset: &str, staging_path: &str) -> Result<(), SyncforgeError> {
        self.imports
            .lock()
            .unwrap()
            .push((dataset.to_string(), staging_path.to_string()));
        Ok(())
    }

    fn status(&self) -> PluginStatus {
        PluginStatus::Active
    }
}

/// A peer client that records deliveries and can be made unreachable.
#[derive(Default)]
pub struct RecordingPeer {
    /// Operations delivered so far, e.g. `status:p1:SUSPENDED`.
    pub delivered: Mutex<Vec<String>>,
    /// Fail this many calls before recovering.
    pub fail_remaining: AtomicU32,
}

impl RecordingPeer {
    fn check_reachable(&self) -> Result<(), SyncforgeError> {
        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(SyncforgeError::Replication("peer unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerClient for RecordingPeer {
    async fn sync_status(
        &self,
        policy_name: &str,
        status: PolicyStatus,
    ) -> Result<(), SyncforgeError> {
        self.check_reachable()?;
        self.delivered
            .lock()
            .unwrap()
            .push(format!("status:{policy_name}:{status}"));
        Ok(())
    }

    async fn sync_delete(&self, policy_name: &str) -> Result<(), SyncforgeError> {
        self.check_reachable()?;
        self.delivered
            .lock()
            .unwrap()
            .push(format!("delete:{policy_name}"));
        Ok(())
    }
}

/// A full orchestrator assembly over in-memory seams.
pub struct TestEnv {
    _dir: Option<tempfile::TempDir>,
    pub store: Arc<ConfigurationStore>,
    pub scheduler: Arc<TriggerScheduler>,
    pub source_fs: Arc<MemoryFs>,
    pub target_fs: Arc<MemoryFs>,
    pub copier: Arc<MemoryCopyEngine>,
    pub peer: Arc<RecordingPeer>,
    pub orchestrator: PolicyJobOrchestrator,
}

impl TestEnv {
    /// A fresh environment with no plugins.
    pub fn new() -> Self {
        Self::with_plugins(PluginRegistry::new())
    }

    /// A fresh environment with the given plugin table.
    pub fn with_plugins(plugins: PluginRegistry) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut env = Self::at_path(dir.path(), plugins);
        env._dir = Some(dir);
        env
    }

    /// An environment over an existing store root, as after a restart.
    pub fn at_path(path: &Path, plugins: PluginRegistry) -> Self {
        let store = Arc::new(
            ConfigurationStore::open(path.to_path_buf(), 4, Duration::from_secs(30)).unwrap(),
        );
        let scheduler = Arc::new(TriggerScheduler::new(
            Duration::from_millis(50),
            Duration::from_millis(5_000),
        ));
        let source_fs = Arc::new(MemoryFs::new());
        let target_fs = Arc::new(MemoryFs::new());
        source_fs.add_dir("/data", true);
        target_fs.add_dir("/data", true);
        let copier = Arc::new(MemoryCopyEngine::new());
        let replicator = Arc::new(
            SnapshotReplicator::new(source_fs.clone(), target_fs.clone(), copier.clone())
                .with_poll_interval(Duration::from_millis(10)),
        );
        let peer = Arc::new(RecordingPeer::default());

        let orchestrator = OrchestratorBuilder::new(
            SyncforgeConfig::default(),
            store.clone(),
            scheduler.clone(),
            replicator,
        )
        .with_plugins(plugins)
        .with_peer_client(peer.clone())
        .build();

        Self {
            _dir: None,
            store,
            scheduler,
            source_fs,
            target_fs,
            copier,
            peer,
            orchestrator,
        }
    }

    /// Register the standard src/dst cluster pair.
    pub fn register_clusters(&self) {
        self.orchestrator
            .submit_cluster(Cluster::new("src", "dc1", "hdfs://a:8020", "https://peer-a"))
            .unwrap();
        self.orchestrator
            .submit_cluster(Cluster::new("dst", "dc2", "hdfs://b:8020", "https://peer-b"))
            .unwrap();
    }

    /// The store root, for reopening after a simulated restart.
    pub fn store_root(&self) -> std::path::PathBuf {
        self._dir
            .as_ref()
            .expect("environment owns its store root")
            .path()
            .to_path_buf()
    }

    /// Keep the store root alive past this environment.
    pub fn leak_dir(&mut self) -> tempfile::TempDir {
        self._dir.take().expect("environment owns its store root")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// A policy over the standard /data dataset, hourly, fast retries.
pub fn test_policy(name: &str) -> Policy {
    let mut policy = Policy::new(name, "src", "dst");
    policy.source_dataset = "/data".to_string();
    policy.target_dataset = "/data".to_string();
    policy.frequency_secs = 3_600;
    policy.retry.attempts = 3;
    policy.retry.delay_ms = 20;
    policy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_env_builds_and_registers_clusters() {
        let env = TestEnv::new();
        env.register_clusters();
        assert!(env.store.get_cluster("src").is_some());
        assert!(env.store.get_cluster("dst").is_some());
    }

    #[tokio::test]
    async fn test_policy_helper_is_valid() {
        assert!(test_policy("p1").validate(60).is_ok());
    }
}
