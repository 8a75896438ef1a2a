//! The plugin SPI and registry.
//!
//! Plugins contribute metadata export/import steps around the core copy
//! (Atlas/Ranger-style catalog sync). The registry is an explicit
//! registration table assembled at process start and dependency-injected
//! into the orchestrator; there is no dynamic discovery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use syncforge_common::error::SyncforgeError;

/// Health of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStatus {
    /// Usable.
    Active,
    /// Registered but currently disabled.
    Inactive,
    /// Misconfigured; never scheduled.
    Invalid,
}

/// Self-description returned by a plugin at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    /// Unique plugin name.
    pub name: String,
    /// Plugin version string.
    pub version: String,
    /// Names of plugins whose steps must run before this plugin's.
    pub dependencies: Vec<String>,
    /// Directory used to stage exported data.
    pub staging_dir: String,
    /// When true, a failing step of this plugin does not fail the instance.
    pub ignore_failures: bool,
}

/// A metadata replication plugin.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Describe this plugin.
    fn register(&self) -> PluginInfo;

    /// Whether the plugin applies to the given cluster.
    fn is_enabled(&self, cluster_name: &str) -> bool;

    /// Export metadata for `dataset`; returns the staging path holding the
    /// exported data.
    async fn export_data(&self, dataset: &str) -> Result<String, SyncforgeError>;

    /// Import previously exported metadata from `staging_path`.
    async fn import_data(&self, dataset: &str, staging_path: &str)
        -> Result<(), SyncforgeError>;

    /// Current health of the plugin.
    fn status(&self) -> PluginStatus;
}

/// Explicit plugin registration table, in registration order.
#[derive(Default)]
pub struct PluginRegistry {
    order: Vec<String>,
    plugins: HashMap<String, Arc<dyn Plugin>>,
    infos: HashMap<String, PluginInfo>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. An Invalid or Inactive plugin is skipped with a
    /// warning rather than failing registration of the others; a duplicate
    /// name is skipped too.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let info = plugin.register();
        match plugin.status() {
            PluginStatus::Active => {}
            status => {
                warn!(plugin = %info.name, ?status, "skipping plugin registration");
                return;
            }
        }
        if self.plugins.contains_key(&info.name) {
            warn!(plugin = %info.name, "plugin already registered, skipping");
            return;
        }
        info!(plugin = %info.name, version = %info.version, "registered plugin");
        self.order.push(info.name.clone());
        self.plugins.insert(info.name.clone(), plugin);
        self.infos.insert(info.name.clone(), info);
    }

    /// Registered plugin names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Look up a registered plugin.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    /// The registration-time info of a plugin.
    pub fn info(&self, name: &str) -> Option<&PluginInfo> {
        self.infos.get(name)
    }

    /// True when no plugin is registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted plugin used by this crate's tests.

    use super::*;
    use std::sync::Mutex;

    pub struct FakePlugin {
        pub info: PluginInfo,
        pub status: PluginStatus,
        pub enabled_clusters: Vec<String>,
        pub exports: Mutex<Vec<String>>,
        pub imports: Mutex<Vec<(String, String)>>,
        pub fail_export: bool,
    }

    impl FakePlugin {
        pub fn named(name: &str, dependencies: &[&str]) -> Self {
            Self {
                info: PluginInfo {
                    name: name.to_string(),
                    version: "1.0".to_string(),
                    dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                    staging_dir: format!("/staging/{name}"),
                    ignore_failures: false,
                },
                status: PluginStatus::Active,
                enabled_clusters: Vec::new(),
                exports: Mutex::new(Vec::new()),
                imports: Mutex::new(Vec::new()),
                fail_export: false,
            }
        }
    }

    #[async_trait]
    impl Plugin for FakePlugin {
        fn register(&self) -> PluginInfo {
            self.info.clone()
        }

        fn is_enabled(&self, cluster_name: &str) -> bool {
            self.enabled_clusters.is_empty()
                || self.enabled_clusters.iter().any(|c| c == cluster_name)
        }

        async fn export_data(&self, dataset: &str) -> Result<String, SyncforgeError> {
            if self.fail_export {
                return Err(SyncforgeError::Replication(format!(
                    "{} export failed",
                    self.info.name
                )));
            }
            self.exports.lock().unwrap().push(dataset.to_string());
            Ok(format!("{}/{dataset}", self.info.staging_dir))
        }

        async fn import_data(
            &self,
            dataset: &str,
            staging_path: &str,
        ) -> Result<(), SyncforgeError> {
            self.imports
                .lock()
                .unwrap()
                .push((dataset.to_string(), staging_path.to_string()));
            Ok(())
        }

        fn status(&self) -> PluginStatus {
            self.status
        }
    }
}
