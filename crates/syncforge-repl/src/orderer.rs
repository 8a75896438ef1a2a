//! Deterministic, dependency-respecting ordering of plugin steps.
//!
//! Builds a directed graph over the registered plugins where an edge
//! A -> B means "B depends on A", topologically orders it, and assembles
//! the instance step list: export steps in plugin order, then the core
//! copy, then import steps in plugin order. A cyclic dependency fails
//! policy scheduling, before any instance runs.

use std::collections::HashMap;

use tracing::warn;

use syncforge_common::entity::Policy;
use syncforge_common::error::SyncforgeError;
use syncforge_common::job::{step_keys, ReplicationStep, StepKind};

use crate::plugin::PluginRegistry;

/// Name of the core copy step present in every instance.
pub const CORE_COPY_STEP: &str = "snapshot-copy";

/// Topological order of the registered plugins (Kahn's algorithm).
///
/// Plugins connected through dependency edges come first, in dependency
/// order; disconnected plugins are appended afterward in registration
/// order. A cycle among the connected plugins is a configuration error.
pub fn plugin_order(registry: &PluginRegistry) -> Result<Vec<String>, SyncforgeError> {
    let names = registry.names();
    let mut in_degree: HashMap<&str, usize> = names.iter().map(|n| (n.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> =
        names.iter().map(|n| (n.as_str(), Vec::new())).collect();
    let mut has_edge: HashMap<&str, bool> = names.iter().map(|n| (n.as_str(), false)).collect();

    for name in &names {
        let info = registry.info(name).expect("registered plugin has info");
        for dependency in &info.dependencies {
            if !in_degree.contains_key(dependency.as_str()) {
                warn!(plugin = %name, dependency = %dependency,
                    "dependency is not registered, ignoring edge");
                continue;
            }
            *in_degree.get_mut(name.as_str()).unwrap() += 1;
            adjacency
                .get_mut(dependency.as_str())
                .unwrap()
                .push(name.as_str());
            has_edge.insert(name.as_str(), true);
            has_edge.insert(dependency.as_str(), true);
        }
    }

    let connected: Vec<&str> = names
        .iter()
        .map(|n| n.as_str())
        .filter(|n| has_edge[n])
        .collect();
    let disconnected: Vec<&str> = names
        .iter()
        .map(|n| n.as_str())
        .filter(|n| !has_edge[n])
        .collect();

    // start nodes: connected plugins nothing depends on, in registration order
    let mut queue: Vec<&str> = connected
        .iter()
        .copied()
        .filter(|n| in_degree[n] == 0)
        .collect();
    let mut ordered: Vec<String> = Vec::with_capacity(names.len());
    let mut head = 0;
    while head < queue.len() {
        let current = queue[head];
        head += 1;
        ordered.push(current.to_string());
        for &next in &adjacency[current] {
            let degree = in_degree.get_mut(next).unwrap();
            *degree -= 1;
            if *degree == 0 {
                queue.push(next);
            }
        }
    }

    if ordered.len() != connected.len() {
        return Err(SyncforgeError::CyclicDependency(
            "plugin dependency graph contains a cycle".to_string(),
        ));
    }

    ordered.extend(disconnected.iter().map(|n| n.to_string()));
    Ok(ordered)
}

/// Build the static, ordered step list for one policy: plugin exports
/// against the source cluster, the core copy, plugin imports against the
/// target cluster. Step templates are fixed per policy; only the job
/// context varies per instance.
pub fn build_steps(
    policy: &Policy,
    registry: &PluginRegistry,
) -> Result<Vec<ReplicationStep>, SyncforgeError> {
    let mut exports = Vec::new();
    let mut imports = Vec::new();

    if !registry.is_empty() {
        let order = plugin_order(registry)?;
        let enabled: Vec<String> = if policy.plugins.is_empty() {
            registry.names()
        } else {
            policy.plugins.clone()
        };
        for name in &order {
            if !enabled.contains(name) {
                continue;
            }
            let plugin = registry.get(name).expect("ordered plugin is registered");
            if plugin.is_enabled(&policy.source_cluster) {
                exports.push(
                    ReplicationStep::new(&format!("{name}-export"), StepKind::PluginExport)
                        .with_property(step_keys::PLUGIN_NAME, name)
                        .with_property(step_keys::SOURCE_CLUSTER, &policy.source_cluster)
                        .with_property(step_keys::SOURCE_DATASET, &policy.source_dataset),
                );
            }
            if plugin.is_enabled(&policy.target_cluster) {
                imports.push(
                    ReplicationStep::new(&format!("{name}-import"), StepKind::PluginImport)
                        .with_property(step_keys::PLUGIN_NAME, name)
                        .with_property(step_keys::TARGET_CLUSTER, &policy.target_cluster)
                        .with_property(step_keys::TARGET_DATASET, &policy.target_dataset),
                );
            }
        }
    }

    let core = ReplicationStep::new(CORE_COPY_STEP, StepKind::SnapshotCopy)
        .with_property(step_keys::SOURCE_CLUSTER, &policy.source_cluster)
        .with_property(step_keys::TARGET_CLUSTER, &policy.target_cluster)
        .with_property(step_keys::SOURCE_DATASET, &policy.source_dataset)
        .with_property(step_keys::TARGET_DATASET, &policy.target_dataset);

    let mut steps = exports;
    steps.push(core);
    steps.extend(imports);
    Ok(steps)
}
