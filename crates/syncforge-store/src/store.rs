//! Durable, versioned store of entity definitions.
//!
//! One JSON file per entity at `<root>/<TYPE>/<url-encoded-name>.json`,
//! mirrored by an in-memory index. Startup restore loads entity types in
//! dependency order (clusters before the policies that reference them)
//! with a bounded worker pool and a wall-clock timeout; a partial load is
//! never treated as success.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use syncforge_common::entity::{Cluster, Entity, EntityType, Policy};
use syncforge_common::error::SyncforgeError;

const ENTITY_EXT: &str = "json";

type EntityKey = (EntityType, String);

/// An in-flight, not-yet-committed edit to a stored entity.
///
/// Returned by [`ConfigurationStore::initiate_update`]; the edit is visible
/// only through this handle until committed. Commit and discard consume the
/// handle, so an update has exactly one committer.
#[derive(Debug)]
pub struct StagedUpdate {
    entity: Entity,
    key: EntityKey,
}

impl StagedUpdate {
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn entity_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }
}

/// Per-type counts from a startup restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub clusters: usize,
    pub policies: usize,
}

/// Durable CRUD for typed entities, keyed by (type, name).
pub struct ConfigurationStore {
    root: PathBuf,
    restore_workers: usize,
    restore_timeout: Duration,
    dictionary: Arc<DashMap<EntityKey, Entity>>,
    staged: Mutex<HashMap<EntityKey, ()>>,
}

impl ConfigurationStore {
    /// Open a store rooted at `root`, creating the directory layout if
    /// needed.
    pub fn open(
        root: PathBuf,
        restore_workers: usize,
        restore_timeout: Duration,
    ) -> Result<Self, SyncforgeError> {
        for ty in EntityType::LOAD_ORDER {
            std::fs::create_dir_all(root.join(ty.dir_name()))?;
        }
        Ok(Self {
            root,
            restore_workers: restore_workers.max(1),
            restore_timeout,
            dictionary: Arc::new(DashMap::new()),
            staged: Mutex::new(HashMap::new()),
        })
    }

    /// Persist and index a new entity. Fails with AlreadyExists if an
    /// entity of the same (type, name) is registered.
    pub fn publish(&self, entity: Entity) -> Result<(), SyncforgeError> {
        let key = Self::key_of(&entity);
        if self.dictionary.contains_key(&key) {
            return Err(SyncforgeError::AlreadyExists(format!(
                "{}/{}",
                key.0, key.1
            )));
        }
        self.persist(&entity)?;
        info!(entity_type = %key.0, name = %key.1, "published entity");
        self.dictionary.insert(key, entity);
        Ok(())
    }

    /// The committed entity, or None if absent. In-flight staged edits are
    /// never visible here; read them through their [`StagedUpdate`] handle.
    pub fn get(&self, entity_type: EntityType, name: &str) -> Option<Entity> {
        self.dictionary
            .get(&(entity_type, name.to_string()))
            .map(|e| e.value().clone())
    }

    pub fn get_policy(&self, name: &str) -> Option<Policy> {
        match self.get(EntityType::Policy, name) {
            Some(Entity::Policy(p)) => Some(p),
            _ => None,
        }
    }

    pub fn get_cluster(&self, name: &str) -> Option<Cluster> {
        match self.get(EntityType::Cluster, name) {
            Some(Entity::Cluster(c)) => Some(c),
            _ => None,
        }
    }

    /// Names of all registered entities of one type.
    pub fn list_names(&self, entity_type: EntityType) -> Vec<String> {
        let mut names: Vec<String> = self
            .dictionary
            .iter()
            .filter(|e| e.key().0 == entity_type)
            .map(|e| e.key().1.clone())
            .collect();
        names.sort();
        names
    }

    /// All registered entities of one type.
    pub fn entities(&self, entity_type: EntityType) -> Vec<Entity> {
        self.dictionary
            .iter()
            .filter(|e| e.key().0 == entity_type)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Stage an edit of an existing entity. At most one staged update may
    /// exist per (type, name); a second initiate before commit/discard
    /// fails.
    pub fn initiate_update(&self, entity: Entity) -> Result<StagedUpdate, SyncforgeError> {
        let key = Self::key_of(&entity);
        if !self.dictionary.contains_key(&key) {
            return Err(SyncforgeError::NotFound(format!("{}/{}", key.0, key.1)));
        }
        let mut staged = self.staged.lock().unwrap();
        if staged.contains_key(&key) {
            return Err(SyncforgeError::LockContention(format!(
                "update already staged for {}/{}",
                key.0, key.1
            )));
        }
        staged.insert(key.clone(), ());
        Ok(StagedUpdate { entity, key })
    }

    /// Commit a staged edit: persist, then replace the index entry.
    pub fn commit_update(&self, update: StagedUpdate) -> Result<(), SyncforgeError> {
        let result = self.persist(&update.entity);
        match result {
            Ok(()) => {
                debug!(entity_type = %update.key.0, name = %update.key.1, "committed update");
                self.dictionary.insert(update.key.clone(), update.entity);
                self.clear_stage(&update.key);
                Ok(())
            }
            Err(e) => {
                // no partial writes: index untouched, stage released
                self.clear_stage(&update.key);
                Err(e)
            }
        }
    }

    /// Drop a staged edit without committing.
    pub fn discard_update(&self, update: StagedUpdate) {
        self.clear_stage(&update.key);
    }

    /// Delete the persisted record and the index entry. Returns false if
    /// the entity is absent.
    pub fn remove(&self, entity_type: EntityType, name: &str) -> Result<bool, SyncforgeError> {
        let key = (entity_type, name.to_string());
        if self.dictionary.remove(&key).is_none() {
            return Ok(false);
        }
        let path = self.entity_path(entity_type, name);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        info!(entity_type = %entity_type, name, "removed entity");
        Ok(true)
    }

    /// Restore all entity types from disk in dependency order.
    pub async fn restore(&self) -> Result<RestoreReport, SyncforgeError> {
        let mut report = RestoreReport::default();
        for ty in EntityType::LOAD_ORDER {
            let loaded = self.restore_type(ty).await?;
            match ty {
                EntityType::Cluster => report.clusters = loaded,
                EntityType::Policy => report.policies = loaded,
            }
        }
        Ok(report)
    }

    async fn restore_type(&self, ty: EntityType) -> Result<usize, SyncforgeError> {
        let dir = self.root.join(ty.dir_name());
        let mut files = Vec::new();
        if dir.exists() {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some(ENTITY_EXT) {
                    files.push(path);
                }
            }
        }
        let discovered = files.len();
        if discovered == 0 {
            return Ok(0);
        }

        let loaded = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.restore_workers));
        let mut handles = Vec::with_capacity(discovered);
        for path in files {
            let semaphore = semaphore.clone();
            let loaded = loaded.clone();
            let dictionary = self.dictionary.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                match load_entity_file(&path).await {
                    Ok(entity) => {
                        let key = (entity.entity_type(), entity.name().to_string());
                        if key.0 != ty {
                            warn!(path = %path.display(), expected = %ty, found = %key.0,
                                "entity record in wrong store directory");
                            return;
                        }
                        debug!(entity_type = %ty, name = %key.1, "restored entity");
                        dictionary.insert(key, entity);
                        loaded.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "unable to restore entity");
                    }
                }
            }));
        }

        let all = futures::future::join_all(handles);
        if tokio::time::timeout(self.restore_timeout, all).await.is_err() {
            warn!(entity_type = %ty, "timed out while restoring entities");
        }

        let loaded = loaded.load(Ordering::SeqCst);
        if loaded != discovered {
            return Err(SyncforgeError::StoreAccess(format!(
                "restored {loaded} of {discovered} records for entity type {ty}"
            )));
        }
        info!(entity_type = %ty, count = loaded, "restored configurations");
        Ok(loaded)
    }

    fn key_of(entity: &Entity) -> EntityKey {
        (entity.entity_type(), entity.name().to_string())
    }

    fn clear_stage(&self, key: &EntityKey) {
        let mut staged = self.staged.lock().unwrap();
        staged.remove(key);
    }

    fn entity_path(&self, entity_type: EntityType, name: &str) -> PathBuf {
        let encoded = urlencoding::encode(name);
        self.root
            .join(entity_type.dir_name())
            .join(format!("{encoded}.{ENTITY_EXT}"))
    }

    fn persist(&self, entity: &Entity) -> Result<(), SyncforgeError> {
        let path = self.entity_path(entity.entity_type(), entity.name());
        let body = serde_json::to_string_pretty(entity)
            .map_err(|e| SyncforgeError::StoreAccess(format!("serialize {}: {e}", entity.name())))?;
        std::fs::write(&path, body)?;
        Ok(())
    }
}

async fn load_entity_file(path: &std::path::Path) -> Result<Entity, SyncforgeError> {
    let raw = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&raw)
        .map_err(|e| SyncforgeError::StoreAccess(format!("parse {}: {e}", path.display())))
}
