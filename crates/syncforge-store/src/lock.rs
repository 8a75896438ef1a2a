//! In-process mutual exclusion for named entities.
//!
//! Serializes mutating operations (submit, update, delete) on the same
//! entity name. Acquire is non-blocking: a caller that cannot acquire must
//! surface "operation already in progress" rather than wait. No
//! cross-process guarantee is provided; if cross-process exclusivity is
//! ever needed it requires an external unique-constraint or distributed
//! lock.

use std::collections::HashMap;
use std::sync::Mutex;

use syncforge_common::now_millis;

/// The holder of an entity lock.
#[derive(Debug, Clone)]
pub struct LockToken {
    /// Operation that took the lock, for diagnostics.
    pub command: String,
    pub acquired_at_ms: u64,
}

/// Registry of entity-name locks.
#[derive(Debug, Default)]
pub struct EntityLockManager {
    locks: Mutex<HashMap<String, LockToken>>,
}

impl EntityLockManager {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Try to take the lock for `entity_name`. Returns false if any holder
    /// exists; never blocks or queues.
    pub fn acquire(&self, entity_name: &str, command: &str) -> bool {
        let mut locks = self.locks.lock().unwrap();
        if locks.contains_key(entity_name) {
            tracing::debug!(entity = entity_name, command, "lock contention");
            return false;
        }
        locks.insert(
            entity_name.to_string(),
            LockToken {
                command: command.to_string(),
                acquired_at_ms: now_millis(),
            },
        );
        true
    }

    /// Release the lock for `entity_name`. Idempotent.
    pub fn release(&self, entity_name: &str) {
        let mut locks = self.locks.lock().unwrap();
        locks.remove(entity_name);
    }

    /// The command currently holding the lock, if any.
    pub fn holder(&self, entity_name: &str) -> Option<LockToken> {
        let locks = self.locks.lock().unwrap();
        locks.get(entity_name).cloned()
    }

    pub fn held_count(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_then_second_acquire_fails() {
        let locks = EntityLockManager::new();
        assert!(locks.acquire("policy-1", "SUBMIT"));
        assert!(!locks.acquire("policy-1", "DELETE"));
    }

    #[test]
    fn test_release_allows_reacquire() {
        let locks = EntityLockManager::new();
        assert!(locks.acquire("policy-1", "SUBMIT"));
        locks.release("policy-1");
        assert!(locks.acquire("policy-1", "DELETE"));
    }

    #[test]
    fn test_release_is_idempotent() {
        let locks = EntityLockManager::new();
        locks.release("never-held");
        assert!(locks.acquire("never-held", "SUBMIT"));
        locks.release("never-held");
        locks.release("never-held");
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn test_different_names_are_independent() {
        let locks = EntityLockManager::new();
        assert!(locks.acquire("policy-1", "SUBMIT"));
        assert!(locks.acquire("policy-2", "SUBMIT"));
        assert_eq!(locks.held_count(), 2);
    }

    #[test]
    fn test_holder_reports_command() {
        let locks = EntityLockManager::new();
        locks.acquire("policy-1", "SUSPEND");
        let token = locks.holder("policy-1").unwrap();
        assert_eq!(token.command, "SUSPEND");
        assert!(locks.holder("policy-2").is_none());
    }

    #[test]
    fn test_exclusivity_under_contention() {
        use std::sync::Arc;

        let locks = Arc::new(EntityLockManager::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            handles.push(std::thread::spawn(move || {
                locks.acquire("shared", "SUBMIT")
            }));
        }
        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
    }
}
