//! Error types shared across the syncforge subsystems.

use thiserror::Error;

/// Errors surfaced by syncforge operations.
///
/// Only replication failures are retryable; everything else is surfaced to
/// the caller immediately.
#[derive(Debug, Error)]
pub enum SyncforgeError {
    /// Malformed policy or cluster definition, rejected before any state change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An entity of the same type and name is already registered.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// The requested entity is not registered.
    #[error("{0} not found")]
    NotFound(String),

    /// Another operation holds the entity lock.
    #[error("operation already in progress for: {0}")]
    LockContention(String),

    /// Reading or writing a persisted entity failed.
    #[error("store access failed: {0}")]
    StoreAccess(String),

    /// Trigger registration or removal failed.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// A replication step failed; retried per the policy retry spec.
    #[error("replication failed: {0}")]
    Replication(String),

    /// The plugin dependency graph contains a cycle.
    #[error("cyclic plugin dependency: {0}")]
    CyclicDependency(String),

    /// Execution was interrupted by an abort or shutdown signal.
    #[error("interrupted: {0}")]
    Interrupted(String),

    /// I/O error.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl SyncforgeError {
    /// True for failures the instance executor retries per the policy
    /// retry spec; all other kinds abort the operation immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncforgeError::Replication(_))
    }
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, SyncforgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replication_is_retryable() {
        let err = SyncforgeError::Replication("copy failed".to_string());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validation_is_not_retryable() {
        let err = SyncforgeError::Validation("bad frequency".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_lock_contention_is_not_retryable() {
        let err = SyncforgeError::LockContention("policy-1".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SyncforgeError = io.into();
        assert!(matches!(err, SyncforgeError::Io(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = SyncforgeError::LockContention("daily-backup".to_string());
        assert_eq!(
            err.to_string(),
            "operation already in progress for: daily-backup"
        );
        let err = SyncforgeError::AlreadyExists("POLICY/daily-backup".to_string());
        assert_eq!(err.to_string(), "POLICY/daily-backup already exists");
    }
}
