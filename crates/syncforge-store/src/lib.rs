//! Entity locking and the durable configuration store.

pub mod lock;
pub mod store;

pub use lock::EntityLockManager;
pub use store::{ConfigurationStore, RestoreReport, StagedUpdate};
