//! The policy job orchestrator: composes the store, scheduler and
//! replication engine into the policy lifecycle (submit, schedule,
//! suspend, resume, delete), instance execution, cross-cluster sync and
//! housekeeping.

pub mod executor;
pub mod housekeeping;
pub mod instances;
pub mod orchestrator;
pub mod peer_sync;

pub use orchestrator::{PolicyJobOrchestrator, OrchestratorBuilder};
