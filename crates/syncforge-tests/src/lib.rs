//! Syncforge integration test scaffolding.
//!
//! Builds a full in-process assembly (store, scheduler, replication engine,
//! orchestrator) over the in-memory filesystem and copy-engine seams.

pub mod harness;

pub use harness::{RecordingPeer, RecordingPlugin, TestEnv};
