//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod coverage;
pub mod fix_gate;
pub mod path;
pub mod protected;
pub mod selector;
pub mod state_update;
pub mod story;
pub mod types;
