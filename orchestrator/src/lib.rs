//! Single-pass backlog orchestrator for a Python service workspace.
//!
//! Each `orchestrator run` loads the persisted workspace state, checks
//! repository health, picks at most one story from the backlog and executes
//! it under protected-path rules. The crate is split the same way throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (path rules, selection, fix-gate,
//!   state transitions, classification). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, state store, process
//!   execution, verification). Isolated behind traits to enable fakes in tests.
//!
//! Orchestration modules ([`pass`], [`select`], [`report`]) coordinate core
//! logic with I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pass;
pub mod report;
pub mod select;
pub mod state;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
