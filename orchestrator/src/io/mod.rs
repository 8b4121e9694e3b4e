//! I/O adapters for orchestrator commands.

pub mod backlog;
pub mod config;
pub mod executor;
pub mod fingerprint;
pub mod health;
pub mod init;
pub mod manifest;
pub mod overrides;
pub mod paths;
pub mod preflight;
pub mod process;
pub mod retry;
pub mod state_store;
pub mod verification;
