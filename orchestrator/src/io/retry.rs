//! Bounded retry for transient filesystem errors (fixed attempts, fixed delay).

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use crate::io::config::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            attempts: cfg.attempts.max(1),
            delay: Duration::from_millis(cfg.delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or attempts are exhausted; the last error wins.
    pub fn run<T, E, F>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.attempts => {
                    warn!(label, attempt, err = %err, "transient failure, retrying");
                    thread::sleep(self.delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

pub fn read_to_string(policy: &RetryPolicy, path: &Path) -> Result<String> {
    policy
        .run("read", || fs::read_to_string(path))
        .with_context(|| format!("read {}", path.display()))
}

/// Write via temp file + rename, retrying each full attempt.
pub fn write_atomic(policy: &RetryPolicy, path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    policy
        .run("write", || {
            fs::write(&tmp_path, contents)?;
            fs::rename(&tmp_path, path)
        })
        .with_context(|| format!("write {}", path.display()))
}

/// Create a new file (non-atomic; used for small marker files).
pub fn write_new(policy: &RetryPolicy, path: &Path, contents: &str) -> Result<()> {
    policy
        .run("create", || fs::write(path, contents))
        .with_context(|| format!("create {}", path.display()))
}
