//! Best-effort environment fingerprint.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::io::config::OrchestratorConfig;
use crate::io::process::{run_command_with_timeout, shell_command};
use crate::state::EnvironmentFingerprint;

const FINGERPRINT_OUTPUT_LIMIT: usize = 1_000_000;

/// Capture os, runtime and library identity. Never fails.
pub fn build(root: &Path, cfg: &OrchestratorConfig) -> EnvironmentFingerprint {
    EnvironmentFingerprint {
        os_identity: os_identity(),
        runtime_version: runtime_version(root, cfg),
        library_versions: library_versions(root, cfg),
        run_commands: cfg.run_commands.clone(),
    }
}

pub fn os_identity() -> String {
    format!(
        "{}-{} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH,
        std::env::consts::FAMILY
    )
}

fn runtime_version(root: &Path, cfg: &OrchestratorConfig) -> String {
    let own = format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    let Some(command) = cfg.fingerprint.runtime_command.as_deref() else {
        return own;
    };
    let Some(stdout) = capture_stdout(command, root, cfg) else {
        return own;
    };
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or(own)
}

fn library_versions(root: &Path, cfg: &OrchestratorConfig) -> BTreeMap<String, String> {
    let Some(command) = cfg.fingerprint.libraries_command.as_deref() else {
        return BTreeMap::new();
    };
    capture_stdout(command, root, cfg)
        .map(|stdout| parse_library_listing(&stdout))
        .unwrap_or_default()
}

/// Stdout of a successful run; `None` on spawn failure, timeout or non-zero exit.
fn capture_stdout(command: &str, root: &Path, cfg: &OrchestratorConfig) -> Option<String> {
    match run_command_with_timeout(
        shell_command(command, root),
        cfg.fingerprint_timeout(),
        FINGERPRINT_OUTPUT_LIMIT,
    ) {
        Ok(output) if output.status.success() && !output.timed_out => {
            Some(String::from_utf8_lossy(&output.stdout.bytes).into_owned())
        }
        Ok(output) => {
            debug!(command, exit_code = ?output.status.code(), "fingerprint command failed");
            None
        }
        Err(err) => {
            debug!(command, err = %err, "fingerprint command did not run");
            None
        }
    }
}

/// Accepts `[{"name":..,"version":..}]` or `{"name": "version"}`; anything else is empty.
pub fn parse_library_listing(output: &str) -> BTreeMap<String, String> {
    let Ok(value) = serde_json::from_str::<Value>(output.trim()) else {
        return BTreeMap::new();
    };
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?;
                let version = item.get("version")?.as_str()?;
                Some((name.to_string(), version.to_string()))
            })
            .collect(),
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(name, version)| version.as_str().map(|v| (name, v.to_string())))
            .collect(),
        _ => BTreeMap::new(),
    }
}
