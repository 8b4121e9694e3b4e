//! Orchestrator configuration stored under `.orchestrator/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_VERIFICATION_COMMAND: &str = "python -m pytest -vv --cov --cov-fail-under=95";

/// Infrastructure paths protected unless an override releases them.
pub const DEFAULT_INFRA_HINTS: [&str; 14] = [
    "app/main.py",
    "app/auth",
    "app/rbac",
    "app/logging",
    "app/audit",
    "app/models",
    "app/schemas",
    "migrations",
    "alembic.ini",
    "pyproject.toml",
    "requirements.txt",
    "pytest.ini",
    ".coveragerc",
    "app/routers",
];

/// Orchestrator configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// values that suit a Python service laid out as `app/` + `tests/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Backlog directory, relative to the workspace root.
    pub backlog_dir: String,

    /// Minimum coverage percent for a verification to count as passing.
    pub coverage_threshold: f64,

    /// Operator-declared protected paths.
    pub protected_paths: Vec<String>,

    /// Fixed infrastructure paths that are always protected.
    pub infra_hints: Vec<String>,

    /// Environment variables the workspace expects to be set.
    pub required_env_vars: Vec<String>,

    /// Commands recorded in the environment fingerprint.
    pub run_commands: Vec<String>,

    pub verification: VerificationConfig,
    pub package: PackageConfig,
    pub preflight: PreflightConfig,
    pub fingerprint: FingerprintConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerificationConfig {
    /// Shell command run from the workspace root.
    pub command: String,
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes each.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PackageConfig {
    /// Core package that must import from the workspace root.
    pub name: String,
    /// File that marks a directory as a package.
    pub marker: String,
    /// Contents written into created marker files.
    pub marker_contents: String,
    /// Source file extension (without dot).
    pub source_extension: String,
    /// Directories scanned for package markers.
    pub source_roots: Vec<String>,
    /// Interpreter for the default import check and source syntax checks.
    pub interpreter: String,
    /// Shell command replacing the default import check (must exit 0).
    pub import_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PreflightConfig {
    /// Test-configuration files checked for syntax; first existing wins.
    pub test_config_files: Vec<String>,
    /// Directory holding router modules.
    pub router_dir: String,
    /// A router module must contain at least one of these.
    pub router_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Prints the runtime version (first non-empty line is kept).
    pub runtime_command: Option<String>,
    /// Prints installed libraries as JSON.
    pub libraries_command: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backlog_dir: "backlog".to_string(),
            coverage_threshold: 95.0,
            protected_paths: Vec::new(),
            infra_hints: DEFAULT_INFRA_HINTS.iter().map(|s| s.to_string()).collect(),
            required_env_vars: Vec::new(),
            run_commands: vec![DEFAULT_VERIFICATION_COMMAND.to_string()],
            verification: VerificationConfig::default(),
            package: PackageConfig::default(),
            preflight: PreflightConfig::default(),
            fingerprint: FingerprintConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_VERIFICATION_COMMAND.to_string(),
            timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            marker: "__init__.py".to_string(),
            marker_contents: "# auto-created by orchestrator to mark package\n".to_string(),
            source_extension: "py".to_string(),
            source_roots: vec!["app".to_string(), "tests".to_string(), "test".to_string()],
            interpreter: "python".to_string(),
            import_command: None,
        }
    }
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            test_config_files: vec![
                "test/conftest.py".to_string(),
                "tests/conftest.py".to_string(),
                "pytest.ini".to_string(),
                "pyproject.toml".to_string(),
            ],
            router_dir: "app/routers".to_string(),
            router_markers: vec!["router =".to_string(), "APIRouter(".to_string()],
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 250,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backlog_dir.trim().is_empty() {
            return Err(anyhow!("backlog_dir must be non-empty"));
        }
        if !(0.0..=100.0).contains(&self.coverage_threshold) {
            return Err(anyhow!("coverage_threshold must be within 0..=100"));
        }
        if self.verification.command.trim().is_empty() {
            return Err(anyhow!("verification.command must be non-empty"));
        }
        if self.verification.timeout_secs == 0 {
            return Err(anyhow!("verification.timeout_secs must be > 0"));
        }
        if self.verification.output_limit_bytes == 0 {
            return Err(anyhow!("verification.output_limit_bytes must be > 0"));
        }
        if self.package.name.trim().is_empty() || self.package.marker.trim().is_empty() {
            return Err(anyhow!("package.name and package.marker must be non-empty"));
        }
        if self.package.interpreter.trim().is_empty() {
            return Err(anyhow!("package.interpreter must be non-empty"));
        }
        if self.package.marker.contains('/') || self.package.marker.contains('\\') {
            return Err(anyhow!("package.marker must be a bare file name"));
        }
        if self.retry.attempts == 0 {
            return Err(anyhow!("retry.attempts must be > 0"));
        }
        Ok(())
    }

    pub fn verification_timeout(&self) -> Duration {
        Duration::from_secs(self.verification.timeout_secs)
    }

    pub fn fingerprint_timeout(&self) -> Duration {
        Duration::from_secs(self.fingerprint.timeout_secs.unwrap_or(60))
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, OrchestratorConfig::default());
        assert_eq!(cfg.retry.attempts, 3);
        assert_eq!(cfg.coverage_threshold, 95.0);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = OrchestratorConfig::default();
        cfg.protected_paths = vec!["secrets".to_string()];
        cfg.package.import_command = Some("python -c 'import app'".to_string());
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "coverage_threshold = 80.0\n[verification]\ncommand = \"true\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.coverage_threshold, 80.0);
        assert_eq!(cfg.verification.command, "true");
        assert_eq!(cfg.verification.timeout_secs, 30 * 60);
        assert_eq!(cfg.backlog_dir, "backlog");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[retry]\nattempts = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("retry.attempts"));
    }
}
