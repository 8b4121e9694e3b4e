//! Import health: the core package must import from the workspace root.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::CommandReport;
use crate::io::config::{OrchestratorConfig, PackageConfig};
use crate::io::process::{is_program_missing, run_command_with_timeout, run_shell};

const PROBE_OUTPUT_LIMIT: usize = 64 * 1024;
const NOTE_LINES: usize = 5;

/// Imports `argv[2]` with `argv[1]` first on `sys.path` and rejects a module
/// loaded from anywhere else.
const IMPORT_SCRIPT: &str = r#"import importlib, os, sys
root = os.path.realpath(sys.argv[1])
sys.path.insert(0, root)
module = importlib.import_module(sys.argv[2])
origin = getattr(module, "__file__", None)
if not origin or os.path.commonpath([root, os.path.realpath(origin)]) != root:
    sys.exit("ImportError: %s resolved to %s, outside %s" % (sys.argv[2], origin, root))
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub ok: bool,
    pub note: Option<String>,
}

impl ProbeResult {
    pub fn ok() -> Self {
        Self { ok: true, note: None }
    }

    pub fn failed(note: impl Into<String>) -> Self {
        Self {
            ok: false,
            note: Some(note.into()),
        }
    }
}

pub trait ImportProbe {
    fn probe(&self, root: &Path) -> ProbeResult;
}

/// Resolves the package on disk, then imports it with the configured
/// interpreter (or runs `import_command` instead when one is set).
#[derive(Debug, Clone)]
pub struct FsImportProbe {
    package: PackageConfig,
    timeout: Duration,
}

impl FsImportProbe {
    pub fn new(cfg: &OrchestratorConfig) -> Self {
        Self {
            package: cfg.package.clone(),
            timeout: cfg.verification_timeout(),
        }
    }

    fn import_with_interpreter(&self, root: &Path) -> ProbeResult {
        let interpreter = &self.package.interpreter;
        let mut cmd = Command::new(interpreter);
        // -B keeps __pycache__ out of the workspace manifest
        cmd.arg("-B")
            .arg("-c")
            .arg(IMPORT_SCRIPT)
            .arg(root)
            .arg(&self.package.name)
            .current_dir(root);
        match run_command_with_timeout(cmd, self.timeout, PROBE_OUTPUT_LIMIT) {
            Ok(output) => judge("import", output.into_report()),
            Err(err) if is_program_missing(&err) => {
                warn!(interpreter, "interpreter not found; import checked on disk only");
                ProbeResult {
                    ok: true,
                    note: Some(format!("{interpreter} not found; package resolved on disk only")),
                }
            }
            Err(err) => ProbeResult::failed(format!("import check did not run: {err:#}")),
        }
    }
}

impl ImportProbe for FsImportProbe {
    fn probe(&self, root: &Path) -> ProbeResult {
        let name = &self.package.name;
        let package_marker = root.join(name).join(&self.package.marker);
        let module_file = root.join(format!("{name}.{}", self.package.source_extension));
        if !package_marker.is_file() && !module_file.is_file() {
            return ProbeResult::failed(format!(
                "ModuleNotFoundError: '{name}' does not resolve under {}",
                root.display()
            ));
        }

        match self.package.import_command.as_deref() {
            Some(command) => {
                let report = run_shell(command, root, self.timeout, PROBE_OUTPUT_LIMIT);
                debug!(command, exit_code = ?report.exit_code, "import command finished");
                judge("import command", report)
            }
            None => self.import_with_interpreter(root),
        }
    }
}

/// Pass on exit 0, otherwise fail with the last lines of output.
fn judge(what: &str, report: CommandReport) -> ProbeResult {
    if report.succeeded() {
        return ProbeResult::ok();
    }
    let lines: Vec<&str> = report
        .output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let tail = &lines[lines.len().saturating_sub(NOTE_LINES)..];
    let status = match (report.timed_out, report.exit_code) {
        (true, _) => "timed out".to_string(),
        (false, Some(code)) => format!("exit {code}"),
        (false, None) => "no exit code".to_string(),
    };
    ProbeResult::failed(format!("{what} failed ({status}): {}", tail.join(" | ")))
}
