//! Advisory preflight diagnostics.
//!
//! Every check yields `{ok, note}`. Nothing here blocks execution.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::io::config::{OrchestratorConfig, PackageConfig};
use crate::io::health::{ImportProbe, ProbeResult};
use crate::io::manifest::EXCLUDED_DIRS;
use crate::io::process::{is_program_missing, run_command_with_timeout};

const COMPILE_TIMEOUT: Duration = Duration::from_secs(30);
const COMPILE_OUTPUT_LIMIT: usize = 16 * 1024;

/// Compiles `argv[1]` without importing it or writing bytecode.
const COMPILE_SCRIPT: &str =
    "import sys\nwith open(sys.argv[1], 'rb') as f:\n    compile(f.read(), sys.argv[1], 'exec')\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub ok: bool,
    pub note: Option<String>,
}

impl Check {
    fn pass() -> Self {
        Self { ok: true, note: None }
    }

    fn fail(note: String) -> Self {
        Self {
            ok: false,
            note: Some(note),
        }
    }
}

impl From<ProbeResult> for Check {
    fn from(result: ProbeResult) -> Self {
        Self {
            ok: result.ok,
            note: result.note,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub import_package: Check,
    pub packages_discoverable: Check,
    pub test_config: Check,
    pub env_vars_present: Check,
    pub router_modules: Check,
}

impl PreflightReport {
    pub fn all_ok(&self) -> bool {
        self.checks().iter().all(|(_, check)| check.ok)
    }

    pub fn checks(&self) -> [(&'static str, &Check); 5] {
        [
            ("import_package", &self.import_package),
            ("packages_discoverable", &self.packages_discoverable),
            ("test_config", &self.test_config),
            ("env_vars_present", &self.env_vars_present),
            ("router_modules", &self.router_modules),
        ]
    }

    /// Check notes prefixed with the check name. Passing checks may carry one.
    pub fn notes(&self) -> Vec<String> {
        self.checks()
            .iter()
            .filter_map(|(name, check)| check.note.as_ref().map(|note| format!("{name}: {note}")))
            .collect()
    }
}

/// Run every diagnostic against `root`.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn run<P: ImportProbe>(root: &Path, cfg: &OrchestratorConfig, probe: &P) -> PreflightReport {
    let report = PreflightReport {
        import_package: probe.probe(root).into(),
        packages_discoverable: check_markers(root, &cfg.package),
        test_config: check_test_config(root, cfg),
        env_vars_present: check_env_vars(&cfg.required_env_vars),
        router_modules: check_routers(root, cfg),
    };
    debug!(ok = report.all_ok(), "preflight finished");
    report
}

/// Directories (relative, forward slashes) under the source roots that hold a
/// source file but no package marker.
pub fn missing_markers(root: &Path, package: &PackageConfig) -> Vec<String> {
    let mut source_dirs = BTreeSet::new();
    for source_root in &package.source_roots {
        let base = root.join(source_root);
        if !base.is_dir() {
            continue;
        }
        let walker = WalkDir::new(&base)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
            });
        for entry in walker.filter_map(Result::ok) {
            if entry.file_type().is_file() && has_extension(entry.path(), &package.source_extension) {
                if let Some(parent) = entry.path().parent() {
                    source_dirs.insert(parent.to_path_buf());
                }
            }
        }
    }
    source_dirs
        .into_iter()
        .filter(|dir| !dir.join(&package.marker).exists())
        .filter_map(|dir| {
            dir.strip_prefix(root)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
        .collect()
}

fn check_markers(root: &Path, package: &PackageConfig) -> Check {
    let missing = missing_markers(root, package);
    if missing.is_empty() {
        Check::pass()
    } else {
        Check::fail(format!("missing {} in: {}", package.marker, missing.join(", ")))
    }
}

fn check_test_config(root: &Path, cfg: &OrchestratorConfig) -> Check {
    let mut problems = Vec::new();
    for rel in &cfg.preflight.test_config_files {
        let path = root.join(rel);
        if !path.is_file() {
            continue;
        }
        if let Err(problem) = check_syntax(&path, &cfg.package.interpreter) {
            problems.push(format!("{rel}: {problem}"));
        }
    }
    if problems.is_empty() {
        Check::pass()
    } else {
        Check::fail(problems.join("; "))
    }
}

/// Syntax check by extension; unknown kinds must be UTF-8 text without NUL.
///
/// Python sources are compiled with `interpreter`. When the interpreter is not
/// installed they only get the text check.
pub fn check_syntax(path: &Path, interpreter: &str) -> Result<(), String> {
    let bytes = fs::read(path).map_err(|err| err.to_string())?;
    let text = String::from_utf8(bytes).map_err(|_| "not valid UTF-8".to_string())?;
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "toml" => toml::from_str::<toml::Table>(&text)
            .map(|_| ())
            .map_err(|err| err.to_string()),
        "json" => serde_json::from_str::<Value>(&text)
            .map(|_| ())
            .map_err(|err| err.to_string()),
        "yml" | "yaml" => serde_yaml::from_str::<serde_yaml::Value>(&text)
            .map(|_| ())
            .map_err(|err| err.to_string()),
        _ if text.contains('\0') => Err("contains NUL bytes".to_string()),
        "py" => compile_python(path, interpreter),
        _ => Ok(()),
    }
}

fn compile_python(path: &Path, interpreter: &str) -> Result<(), String> {
    let mut cmd = Command::new(interpreter);
    cmd.arg("-B").arg("-c").arg(COMPILE_SCRIPT).arg(path);
    if let Some(dir) = path.parent() {
        cmd.current_dir(dir);
    }
    let output = match run_command_with_timeout(cmd, COMPILE_TIMEOUT, COMPILE_OUTPUT_LIMIT) {
        Ok(output) => output,
        Err(err) if is_program_missing(&err) => {
            debug!(interpreter, path = %path.display(), "interpreter missing; python syntax unchecked");
            return Ok(());
        }
        Err(err) => return Err(format!("{err:#}")),
    };
    if output.timed_out {
        return Err(format!("{interpreter} timed out compiling"));
    }
    if output.status.success() {
        return Ok(());
    }
    // the compiler's message is the last line of the traceback
    let stderr = String::from_utf8_lossy(&output.stderr.bytes);
    let message = stderr
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .unwrap_or("compile failed");
    Err(message.to_string())
}

fn check_env_vars(required: &[String]) -> Check {
    let missing: Vec<&str> = required
        .iter()
        .map(String::as_str)
        .filter(|name| std::env::var_os(name).is_none_or(|value| value.is_empty()))
        .collect();
    if missing.is_empty() {
        Check::pass()
    } else {
        Check::fail(format!("missing env vars: {}", missing.join(", ")))
    }
}

fn check_routers(root: &Path, cfg: &OrchestratorConfig) -> Check {
    let dir = root.join(&cfg.preflight.router_dir);
    let Ok(entries) = fs::read_dir(&dir) else {
        return Check::pass();
    };
    let mut files: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file() && has_extension(path, &cfg.package.source_extension))
        .filter(|path| path.file_name().is_some_and(|name| name != cfg.package.marker.as_str()))
        .collect();
    files.sort();

    let bad: Vec<String> = files
        .iter()
        .filter(|path| {
            let contents = fs::read_to_string(path).unwrap_or_default();
            !cfg.preflight
                .router_markers
                .iter()
                .any(|marker| contents.contains(marker.as_str()))
        })
        .filter_map(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .collect();
    if bad.is_empty() {
        Check::pass()
    } else {
        Check::fail(format!("router modules without a router: {}", bad.join(", ")))
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}
