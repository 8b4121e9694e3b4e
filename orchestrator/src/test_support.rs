//! Test-only helpers: deterministic stories, scripted collaborators and a
//! throwaway workspace builder.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::TempDir;

use crate::core::story::Story;
use crate::core::types::CommandReport;
use crate::io::health::{ImportProbe, ProbeResult};
use crate::io::paths::OrchestratorPaths;
use crate::io::verification::{VerificationRequest, Verifier};

/// Create a deterministic ready story with default fields.
pub fn story(id: &str, priority: i64) -> Story {
    let mut story = Story::new(id);
    story.title = format!("{id} title");
    story.priority = priority;
    story
}

/// Verification report whose output carries a `TOTAL` coverage row.
pub fn coverage_report(exit_code: i32, coverage: u32) -> CommandReport {
    CommandReport {
        exit_code: Some(exit_code),
        output: format!("collected 3 items\nTOTAL 120 6 {coverage}%\n"),
        timed_out: false,
    }
}

/// Verifier returning scripted reports in order; the last one repeats.
pub struct ScriptedVerifier {
    reports: RefCell<VecDeque<CommandReport>>,
    calls: Cell<usize>,
}

impl ScriptedVerifier {
    pub fn new(reports: Vec<CommandReport>) -> Self {
        Self {
            reports: RefCell::new(reports.into()),
            calls: Cell::new(0),
        }
    }

    pub fn passing(coverage: u32) -> Self {
        Self::new(vec![coverage_report(0, coverage)])
    }

    pub fn failing(output: &str) -> Self {
        Self::new(vec![CommandReport {
            exit_code: Some(1),
            output: output.to_string(),
            timed_out: false,
        }])
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Verifier for ScriptedVerifier {
    fn run(&self, _request: &VerificationRequest) -> CommandReport {
        self.calls.set(self.calls.get() + 1);
        let mut reports = self.reports.borrow_mut();
        if reports.len() > 1 {
            reports.pop_front().unwrap_or_else(|| coverage_report(1, 0))
        } else {
            reports.front().cloned().unwrap_or_else(|| coverage_report(1, 0))
        }
    }
}

/// Import probe with a fixed answer.
pub struct StaticImportProbe {
    result: ProbeResult,
}

impl StaticImportProbe {
    pub fn healthy() -> Self {
        Self {
            result: ProbeResult::ok(),
        }
    }

    pub fn broken(note: &str) -> Self {
        Self {
            result: ProbeResult::failed(note),
        }
    }
}

impl ImportProbe for StaticImportProbe {
    fn probe(&self, _root: &Path) -> ProbeResult {
        self.result.clone()
    }
}

/// Temporary workspace with helpers for laying out backlog and source files.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp workspace"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> OrchestratorPaths {
        OrchestratorPaths::new(self.root())
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> &Self {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write workspace file");
        self
    }

    pub fn mkdir(&self, rel: &str) -> &Self {
        fs::create_dir_all(self.path(rel)).expect("create dir");
        self
    }

    /// Write a JSON story file into `backlog/`.
    pub fn story(&self, id: &str, record: Value) -> &Self {
        let text = serde_json::to_string_pretty(&record).expect("serialize story");
        self.write(&format!("backlog/{id}.json"), &text)
    }

    /// Lay out an importable `app` package.
    pub fn with_package(&self) -> &Self {
        self.write("app/__init__.py", "").write("app/main.py", "app = object()\n")
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).expect("read workspace file")
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
