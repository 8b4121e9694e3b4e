//! Story executor: protected-path gate, minimal edits, verification.
//!
//! The executor never fails outright. Every problem it meets (a protected
//! path, a file it cannot create, a failing suite) ends up in the returned
//! [`ExecutionOutcome`] so the pass can persist and report it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{ExecutionSignals, classify};
use crate::core::fix_gate::is_fix_gate;
use crate::core::path::{file_name, normalize, normalize_all};
use crate::core::protected::{first_blocking_path, unauthorized_paths};
use crate::core::story::Story;
use crate::core::types::{Classification, MetricsDelta, VerificationSummary};
use crate::io::config::OrchestratorConfig;
use crate::io::health::ImportProbe;
use crate::io::manifest::checksum_file;
use crate::io::preflight::{self, PreflightReport, missing_markers};
use crate::io::retry::{RetryPolicy, write_new};
use crate::io::verification::{VerificationRequest, Verifier, verify};
use crate::state::new_resume_token;

const STORY_MARKER_CONTENTS: &str = "# auto-created per story allowed_paths\n";
const LOG_TAIL_LINES: usize = 20;

const SUMMARY_BLOCKED: &str = "Edit requires touching a protected path without override.";
const SUMMARY_UNAUTHORIZED: &str = "Edits touched paths outside the authorized set.";
const COMPLIANCE_PASS_NOTE: &str = "No PII added; no RBAC/audit/export-control changes.";
const ROLLBACK_APPLIED: &str = "Minimal changes; revert by restoring touched files from checksum list.";
const ROLLBACK_NONE: &str = "No changes applied.";
const ASSUMPTION_MINIMAL: &str =
    "Executor makes minimal edits. Complex refactors require explicit allowed_paths and/or overrides.";
const ASSUMPTION_OVERRIDE: &str = "Story requires explicit override to touch protected files.";

/// What the executor intends to do and what it actually touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    pub plan: Vec<String>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestingReport {
    pub ran: bool,
    pub ok: bool,
    pub quarantined: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceNote {
    pub result: String,
    pub notes: Vec<String>,
}

/// Everything needed to resume or roll back after this execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Checkpoint {
    pub touched: Vec<String>,
    pub checksums: BTreeMap<String, String>,
    pub coverage_delta: f64,
    pub resume_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionOutcome {
    pub story_id: String,
    pub summary: String,
    pub preflight: PreflightReport,
    pub change_set: ChangeSet,
    pub testing: TestingReport,
    /// `None` when verification was skipped.
    pub verification: Option<VerificationSummary>,
    pub compliance: ComplianceNote,
    pub checkpoint: Checkpoint,
    pub rollback: String,
    pub assumptions: Vec<String>,
    pub metrics_delta: MetricsDelta,
    pub classification: Option<Classification>,
    pub blocked_path: Option<String>,
    pub unauthorized: Vec<String>,
    /// Last lines of the verification output.
    pub log_tail: Vec<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.classification.is_none()
    }

    pub fn coverage(&self) -> f64 {
        self.verification.map_or(0.0, |summary| summary.coverage)
    }
}

/// Per-story inputs.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionInput<'a> {
    pub story: &'a Story,
    pub zone: &'a BTreeSet<String>,
    /// Override grants for this story.
    pub grants: &'a [String],
    pub dry_run: bool,
    pub previous_coverage: Option<f64>,
    pub quarantined: &'a [String],
}

pub struct StoryExecutor<'a, V, P> {
    root: &'a Path,
    config: &'a OrchestratorConfig,
    verifier: &'a V,
    probe: &'a P,
    retry: RetryPolicy,
}

impl<'a, V: Verifier, P: ImportProbe> StoryExecutor<'a, V, P> {
    pub fn new(
        root: &'a Path,
        config: &'a OrchestratorConfig,
        verifier: &'a V,
        probe: &'a P,
    ) -> Self {
        Self {
            root,
            config,
            verifier,
            probe,
            retry: RetryPolicy::from(&config.retry),
        }
    }

    #[instrument(skip_all, fields(story = %input.story.id, dry_run = input.dry_run))]
    pub fn execute(&self, input: &ExecutionInput<'_>) -> ExecutionOutcome {
        let story = input.story;
        let preflight = preflight::run(self.root, self.config, self.probe);

        if !is_fix_gate(story)
            && let Some(path) = first_blocking_path(&story.allowed_paths, input.zone, input.grants)
        {
            warn!(path = %path, "protected path without override");
            return blocked_outcome(story, preflight, path);
        }

        let fix_gate = is_fix_gate(story);
        let (plan, touched, authorized) = if fix_gate {
            self.apply_fix_gate(input.dry_run)
        } else {
            self.apply_story_markers(story, input.dry_run)
        };

        let unauthorized = unauthorized_paths(&touched, &authorized, input.grants);
        let checksums = self.checksums(&touched);

        let (verification, log_tail) = if unauthorized.is_empty() {
            let request = VerificationRequest::from_config(self.root, self.config);
            let (summary, report) = verify(self.verifier, &request, self.config.coverage_threshold);
            (Some(summary), tail_lines(&report.output, LOG_TAIL_LINES))
        } else {
            warn!(paths = ?unauthorized, "unauthorized edits, skipping verification");
            (None, Vec::new())
        };

        let classification = classify(&ExecutionSignals {
            protected_conflict: false,
            compliance_violation: !unauthorized.is_empty(),
            verification,
        });
        let coverage = verification.map_or(0.0, |summary| summary.coverage);
        let tests_ok = verification.is_some_and(|summary| summary.tests_ok);
        let success = classification.is_none();
        info!(
            touched = touched.len(),
            coverage,
            classification = ?classification,
            "story executed"
        );

        let summary = if unauthorized.is_empty() {
            format!("Touched {} files. Fix-Gate={fix_gate}", touched.len())
        } else {
            SUMMARY_UNAUTHORIZED.to_string()
        };
        let compliance = if unauthorized.is_empty() {
            ComplianceNote {
                result: "pass".to_string(),
                notes: vec![COMPLIANCE_PASS_NOTE.to_string()],
            }
        } else {
            ComplianceNote {
                result: "fail".to_string(),
                notes: unauthorized.iter().map(|path| format!("unauthorized: {path}")).collect(),
            }
        };

        ExecutionOutcome {
            story_id: story.id.clone(),
            summary,
            preflight,
            change_set: ChangeSet {
                plan,
                files: touched.clone(),
            },
            testing: TestingReport {
                ran: verification.is_some(),
                ok: tests_ok,
                quarantined: input.quarantined.to_vec(),
            },
            verification,
            compliance,
            checkpoint: Checkpoint {
                touched,
                checksums,
                coverage_delta: coverage - input.previous_coverage.unwrap_or(coverage),
                resume_token: new_resume_token(),
            },
            rollback: ROLLBACK_APPLIED.to_string(),
            assumptions: vec![ASSUMPTION_MINIMAL.to_string()],
            metrics_delta: MetricsDelta {
                throughput: u64::from(success),
                error_rate: if tests_ok { 0.0 } else { 1.0 },
            },
            classification,
            blocked_path: None,
            unauthorized,
            log_tail,
        }
    }

    /// Add the package marker to every source directory lacking one.
    fn apply_fix_gate(&self, dry_run: bool) -> (Vec<String>, Vec<String>, BTreeSet<String>) {
        let package = &self.config.package;
        let plan = vec![format!(
            "Add missing {} files to package directories under {}",
            package.marker,
            package.source_roots.join(", ")
        )];
        let derived: BTreeSet<String> = missing_markers(self.root, package)
            .into_iter()
            .map(|dir| format!("{dir}/{}", package.marker))
            .collect();

        let mut touched = Vec::new();
        for rel in &derived {
            if self.create_marker(rel, &package.marker_contents, dry_run) {
                touched.push(rel.clone());
            }
        }
        (plan, touched, derived)
    }

    /// Create missing marker files the story explicitly allows.
    fn apply_story_markers(
        &self,
        story: &Story,
        dry_run: bool,
    ) -> (Vec<String>, Vec<String>, BTreeSet<String>) {
        let marker = &self.config.package.marker;
        let mut plan = Vec::new();
        let mut touched = Vec::new();
        for rel in normalize_all(&story.allowed_paths) {
            if file_name(&rel) != marker.as_str() || !is_plain_relative(&rel) {
                continue;
            }
            let path = self.root.join(&rel);
            let parent_exists = path.parent().is_some_and(Path::is_dir);
            if !parent_exists || path.exists() {
                continue;
            }
            plan.push(format!("Create {rel}"));
            if self.create_marker(&rel, STORY_MARKER_CONTENTS, dry_run) {
                touched.push(rel);
            }
        }
        (plan, touched, normalize_all(&story.allowed_paths))
    }

    /// Returns true when the file counts as touched (created, or planned under dry-run).
    fn create_marker(&self, rel: &str, contents: &str, dry_run: bool) -> bool {
        if dry_run {
            debug!(path = rel, "planned marker (dry run)");
            return true;
        }
        match write_new(&self.retry, &self.root.join(rel), contents) {
            Ok(()) => {
                debug!(path = rel, "created marker");
                true
            }
            Err(err) => {
                warn!(path = rel, err = %format!("{err:#}"), "failed to create marker");
                false
            }
        }
    }

    fn checksums(&self, touched: &[String]) -> BTreeMap<String, String> {
        touched
            .iter()
            .filter_map(|rel| {
                checksum_file(&self.root.join(rel))
                    .ok()
                    .map(|sum| (normalize(rel), sum))
            })
            .collect()
    }
}

fn blocked_outcome(story: &Story, preflight: PreflightReport, path: String) -> ExecutionOutcome {
    ExecutionOutcome {
        story_id: story.id.clone(),
        summary: SUMMARY_BLOCKED.to_string(),
        preflight,
        change_set: ChangeSet::default(),
        testing: TestingReport::default(),
        verification: None,
        compliance: ComplianceNote {
            result: "N-A".to_string(),
            notes: vec!["No edits performed".to_string()],
        },
        checkpoint: Checkpoint {
            touched: Vec::new(),
            checksums: BTreeMap::new(),
            coverage_delta: 0.0,
            resume_token: new_resume_token(),
        },
        rollback: ROLLBACK_NONE.to_string(),
        assumptions: vec![ASSUMPTION_OVERRIDE.to_string()],
        metrics_delta: MetricsDelta {
            throughput: 0,
            error_rate: 1.0,
        },
        classification: Some(Classification::BlockedNeedsOverride),
        blocked_path: Some(path),
        unauthorized: Vec::new(),
        log_tail: Vec::new(),
    }
}

fn is_plain_relative(rel: &str) -> bool {
    Path::new(rel)
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
}

fn tail_lines(output: &str, limit: usize) -> Vec<String> {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(limit);
    lines[start..].iter().map(|line| line.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fix_gate::synthesize;
    use crate::test_support::{ScriptedVerifier, StaticImportProbe, story};
    use std::fs;

    fn write(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, "").expect("write");
    }

    fn input<'a>(story: &'a Story, zone: &'a BTreeSet<String>, grants: &'a [String]) -> ExecutionInput<'a> {
        ExecutionInput {
            story,
            zone,
            grants,
            dry_run: false,
            previous_coverage: Some(90.0),
            quarantined: &[],
        }
    }

    #[test]
    fn protected_conflict_touches_nothing_and_skips_verification() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = OrchestratorConfig::default();
        let verifier = ScriptedVerifier::passing(99);
        let probe = StaticImportProbe::healthy();
        let executor = StoryExecutor::new(temp.path(), &cfg, &verifier, &probe);

        let mut s = story("S1", 1);
        s.allowed_paths = vec!["app/auth/__init__.py".to_string()];
        fs::create_dir_all(temp.path().join("app/auth")).expect("mkdir");
        let zone = normalize_all(["app/auth", "app/auth/__init__.py"]);

        let outcome = executor.execute(&input(&s, &zone, &[]));
        assert_eq!(outcome.classification, Some(Classification::BlockedNeedsOverride));
        assert_eq!(outcome.blocked_path.as_deref(), Some("app/auth/__init__.py"));
        assert!(outcome.checkpoint.touched.is_empty());
        assert!(!outcome.testing.ran);
        assert_eq!(verifier.calls(), 0);
        assert!(!temp.path().join("app/auth/__init__.py").exists());
    }

    #[test]
    fn override_grant_releases_protected_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = OrchestratorConfig::default();
        let verifier = ScriptedVerifier::passing(97);
        let probe = StaticImportProbe::healthy();
        let executor = StoryExecutor::new(temp.path(), &cfg, &verifier, &probe);

        let mut s = story("S1", 1);
        s.allowed_paths = vec!["app/auth/__init__.py".to_string()];
        fs::create_dir_all(temp.path().join("app/auth")).expect("mkdir");
        let zone = normalize_all(["app/auth", "app/auth/__init__.py"]);
        let grants = vec!["app/auth".to_string()];

        let outcome = executor.execute(&input(&s, &zone, &grants));
        assert!(outcome.succeeded());
        assert_eq!(outcome.checkpoint.touched, vec!["app/auth/__init__.py".to_string()]);
        assert!(outcome.checkpoint.checksums.contains_key("app/auth/__init__.py"));
        assert_eq!(outcome.checkpoint.coverage_delta, 7.0);
        assert_eq!(outcome.metrics_delta.throughput, 1);
        assert_eq!(verifier.calls(), 1);
        let contents = fs::read_to_string(temp.path().join("app/auth/__init__.py")).expect("read");
        assert_eq!(contents, STORY_MARKER_CONTENTS);
    }

    #[test]
    fn infra_directory_hint_does_not_block_files_beneath_it() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = OrchestratorConfig::default();
        let verifier = ScriptedVerifier::passing(97);
        let probe = StaticImportProbe::healthy();
        let executor = StoryExecutor::new(temp.path(), &cfg, &verifier, &probe);

        let mut s = story("S1", 1);
        s.allowed_paths = vec![
            "app/models/user.py".to_string(),
            "app/models/__init__.py".to_string(),
        ];
        fs::create_dir_all(temp.path().join("app/models")).expect("mkdir");
        let zone = normalize_all(&cfg.infra_hints);

        let outcome = executor.execute(&input(&s, &zone, &[]));
        assert!(outcome.succeeded());
        assert_eq!(outcome.blocked_path, None);
        assert_eq!(outcome.checkpoint.touched, vec!["app/models/__init__.py".to_string()]);
        assert_eq!(verifier.calls(), 1);
    }

    #[test]
    fn normal_story_only_creates_missing_markers_with_existing_parent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = OrchestratorConfig::default();
        let verifier = ScriptedVerifier::passing(96);
        let probe = StaticImportProbe::healthy();
        let executor = StoryExecutor::new(temp.path(), &cfg, &verifier, &probe);

        fs::create_dir_all(temp.path().join("pkg/a")).expect("mkdir");
        write(temp.path(), "pkg/b/__init__.py");
        let mut s = story("S2", 1);
        s.allowed_paths = vec![
            "./pkg/a/__init__.py".to_string(),
            "pkg/b/__init__.py".to_string(),
            "pkg/missing/__init__.py".to_string(),
            "pkg/a/service.py".to_string(),
            "../outside/__init__.py".to_string(),
        ];
        let zone = BTreeSet::new();

        let outcome = executor.execute(&input(&s, &zone, &[]));
        assert_eq!(outcome.change_set.files, vec!["pkg/a/__init__.py".to_string()]);
        assert!(outcome.unauthorized.is_empty());
        assert!(outcome.succeeded());
    }

    #[test]
    fn failing_verification_is_a_regression() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = OrchestratorConfig::default();
        let verifier = ScriptedVerifier::failing("FAILED tests/test_x.py::test_y\nTOTAL 10 5 50%");
        let probe = StaticImportProbe::healthy();
        let executor = StoryExecutor::new(temp.path(), &cfg, &verifier, &probe);

        let s = story("S3", 1);
        let zone = BTreeSet::new();
        let outcome = executor.execute(&input(&s, &zone, &[]));
        assert_eq!(outcome.classification, Some(Classification::OutOfScopeRegression));
        assert_eq!(outcome.metrics_delta.throughput, 0);
        assert_eq!(outcome.metrics_delta.error_rate, 1.0);
        assert_eq!(outcome.coverage(), 50.0);
        assert!(outcome.log_tail.iter().any(|line| line.contains("FAILED")));
    }

    #[test]
    fn fix_gate_adds_markers_under_source_roots() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "app/main.py");
        write(temp.path(), "tests/unit/test_main.py");
        write(temp.path(), "tests/__init__.py");
        let cfg = OrchestratorConfig::default();
        let verifier = ScriptedVerifier::passing(95);
        let probe = StaticImportProbe::broken("ModuleNotFoundError: app");
        let executor = StoryExecutor::new(temp.path(), &cfg, &verifier, &probe);

        let gate = synthesize(false, true).expect("gate");
        let zone = normalize_all(["app/main.py"]);
        let outcome = executor.execute(&input(&gate, &zone, &[]));

        assert_eq!(
            outcome.change_set.files,
            vec!["app/__init__.py".to_string(), "tests/unit/__init__.py".to_string()]
        );
        assert!(outcome.summary.ends_with("Fix-Gate=true"));
        assert!(!outcome.preflight.import_package.ok);
        let contents = fs::read_to_string(temp.path().join("app/__init__.py")).expect("read");
        assert_eq!(contents, cfg.package.marker_contents);
        assert!(outcome.succeeded());
    }

    #[test]
    fn dry_run_plans_without_writing() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(temp.path(), "app/main.py");
        let cfg = OrchestratorConfig::default();
        let verifier = ScriptedVerifier::passing(95);
        let probe = StaticImportProbe::healthy();
        let executor = StoryExecutor::new(temp.path(), &cfg, &verifier, &probe);

        let gate = synthesize(true, false).expect("gate");
        let zone = BTreeSet::new();
        let mut req = input(&gate, &zone, &[]);
        req.dry_run = true;
        let outcome = executor.execute(&req);

        assert_eq!(outcome.change_set.files, vec!["app/__init__.py".to_string()]);
        assert!(outcome.checkpoint.checksums.is_empty());
        assert!(!temp.path().join("app/__init__.py").exists());
    }
}
