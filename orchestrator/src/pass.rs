//! Orchestration for a single `orchestrator run` pass.
//!
//! One pass loads state, probes repository health, picks at most one story
//! (the fix-gate preempts the backlog), executes it and persists the result.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::classifier::{compliance_issue, coverage_issue, environment_issue, override_issue};
use crate::core::fix_gate::{self, is_fix_gate};
use crate::core::protected::assemble_zone;
use crate::core::selector::{pick_next, ready_candidates, status_counts};
use crate::core::state_update::{
    apply_metrics, effective_stories, finish_story, mark_story, push_coverage, record_artifacts,
    reconcile,
};
use crate::core::story::Story;
use crate::core::types::{BlockingIssue, Classification, StoryStatus};
use crate::exit_codes;
use crate::io::backlog;
use crate::io::config::OrchestratorConfig;
use crate::io::executor::{ExecutionInput, ExecutionOutcome, StoryExecutor};
use crate::io::health::ImportProbe;
use crate::io::overrides::{OverrideGrant, OverrideRegistry};
use crate::io::paths::OrchestratorPaths;
use crate::io::state_store::{LoadOrigin, LoadedState, StateRepository};
use crate::io::verification::{VerificationRequest, Verifier, verify};
use crate::state::{Metrics, WorkspaceState, new_resume_token, now_timestamp};

pub const NEXT_READY_LIMIT: usize = 5;
const ZONE_KEY_PATHS: usize = 5;

const SUMMARY_BLOCKED: &str = "Run is blocked. Execute the single provided CMD to create an override or reconcile environment; then rerun the orchestrator.";
const SUMMARY_COMPLETE: &str =
    "All ready stories completed and coverage target met. Build complete; review release notes.";
const SUMMARY_SELECTED: &str =
    "Selected next item executed with minimal changes. Review logs and rerun to continue the batch.";
const SUMMARY_IDLE: &str =
    "No eligible ready stories. Add stories to backlog/ or provide overrides to proceed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassMode {
    Run,
    DryRun,
}

impl fmt::Display for PassMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PassMode::Run => "run",
            PassMode::DryRun => "dry_run",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    FixGate,
    Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedStory {
    pub story_id: String,
    pub title: String,
    pub reason: SelectionReason,
    pub assigned_role: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateDelta {
    /// A story was executed and the result persisted.
    Updated,
    /// Only backlog reconciliation or zone growth was persisted.
    Reconciled,
    /// Dry run: changes computed, nothing written.
    Planned,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSummary {
    pub count: usize,
    pub key_paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoverageSnapshot {
    pub current: f64,
    pub delta: f64,
    pub target: f64,
}

/// Everything a pass observed and decided, in report order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    pub mode: PassMode,
    pub executive_summary: String,
    pub blocking_issues: Vec<BlockingIssue>,
    pub progress: BTreeMap<StoryStatus, usize>,
    pub coverage: CoverageSnapshot,
    pub metrics: Metrics,
    pub selected: Option<SelectedStory>,
    pub protected_zone: ZoneSummary,
    pub state_delta: StateDelta,
    pub resume_token: String,
    pub next_ready: Vec<String>,
    pub execution: Option<ExecutionOutcome>,
    pub batch_complete: bool,
    pub release_notes: Vec<String>,
    pub logs: Vec<String>,
}

impl PassReport {
    /// Blocked beats idle; a completed batch or an executed story is OK.
    pub fn exit_code(&self) -> i32 {
        exit_codes::for_pass(
            !self.blocking_issues.is_empty(),
            self.selected.is_none() && !self.batch_complete,
        )
    }
}

/// Collaborators for one pass.
pub struct PassContext<'a, S, V, P> {
    pub paths: &'a OrchestratorPaths,
    pub config: &'a OrchestratorConfig,
    pub store: &'a S,
    pub verifier: &'a V,
    pub probe: &'a P,
}

#[derive(Default)]
struct PassLog {
    lines: Vec<String>,
}

impl PassLog {
    fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "orchestrator::pass", "{message}");
        self.lines.push(format!("{} {message}", now_timestamp()));
    }
}

/// Run one orchestration pass.
#[instrument(skip_all, fields(root = %ctx.paths.root.display(), mode = %mode))]
pub fn run_pass<S, V, P>(ctx: &PassContext<'_, S, V, P>, mode: PassMode) -> Result<PassReport>
where
    S: StateRepository,
    V: Verifier,
    P: ImportProbe,
{
    let PassContext {
        paths,
        config,
        store,
        verifier,
        probe,
    } = *ctx;
    let dry_run = mode == PassMode::DryRun;
    let mut log = PassLog::default();
    log.push(format!("start orchestrator: mode={mode}"));

    let LoadedState { mut state, origin } = store.load()?;
    let backlog = backlog::discover(&paths.backlog_dir(&config.backlog_dir));
    log.push(format!(
        "state {}; stories found={} files={} skipped={}",
        describe_origin(&origin),
        backlog.stories.len(),
        backlog.files.len(),
        backlog.skipped.len()
    ));

    let reconciled = reconcile(&mut state, &backlog.stories);
    let zone = assemble_zone(&config.protected_paths, &config.infra_hints, &state);
    let zone_paths: Vec<String> = zone.iter().cloned().collect();
    let mut dirty = !reconciled.added.is_empty() || state.protected_zone.paths != zone_paths;
    state.protected_zone.paths = zone_paths;
    let overrides = OverrideRegistry::load(&paths.overrides_dir);

    let import = probe.probe(&paths.root);
    let request = VerificationRequest::from_config(&paths.root, config);
    let (health, _) = verify(verifier, &request, config.coverage_threshold);
    log.push(format!(
        "health: import_ok={} tests_ok={} coverage={}%",
        import.ok, health.tests_ok, health.coverage
    ));

    let selection = match fix_gate::synthesize(import.ok, health.success()) {
        Some(gate) => {
            log.push("fix-gate triggered");
            Some((gate, SelectionReason::FixGate))
        }
        None => {
            let stories = effective_stories(&backlog.stories, &state);
            pick_next(&stories).cloned().map(|story| (story, SelectionReason::Priority))
        }
    };

    let previous_coverage = state.latest_coverage();
    let mut latest = health;
    let mut blocking: Vec<BlockingIssue> = Vec::new();
    let mut execution = None;

    if let Some((story, reason)) = &selection {
        log.push(format!("selected story={} reason={reason:?}", story.id));
        let tracked = !is_fix_gate(story);
        if tracked {
            let now = now_timestamp();
            mark_story(
                &mut state,
                &story.id,
                StoryStatus::InProgress,
                story.assigned_role.as_deref(),
                true,
                &now,
            );
            if !dry_run {
                state.resume_token = new_resume_token();
                store.save(&mut state)?;
            }
        }

        let executor = StoryExecutor::new(&paths.root, config, verifier, probe);
        let quarantined = state.quarantine_tests.clone();
        let outcome = executor.execute(&ExecutionInput {
            story,
            zone: &zone,
            grants: overrides.grants_for(&story.id),
            dry_run,
            previous_coverage,
            quarantined: &quarantined,
        });
        log.push(format!("executor: {}", outcome.summary));

        if let Some(issue) = settle(&mut state, story, &outcome, paths, tracked)? {
            blocking.push(issue);
        }
        if let Some(summary) = outcome.verification {
            latest = summary;
        }
        dirty = true;
        execution = Some(outcome);
    } else {
        log.push("no ready stories with dependencies satisfied");
    }

    if !import.ok && blocking.is_empty() {
        let after = probe.probe(&paths.root);
        if !after.ok {
            let detail = after.note.unwrap_or_else(|| "package does not import".to_string());
            blocking.push(environment_issue(&detail));
        }
    }

    let stories = effective_stories(&backlog.stories, &state);
    let batch_complete =
        stories.iter().all(|story| story.status != StoryStatus::Ready) && latest.coverage_ok;
    if !batch_complete && blocking.is_empty() && !latest.success() {
        blocking.push(coverage_issue());
    }
    let release_notes = if batch_complete {
        release_notes(&state)
    } else {
        Vec::new()
    };

    let state_delta = match (dry_run, dirty, selection.is_some()) {
        (true, _, _) => StateDelta::Planned,
        (false, false, _) => StateDelta::Unchanged,
        (false, true, true) => StateDelta::Updated,
        (false, true, false) => StateDelta::Reconciled,
    };
    if !dry_run && dirty {
        // an executed step persists under its checkpoint token, blocked or not
        state.resume_token = execution.as_ref().map_or_else(new_resume_token, |outcome| {
            outcome.checkpoint.resume_token.clone()
        });
        store.save(&mut state)?;
        log.push(format!("state saved: resume_token={}", state.resume_token));
    }

    let executive_summary = if !blocking.is_empty() {
        SUMMARY_BLOCKED
    } else if batch_complete {
        SUMMARY_COMPLETE
    } else if selection.is_some() {
        SUMMARY_SELECTED
    } else {
        SUMMARY_IDLE
    };

    Ok(PassReport {
        mode,
        executive_summary: executive_summary.to_string(),
        blocking_issues: blocking,
        progress: status_counts(&stories),
        coverage: CoverageSnapshot {
            current: latest.coverage,
            delta: round2(latest.coverage - previous_coverage.unwrap_or(latest.coverage)),
            target: config.coverage_threshold,
        },
        metrics: state.metrics,
        selected: selection.map(|(story, reason)| SelectedStory {
            story_id: story.id,
            title: story.title,
            reason,
            assigned_role: story.assigned_role,
        }),
        protected_zone: ZoneSummary {
            count: zone.len(),
            key_paths: zone.iter().take(ZONE_KEY_PATHS).cloned().collect(),
        },
        state_delta,
        resume_token: state.resume_token.clone(),
        next_ready: ready_candidates(&stories, NEXT_READY_LIMIT),
        execution,
        batch_complete,
        release_notes,
        logs: log.lines,
    })
}

/// Fold an execution outcome into state; returns the blocking issue it raises.
fn settle(
    state: &mut WorkspaceState,
    story: &Story,
    outcome: &ExecutionOutcome,
    paths: &OrchestratorPaths,
    tracked: bool,
) -> Result<Option<BlockingIssue>> {
    let now = now_timestamp();
    if outcome.classification == Some(Classification::BlockedNeedsOverride) {
        let path = outcome.blocked_path.clone().unwrap_or_default();
        let grant = OverrideGrant::template(&story.id, &path, &now);
        let file = paths.display_relative(&paths.override_file(&story.id));
        if tracked {
            mark_story(state, &story.id, StoryStatus::Blocked, None, false, &now);
        }
        return Ok(Some(override_issue(&story.id, &file, &grant.to_json()?)));
    }

    if tracked {
        finish_story(
            state,
            &story.id,
            outcome.succeeded(),
            story.assigned_role.as_deref(),
            &now,
        );
    }
    apply_metrics(state, outcome.metrics_delta);
    record_artifacts(state, &outcome.checkpoint.checksums, &story.id);
    if let Some(summary) = outcome.verification {
        push_coverage(state, summary.coverage, &now);
    }

    if outcome.classification == Some(Classification::ComplianceViolation) {
        return Ok(Some(compliance_issue(&story.id, &outcome.unauthorized)));
    }
    Ok(None)
}

fn release_notes(state: &WorkspaceState) -> Vec<String> {
    state
        .stories
        .iter()
        .filter(|record| record.status == StoryStatus::Done)
        .map(|record| {
            format!(
                "{}: completed by role {}",
                record.id,
                record.assigned_role.as_deref().unwrap_or("N/A")
            )
        })
        .collect()
}

fn describe_origin(origin: &LoadOrigin) -> String {
    match origin {
        LoadOrigin::Loaded => "loaded".to_string(),
        LoadOrigin::Created => "created".to_string(),
        LoadOrigin::Rebuilt { reason } => format!("rebuilt ({reason})"),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
