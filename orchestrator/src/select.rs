//! Non-editing plan for `orchestrator select`.
//!
//! Picks the next backlog story and runs a preflight of its allowed paths
//! against the protected zone. Nothing is written.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::classifier::ENVIRONMENT_ISSUE_ID;
use crate::core::protected::{assemble_zone, blocking_paths};
use crate::core::selector::pick_next;
use crate::core::state_update::effective_stories;
use crate::core::story::Story;
use crate::core::types::Classification;
use crate::exit_codes;
use crate::io::backlog;
use crate::io::config::OrchestratorConfig;
use crate::io::health::ImportProbe;
use crate::io::overrides::OverrideRegistry;
use crate::io::paths::OrchestratorPaths;
use crate::state::WorkspaceState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    ReadyToExecute,
    BlockedNeedsOverride,
    EnvironmentMismatch,
    NoReadyStory,
}

/// The story a pass would execute next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoryPlan {
    pub story_id: String,
    pub title: String,
    pub priority: i64,
    pub allowed_paths: Vec<String>,
    pub risk_level: String,
    pub assigned_role: Option<String>,
}

impl From<&Story> for StoryPlan {
    fn from(story: &Story) -> Self {
        Self {
            story_id: story.id.clone(),
            title: story.title.clone(),
            priority: story.priority,
            allowed_paths: story.allowed_paths.clone(),
            risk_level: story.risk_level.clone(),
            assigned_role: story.assigned_role.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanPreflight {
    pub ok: bool,
    pub import_ok: bool,
    pub conflicts: Vec<String>,
    pub classification: Option<Classification>,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub status: PlanStatus,
    pub selected: Option<StoryPlan>,
    pub preflight: Option<PlanPreflight>,
}

impl Plan {
    pub fn exit_code(&self) -> i32 {
        match self.status {
            PlanStatus::ReadyToExecute => exit_codes::OK,
            PlanStatus::NoReadyStory => exit_codes::NOTHING_READY,
            PlanStatus::BlockedNeedsOverride | PlanStatus::EnvironmentMismatch => {
                exit_codes::BLOCKED
            }
        }
    }
}

/// Plan the next story from the backlog and the given (read-only) state.
pub fn plan_next<P: ImportProbe>(
    paths: &OrchestratorPaths,
    config: &OrchestratorConfig,
    state: &WorkspaceState,
    probe: &P,
) -> Plan {
    let backlog = backlog::discover(&paths.backlog_dir(&config.backlog_dir));
    let stories = effective_stories(&backlog.stories, state);
    let Some(story) = pick_next(&stories) else {
        return Plan {
            status: PlanStatus::NoReadyStory,
            selected: None,
            preflight: None,
        };
    };

    let zone = assemble_zone(&config.protected_paths, &config.infra_hints, state);
    let overrides = OverrideRegistry::load(&paths.overrides_dir);
    let preflight = check_plan(story, &zone, overrides.grants_for(&story.id), probe, paths);
    let status = match preflight.classification {
        None => PlanStatus::ReadyToExecute,
        Some(Classification::EnvironmentMismatch) => PlanStatus::EnvironmentMismatch,
        Some(_) => PlanStatus::BlockedNeedsOverride,
    };
    Plan {
        status,
        selected: Some(StoryPlan::from(story)),
        preflight: Some(preflight),
    }
}

fn check_plan<P: ImportProbe>(
    story: &Story,
    zone: &BTreeSet<String>,
    grants: &[String],
    probe: &P,
    paths: &OrchestratorPaths,
) -> PlanPreflight {
    let mut issues = Vec::new();
    let import = probe.probe(&paths.root);
    if !import.ok {
        issues.push(format!(
            "{ENVIRONMENT_ISSUE_ID}: {}",
            import.note.as_deref().unwrap_or("import check failed")
        ));
    }
    let conflicts = blocking_paths(&story.allowed_paths, zone, grants);
    if !conflicts.is_empty() {
        issues.push(format!(
            "allowed paths intersect the protected zone: {}",
            conflicts.join(", ")
        ));
    }
    let classification = if !conflicts.is_empty() {
        Some(Classification::BlockedNeedsOverride)
    } else if !import.ok {
        Some(Classification::EnvironmentMismatch)
    } else {
        None
    };
    PlanPreflight {
        ok: classification.is_none(),
        import_ok: import.ok,
        conflicts,
        classification,
        issues,
    }
}
