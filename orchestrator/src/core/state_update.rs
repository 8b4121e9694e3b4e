//! Orchestrator-owned state transitions.
//!
//! Every function takes `now` explicitly so transitions stay deterministic.

use std::collections::{BTreeMap, HashSet};

use crate::core::path::normalize;
use crate::core::story::Story;
use crate::core::types::{MetricsDelta, StoryStatus};
use crate::state::{ArtifactEntry, CoverageSample, StoryRecord, WorkspaceState};

/// Summary of what a reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: Vec<String>,
    pub tracked: usize,
}

/// Track newly discovered backlog stories without resetting known ones.
///
/// Known ids keep their persisted record. Records whose story has left the
/// backlog are kept. New ids are appended in backlog order.
pub fn reconcile(state: &mut WorkspaceState, backlog: &[Story]) -> ReconcileSummary {
    let mut known: HashSet<String> = state.stories.iter().map(|r| r.id.clone()).collect();
    let mut summary = ReconcileSummary::default();
    for story in backlog {
        if known.insert(story.id.clone()) {
            state.stories.push(StoryRecord::new(
                story.id.clone(),
                story.status,
                story.assigned_role.clone(),
            ));
            summary.added.push(story.id.clone());
        }
    }
    summary.tracked = state.stories.len();
    summary
}

/// Backlog stories with their persisted status applied (state wins).
pub fn effective_stories(backlog: &[Story], state: &WorkspaceState) -> Vec<Story> {
    let statuses: BTreeMap<&str, StoryStatus> = state
        .stories
        .iter()
        .map(|record| (record.id.as_str(), record.status))
        .collect();
    backlog
        .iter()
        .map(|story| {
            let mut story = story.clone();
            if let Some(status) = statuses.get(story.id.as_str()) {
                story.status = *status;
            }
            story
        })
        .collect()
}

/// Set a story's status, creating its record if absent.
///
/// `begin_attempt` increments `attempts` and stamps `started_at` once.
/// Moving to `done` stamps `completed_at`.
pub fn mark_story(
    state: &mut WorkspaceState,
    story_id: &str,
    status: StoryStatus,
    assigned_role: Option<&str>,
    begin_attempt: bool,
    now: &str,
) {
    if state.record(story_id).is_none() {
        state.stories.push(StoryRecord::new(
            story_id,
            status,
            assigned_role.map(str::to_string),
        ));
    }
    let Some(record) = state.record_mut(story_id) else {
        return;
    };
    record.status = status;
    if begin_attempt {
        record.attempts += 1;
        if record.started_at.is_none() {
            record.started_at = Some(now.to_string());
        }
    }
    if status == StoryStatus::Done {
        record.completed_at = Some(now.to_string());
    }
    if let Some(role) = assigned_role {
        record.assigned_role = Some(role.to_string());
    }
}

/// Finish an attempt: `done` on success, `blocked` otherwise, and credit the role.
pub fn finish_story(
    state: &mut WorkspaceState,
    story_id: &str,
    success: bool,
    assigned_role: Option<&str>,
    now: &str,
) -> StoryStatus {
    let status = if success {
        StoryStatus::Done
    } else {
        StoryStatus::Blocked
    };
    mark_story(state, story_id, status, assigned_role, false, now);
    let role = state
        .record(story_id)
        .and_then(|record| record.assigned_role.clone());
    if let Some(role) = role {
        let progress = state.role_progress.entry(role).or_default();
        if success {
            progress.done += 1;
        } else {
            progress.blocked += 1;
        }
    }
    status
}

/// Throughput accumulates; error rate reflects the latest execution.
pub fn apply_metrics(state: &mut WorkspaceState, delta: MetricsDelta) {
    state.metrics.throughput += delta.throughput;
    state.metrics.error_rate = delta.error_rate;
}

pub fn push_coverage(state: &mut WorkspaceState, percent: f64, now: &str) {
    state.coverage_history.push(CoverageSample {
        timestamp: now.to_string(),
        percent,
    });
}

/// Merge touched-file checksums into the manifest, attributing them to `story_id`.
///
/// Keeps entries unique by path and sorted by path.
pub fn record_artifacts(
    state: &mut WorkspaceState,
    checksums: &BTreeMap<String, String>,
    story_id: &str,
) {
    for (path, checksum) in checksums {
        let path = normalize(path);
        match state
            .artifacts_manifest
            .iter_mut()
            .find(|entry| entry.path == path)
        {
            Some(entry) => {
                entry.checksum = checksum.clone();
                entry.last_story = Some(story_id.to_string());
            }
            None => state.artifacts_manifest.push(ArtifactEntry {
                path,
                checksum: checksum.clone(),
                last_story: Some(story_id.to_string()),
            }),
        }
    }
    canonicalize_manifest(&mut state.artifacts_manifest);
}

/// Sort by path and drop later duplicates.
pub fn canonicalize_manifest(entries: &mut Vec<ArtifactEntry>) {
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries.dedup_by(|later, earlier| later.path == earlier.path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EnvironmentFingerprint;
    use crate::test_support::story;

    const NOW: &str = "2024-05-01T10:00:00Z";
    const LATER: &str = "2024-05-01T11:00:00Z";

    fn empty_state() -> WorkspaceState {
        WorkspaceState::skeleton(
            EnvironmentFingerprint::default(),
            Vec::new(),
            "token".to_string(),
            NOW.to_string(),
        )
    }

    #[test]
    fn reconcile_appends_new_and_keeps_known() {
        let mut state = empty_state();
        state
            .stories
            .push(StoryRecord::new("A", StoryStatus::Done, None));
        state
            .stories
            .push(StoryRecord::new("gone", StoryStatus::Blocked, None));

        let mut a = story("A", 1);
        a.status = StoryStatus::Ready;
        let backlog = vec![a, story("B", 2)];

        let summary = reconcile(&mut state, &backlog);
        assert_eq!(summary.added, vec!["B".to_string()]);
        assert_eq!(summary.tracked, 3);
        assert_eq!(state.record("A").map(|r| r.status), Some(StoryStatus::Done));
        assert!(state.record("gone").is_some());

        let again = reconcile(&mut state, &backlog);
        assert!(again.added.is_empty());
        assert_eq!(state.stories.len(), 3);
    }

    #[test]
    fn effective_status_prefers_state() {
        let mut state = empty_state();
        state
            .stories
            .push(StoryRecord::new("A", StoryStatus::Done, None));
        let stories = effective_stories(&[story("A", 1), story("B", 2)], &state);
        assert_eq!(stories[0].status, StoryStatus::Done);
        assert_eq!(stories[1].status, StoryStatus::Ready);
    }

    #[test]
    fn mark_story_tracks_attempt_timestamps() {
        let mut state = empty_state();
        mark_story(&mut state, "A", StoryStatus::InProgress, Some("dev"), true, NOW);
        mark_story(&mut state, "A", StoryStatus::InProgress, None, true, LATER);
        let record = state.record("A").expect("record");
        assert_eq!(record.attempts, 2);
        assert_eq!(record.started_at.as_deref(), Some(NOW));
        assert_eq!(record.completed_at, None);
        assert_eq!(record.assigned_role.as_deref(), Some("dev"));

        let status = finish_story(&mut state, "A", true, None, LATER);
        assert_eq!(status, StoryStatus::Done);
        let record = state.record("A").expect("record");
        assert_eq!(record.completed_at.as_deref(), Some(LATER));
        assert_eq!(state.role_progress["dev"].done, 1);
    }

    #[test]
    fn failed_finish_blocks_and_counts_role() {
        let mut state = empty_state();
        mark_story(&mut state, "A", StoryStatus::InProgress, Some("qa"), true, NOW);
        assert_eq!(
            finish_story(&mut state, "A", false, None, LATER),
            StoryStatus::Blocked
        );
        assert_eq!(state.role_progress["qa"].blocked, 1);
        assert_eq!(state.record("A").and_then(|r| r.completed_at.clone()), None);
    }

    #[test]
    fn metrics_accumulate_throughput() {
        let mut state = empty_state();
        apply_metrics(&mut state, MetricsDelta { throughput: 1, error_rate: 0.0 });
        apply_metrics(&mut state, MetricsDelta { throughput: 0, error_rate: 1.0 });
        assert_eq!(state.metrics.throughput, 1);
        assert_eq!(state.metrics.error_rate, 1.0);
    }

    #[test]
    fn artifacts_stay_unique_and_sorted() {
        let mut state = empty_state();
        state.artifacts_manifest.push(ArtifactEntry {
            path: "b.py".to_string(),
            checksum: "old".to_string(),
            last_story: None,
        });
        let checksums = BTreeMap::from([
            ("./b.py".to_string(), "new".to_string()),
            ("a/__init__.py".to_string(), "abc".to_string()),
        ]);
        record_artifacts(&mut state, &checksums, "S1");

        let paths: Vec<&str> = state
            .artifacts_manifest
            .iter()
            .map(|entry| entry.path.as_str())
            .collect();
        assert_eq!(paths, vec!["a/__init__.py", "b.py"]);
        assert_eq!(state.artifacts_manifest[1].checksum, "new");
        assert_eq!(state.artifacts_manifest[1].last_story.as_deref(), Some("S1"));
    }
}
