//! Protected-zone assembly and enforcement.

use std::collections::BTreeSet;

use crate::core::path::{conflicts, covers, normalize, normalize_all};
use crate::core::types::StoryStatus;
use crate::state::WorkspaceState;

/// Union of declared paths, the persisted zone, infrastructure hints and
/// every artifact last touched by a story that is now `done`.
pub fn assemble_zone(
    declared: &[String],
    infra_hints: &[String],
    state: &WorkspaceState,
) -> BTreeSet<String> {
    let mut zone = normalize_all(declared);
    zone.extend(normalize_all(&state.protected_zone.paths));
    zone.extend(normalize_all(infra_hints));

    let done: BTreeSet<&str> = state
        .stories
        .iter()
        .filter(|record| record.status == StoryStatus::Done)
        .map(|record| record.id.as_str())
        .collect();
    for entry in &state.artifacts_manifest {
        if entry
            .last_story
            .as_deref()
            .is_some_and(|story| done.contains(story))
        {
            zone.insert(normalize(&entry.path));
        }
    }
    zone.remove("");
    zone
}

/// True when any override grant covers `path`.
pub fn granted(path: &str, grants: &[String]) -> bool {
    grants.iter().any(|grant| covers(grant, path))
}

/// First allowed path, in story order, that is a zone member and not
/// released by a grant.
///
/// Zone membership is exact: a directory entry such as `app/models` does not
/// protect `app/models/user.py`.
pub fn first_blocking_path(
    allowed_paths: &[String],
    zone: &BTreeSet<String>,
    grants: &[String],
) -> Option<String> {
    allowed_paths
        .iter()
        .map(|path| normalize(path))
        .find(|path| zone.contains(path) && !granted(path, grants))
}

/// Conflicts between the allowed paths and the zone still blocked after
/// grants, sorted and deduplicated.
pub fn blocking_paths(
    allowed_paths: &[String],
    zone: &BTreeSet<String>,
    grants: &[String],
) -> Vec<String> {
    conflicts(allowed_paths, zone)
        .into_iter()
        .filter(|path| !granted(path, grants))
        .collect()
}

/// Touched paths that are neither authorized nor granted, sorted.
pub fn unauthorized_paths(
    touched: &[String],
    authorized: &BTreeSet<String>,
    grants: &[String],
) -> Vec<String> {
    let mut rejected: Vec<String> = touched
        .iter()
        .map(|path| normalize(path))
        .filter(|path| !authorized.contains(path) && !granted(path, grants))
        .collect();
    rejected.sort();
    rejected.dedup();
    rejected
}
