//! Deterministic eligibility and selection over the backlog.
//!
//! A dependency that is not present in the status index is unsatisfied. The
//! same policy applies to selection, reporting and planning.

use std::collections::{BTreeMap, HashMap};

use crate::core::story::Story;
use crate::core::types::StoryStatus;

/// Map each story id to its current status.
pub fn status_index(stories: &[Story]) -> HashMap<&str, StoryStatus> {
    stories
        .iter()
        .map(|story| (story.id.as_str(), story.status))
        .collect()
}

/// True if every dependency of `story` is present in `index` and `done`.
pub fn dependencies_satisfied(story: &Story, index: &HashMap<&str, StoryStatus>) -> bool {
    story
        .dependencies
        .iter()
        .all(|dep| index.get(dep.as_str()) == Some(&StoryStatus::Done))
}

/// Select the first ready, dependency-satisfied story in backlog order.
///
/// `stories` is expected to already be in canonical backlog order.
pub fn pick_next(stories: &[Story]) -> Option<&Story> {
    let index = status_index(stories);
    stories
        .iter()
        .find(|story| is_candidate(story, &index))
}

/// Ids of up to `limit` eligible stories, in backlog order.
pub fn ready_candidates(stories: &[Story], limit: usize) -> Vec<String> {
    let index = status_index(stories);
    stories
        .iter()
        .filter(|story| is_candidate(story, &index))
        .take(limit)
        .map(|story| story.id.clone())
        .collect()
}

/// Count stories per status; every status is always present.
pub fn status_counts(stories: &[Story]) -> BTreeMap<StoryStatus, usize> {
    let mut counts: BTreeMap<StoryStatus, usize> =
        StoryStatus::ALL.into_iter().map(|status| (status, 0)).collect();
    for story in stories {
        *counts.entry(story.status).or_default() += 1;
    }
    counts
}

fn is_candidate(story: &Story, index: &HashMap<&str, StoryStatus>) -> bool {
    story.status == StoryStatus::Ready && dependencies_satisfied(story, index)
}
