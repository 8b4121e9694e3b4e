//! Operator override registry (`.orchestrator/overrides/*.override.json`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::io::paths::OVERRIDE_SUFFIX;

pub const DEFAULT_REASON: &str = "Required to proceed";

/// A grant permitting one story to modify otherwise-protected paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideGrant {
    pub story_id: String,
    #[serde(default)]
    pub allow_paths: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl OverrideGrant {
    /// The override an operator would create to release `path` for `story_id`.
    pub fn template(story_id: &str, path: &str, now: &str) -> Self {
        Self {
            story_id: story_id.to_string(),
            allow_paths: vec![path.to_string()],
            reason: Some(DEFAULT_REASON.to_string()),
            timestamp: Some(now.to_string()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize override")
    }
}

/// Overrides keyed by story id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideRegistry {
    grants: BTreeMap<String, OverrideGrant>,
}

impl OverrideRegistry {
    /// Load every override file in `dir`; invalid files are skipped.
    ///
    /// Files are read in file-name order; grants for the same story merge
    /// their `allow_paths`, later metadata winning.
    pub fn load(dir: &Path) -> Self {
        let mut registry = Self::default();
        let Ok(entries) = fs::read_dir(dir) else {
            return registry;
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(OVERRIDE_SUFFIX))
            })
            .collect();
        files.sort();

        for path in files {
            match read_grant(&path) {
                Ok(grant) => registry.insert(grant),
                Err(err) => warn!(path = %path.display(), err = %format!("{err:#}"), "skipping override"),
            }
        }
        debug!(grants = registry.grants.len(), "overrides loaded");
        registry
    }

    pub fn insert(&mut self, grant: OverrideGrant) {
        match self.grants.get_mut(&grant.story_id) {
            Some(existing) => {
                for path in grant.allow_paths {
                    if !existing.allow_paths.contains(&path) {
                        existing.allow_paths.push(path);
                    }
                }
                if grant.reason.is_some() {
                    existing.reason = grant.reason;
                }
                if grant.timestamp.is_some() {
                    existing.timestamp = grant.timestamp;
                }
            }
            None => {
                self.grants.insert(grant.story_id.clone(), grant);
            }
        }
    }

    pub fn get(&self, story_id: &str) -> Option<&OverrideGrant> {
        self.grants.get(story_id)
    }

    /// Paths granted to `story_id` (empty when no override exists).
    pub fn grants_for(&self, story_id: &str) -> &[String] {
        self.get(story_id)
            .map(|grant| grant.allow_paths.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

fn read_grant(path: &Path) -> Result<OverrideGrant> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let grant: OverrideGrant = serde_json::from_str(raw.trim_start_matches('\u{feff}'))
        .with_context(|| format!("parse {}", path.display()))?;
    anyhow::ensure!(
        !grant.story_id.trim().is_empty(),
        "override {} has empty story_id",
        path.display()
    );
    Ok(grant)
}
