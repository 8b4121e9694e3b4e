//! Canonical workspace paths under `.orchestrator/`.

use std::path::{Path, PathBuf};

pub const ORCHESTRATOR_DIR: &str = ".orchestrator";
pub const OVERRIDE_SUFFIX: &str = ".override.json";

/// All canonical paths for a workspace root.
#[derive(Debug, Clone)]
pub struct OrchestratorPaths {
    pub root: PathBuf,
    pub orchestrator_dir: PathBuf,
    pub state_path: PathBuf,
    pub overrides_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl OrchestratorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let orchestrator_dir = root.join(ORCHESTRATOR_DIR);
        Self {
            root: root.clone(),
            state_path: orchestrator_dir.join("state.json"),
            overrides_dir: orchestrator_dir.join("overrides"),
            config_path: orchestrator_dir.join("config.toml"),
            gitignore_path: orchestrator_dir.join(".gitignore"),
            orchestrator_dir,
        }
    }

    /// Backlog directory, resolved against the root.
    pub fn backlog_dir(&self, configured: &str) -> PathBuf {
        self.root.join(configured)
    }

    /// Override file an operator creates to release `story_id`.
    pub fn override_file(&self, story_id: &str) -> PathBuf {
        self.overrides_dir
            .join(format!("{}{OVERRIDE_SUFFIX}", sanitize_file_stem(story_id)))
    }

    /// `path` relative to the root, with forward slashes; absolute if outside.
    pub fn display_relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

fn sanitize_file_stem(story_id: &str) -> String {
    story_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
