//! Initialization helpers for `.orchestrator/` scaffolding.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::io::config::{OrchestratorConfig, load_config, write_config};
use crate::io::paths::OrchestratorPaths;
use crate::io::state_store::{FsStateStore, StateRepository};

const ORCHESTRATOR_GITIGNORE: &str = "*.tmp\n";

/// Options for `init_workspace`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing orchestrator-owned files.
    pub force: bool,
}

/// Create `.orchestrator/` scaffolding, the backlog directory and the
/// initial state document in `root`.
///
/// Fails if `.orchestrator/` already exists unless `options.force` is set.
/// Story files already in the backlog directory are never touched.
pub fn init_workspace(root: &Path, options: &InitOptions) -> Result<OrchestratorPaths> {
    let paths = OrchestratorPaths::new(root);
    if paths.orchestrator_dir.exists() && !paths.orchestrator_dir.is_dir() {
        return Err(anyhow!("init: .orchestrator exists but is not a directory"));
    }
    if paths.orchestrator_dir.exists() && !options.force {
        return Err(anyhow!(
            "init: .orchestrator already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.orchestrator_dir)?;
    create_dir(&paths.overrides_dir)?;
    write_file(&paths.gitignore_path, ORCHESTRATOR_GITIGNORE)?;

    let config = if options.force && paths.config_path.exists() {
        // keep operator edits unless the file no longer parses
        load_config(&paths.config_path).unwrap_or_default()
    } else {
        OrchestratorConfig::default()
    };
    write_config(&paths.config_path, &config)?;
    create_dir(&paths.backlog_dir(&config.backlog_dir))?;

    let state = FsStateStore::new(paths.clone(), config).rebuild()?;
    info!(
        root = %root.display(),
        artifacts = state.artifacts_manifest.len(),
        "workspace initialized"
    );
    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::state_store::parse_state;

    fn read_to_string(path: &Path) -> String {
        fs::read_to_string(path).expect("read file")
    }

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();

        let paths = init_workspace(root, &InitOptions { force: false }).expect("init");

        assert!(paths.orchestrator_dir.is_dir());
        assert!(paths.overrides_dir.is_dir());
        assert!(paths.backlog_dir("backlog").is_dir());
        assert!(paths.config_path.is_file());
        assert_eq!(read_to_string(&paths.gitignore_path), ORCHESTRATOR_GITIGNORE);

        let cfg = load_config(&paths.config_path).expect("config");
        assert_eq!(cfg, OrchestratorConfig::default());

        let state = parse_state(&read_to_string(&paths.state_path)).expect("state");
        assert!(state.stories.is_empty());
        assert!(
            state
                .artifacts_manifest
                .iter()
                .all(|entry| !entry.path.starts_with(".orchestrator"))
        );
    }

    #[test]
    fn init_without_force_refuses_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();

        init_workspace(root, &InitOptions { force: false }).expect("init");
        let err = init_workspace(root, &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn init_with_force_keeps_config_and_resets_state() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let paths = init_workspace(root, &InitOptions { force: false }).expect("init");

        let mut cfg = load_config(&paths.config_path).expect("config");
        cfg.coverage_threshold = 80.0;
        write_config(&paths.config_path, &cfg).expect("write config");
        let before = parse_state(&read_to_string(&paths.state_path)).expect("state");

        init_workspace(root, &InitOptions { force: true }).expect("re-init");

        let cfg = load_config(&paths.config_path).expect("config");
        assert_eq!(cfg.coverage_threshold, 80.0);
        let after = parse_state(&read_to_string(&paths.state_path)).expect("state");
        assert_ne!(before.resume_token, after.resume_token);
    }
}
