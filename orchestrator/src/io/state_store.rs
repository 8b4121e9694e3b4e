//! Workspace state persistence with schema validation and rebuild-on-corruption.
//!
//! Single-writer: no locking is performed, so one orchestrator instance per
//! workspace is assumed.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::io::config::OrchestratorConfig;
use crate::io::paths::OrchestratorPaths;
use crate::io::retry::{self, RetryPolicy};
use crate::io::{fingerprint, manifest};
use crate::state::{WorkspaceState, new_resume_token, now_timestamp};

pub const STATE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/state/v1.schema.json"
));

/// How a loaded document came to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOrigin {
    /// Existing valid document returned unchanged.
    Loaded,
    /// No document existed; a fresh one was written.
    Created,
    /// The document was unreadable or invalid and was replaced.
    Rebuilt { reason: String },
}

#[derive(Debug, Clone)]
pub struct LoadedState {
    pub state: WorkspaceState,
    pub origin: LoadOrigin,
}

/// Persistence seam for the workspace state document.
pub trait StateRepository {
    /// Return the persisted document, rebuilding it when missing or invalid.
    fn load(&self) -> Result<LoadedState>;
    /// Recompute and persist a fresh document unconditionally.
    fn rebuild(&self) -> Result<WorkspaceState>;
    /// Stamp `last_updated` and persist atomically.
    fn save(&self, state: &mut WorkspaceState) -> Result<()>;
}

/// Filesystem store at `<root>/.orchestrator/state.json`.
#[derive(Debug, Clone)]
pub struct FsStateStore {
    paths: OrchestratorPaths,
    config: OrchestratorConfig,
    retry: RetryPolicy,
}

impl FsStateStore {
    pub fn new(paths: OrchestratorPaths, config: OrchestratorConfig) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        Self {
            paths,
            config,
            retry,
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.paths.state_path
    }

    /// Read the persisted document without creating or repairing it.
    pub fn peek(&self) -> Option<WorkspaceState> {
        if !self.paths.state_path.exists() {
            return None;
        }
        self.read_existing()
            .map_err(|err| debug!(err = %format!("{err:#}"), "state not readable"))
            .ok()
    }

    fn fresh(&self) -> Result<WorkspaceState> {
        let artifacts = manifest::build(&self.paths.root)?;
        let fingerprint = fingerprint::build(&self.paths.root, &self.config);
        Ok(WorkspaceState::skeleton(
            fingerprint,
            artifacts,
            new_resume_token(),
            now_timestamp(),
        ))
    }

    fn read_existing(&self) -> Result<WorkspaceState> {
        let raw = retry::read_to_string(&self.retry, &self.paths.state_path)?;
        parse_state(&raw)
    }
}

impl StateRepository for FsStateStore {
    #[instrument(skip_all, fields(path = %self.paths.state_path.display()))]
    fn load(&self) -> Result<LoadedState> {
        if !self.paths.state_path.exists() {
            info!("no state document, creating");
            let state = self.rebuild()?;
            return Ok(LoadedState {
                state,
                origin: LoadOrigin::Created,
            });
        }
        match self.read_existing() {
            Ok(state) => {
                debug!(stories = state.stories.len(), "state loaded");
                Ok(LoadedState {
                    state,
                    origin: LoadOrigin::Loaded,
                })
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(reason = %reason, "state document invalid, rebuilding");
                let state = self.rebuild()?;
                Ok(LoadedState {
                    state,
                    origin: LoadOrigin::Rebuilt { reason },
                })
            }
        }
    }

    fn rebuild(&self) -> Result<WorkspaceState> {
        let mut state = self.fresh()?;
        self.save(&mut state)?;
        info!(
            artifacts = state.artifacts_manifest.len(),
            resume_token = %state.resume_token,
            "state rebuilt"
        );
        Ok(state)
    }

    fn save(&self, state: &mut WorkspaceState) -> Result<()> {
        state.last_updated = now_timestamp();
        let buf = serialize_state(state)?;
        debug!(stories = state.stories.len(), "writing state");
        retry::write_atomic(&self.retry, &self.paths.state_path, &buf)
    }
}

/// Pretty JSON with a trailing newline.
pub fn serialize_state(state: &WorkspaceState) -> Result<String> {
    let mut buf = serde_json::to_string_pretty(state).context("serialize state")?;
    buf.push('\n');
    Ok(buf)
}

/// Parse, schema-check, then strictly deserialize a state document.
pub fn parse_state(raw: &str) -> Result<WorkspaceState> {
    let value: Value = serde_json::from_str(raw.trim_start_matches('\u{feff}'))
        .context("parse state json")?;
    validate_schema(&value)?;
    serde_json::from_value(value).context("deserialize state")
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(STATE_SCHEMA).context("parse state schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "state schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store(root: &Path) -> FsStateStore {
        FsStateStore::new(OrchestratorPaths::new(root), OrchestratorConfig::default())
    }

    #[test]
    fn load_creates_then_returns_same_document() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("main.py"), "print(1)\n").expect("write");
        let store = store(temp.path());

        let first = store.load().expect("first load");
        assert_eq!(first.origin, LoadOrigin::Created);
        assert!(store.state_path().is_file());
        assert_eq!(first.state.artifacts_manifest.len(), 1);

        let second = store.load().expect("second load");
        assert_eq!(second.origin, LoadOrigin::Loaded);
        assert_eq!(second.state, first.state);
    }

    #[test]
    fn load_rebuilds_on_invalid_syntax() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        fs::create_dir_all(temp.path().join(".orchestrator")).expect("mkdir");
        fs::write(store.state_path(), "{not json").expect("write");

        let loaded = store.load().expect("load");
        assert!(matches!(loaded.origin, LoadOrigin::Rebuilt { .. }));
        assert!(loaded.state.stories.is_empty());

        let persisted = fs::read_to_string(store.state_path()).expect("read");
        assert!(parse_state(&persisted).is_ok());
    }

    #[test]
    fn load_rebuilds_when_required_key_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let created = store.load().expect("create").state;

        let mut value = serde_json::to_value(&created).expect("to value");
        value
            .as_object_mut()
            .expect("object")
            .remove("resume_token");
        fs::write(store.state_path(), value.to_string()).expect("write");

        let loaded = store.load().expect("load");
        match loaded.origin {
            LoadOrigin::Rebuilt { reason } => assert!(reason.contains("resume_token")),
            other => panic!("expected rebuild, got {other:?}"),
        }
        assert_ne!(loaded.state.resume_token, created.resume_token);
    }

    #[test]
    fn load_rebuilds_on_wrong_types() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let created = store.load().expect("create").state;
        let mut value = serde_json::to_value(&created).expect("to value");
        value["stories"] = serde_json::json!([{"id": "A", "status": "weird"}]);
        fs::write(store.state_path(), value.to_string()).expect("write");

        let loaded = store.load().expect("load");
        assert!(matches!(loaded.origin, LoadOrigin::Rebuilt { .. }));
    }

    #[test]
    fn save_output_is_deterministic() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let state = store.load().expect("load").state;
        let first = serialize_state(&state).expect("first");
        let second = serialize_state(&state).expect("second");
        assert_eq!(first, second);
        assert!(first.ends_with('\n'));
    }

    #[test]
    fn rebuild_issues_new_resume_token() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        let first = store.load().expect("load").state;
        let rebuilt = store.rebuild().expect("rebuild");
        assert_ne!(first.resume_token, rebuilt.resume_token);
    }

    #[test]
    fn peek_never_writes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = store(temp.path());
        assert!(store.peek().is_none());
        assert!(!store.state_path().exists());

        fs::create_dir_all(temp.path().join(".orchestrator")).expect("mkdir");
        fs::write(store.state_path(), "{broken").expect("write");
        assert!(store.peek().is_none());
        assert_eq!(fs::read_to_string(store.state_path()).expect("read"), "{broken");
    }
}
