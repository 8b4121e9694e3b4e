//! Persisted workspace state document (`.orchestrator/state.json`).
//!
//! Field order here is the serialized order. Maps are `BTreeMap` so the
//! document is byte-stable for identical content.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::types::StoryStatus;

pub const STATE_VERSION: u32 = 1;

/// Top-level keys every persisted document must carry.
pub const REQUIRED_KEYS: [&str; 12] = [
    "version",
    "last_updated",
    "environment_fingerprint",
    "stories",
    "artifacts_manifest",
    "coverage_history",
    "protected_zone",
    "resume_token",
    "quarantine_tests",
    "container_fingerprint",
    "metrics",
    "role_progress",
];

/// Current UTC time as RFC 3339 with second precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Opaque token written with every persisted mutation.
pub fn new_resume_token() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceState {
    pub version: u32,
    pub last_updated: String,
    pub environment_fingerprint: EnvironmentFingerprint,
    pub stories: Vec<StoryRecord>,
    pub artifacts_manifest: Vec<ArtifactEntry>,
    pub coverage_history: Vec<CoverageSample>,
    pub protected_zone: ProtectedZone,
    pub resume_token: String,
    pub quarantine_tests: Vec<String>,
    pub container_fingerprint: Option<Value>,
    pub metrics: Metrics,
    pub role_progress: BTreeMap<String, RoleProgress>,
    /// Unknown top-level keys, carried through load/save untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnvironmentFingerprint {
    pub os_identity: String,
    pub runtime_version: String,
    pub library_versions: BTreeMap<String, String>,
    pub run_commands: Vec<String>,
}

/// Mutable per-story record; the backlog file only seeds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryRecord {
    pub id: String,
    pub status: StoryStatus,
    pub attempts: u32,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub assigned_role: Option<String>,
}

impl StoryRecord {
    pub fn new(id: impl Into<String>, status: StoryStatus, assigned_role: Option<String>) -> Self {
        Self {
            id: id.into(),
            status,
            attempts: 0,
            started_at: None,
            completed_at: None,
            assigned_role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub checksum: String,
    pub last_story: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSample {
    pub timestamp: String,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtectedZone {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub throughput: u64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoleProgress {
    pub done: u64,
    pub blocked: u64,
}

impl WorkspaceState {
    /// Fresh document: no stories, zeroed metrics, empty history.
    pub fn skeleton(
        fingerprint: EnvironmentFingerprint,
        artifacts_manifest: Vec<ArtifactEntry>,
        resume_token: String,
        now: String,
    ) -> Self {
        Self {
            version: STATE_VERSION,
            last_updated: now,
            environment_fingerprint: fingerprint,
            stories: Vec::new(),
            artifacts_manifest,
            coverage_history: Vec::new(),
            protected_zone: ProtectedZone::default(),
            resume_token,
            quarantine_tests: Vec::new(),
            container_fingerprint: None,
            metrics: Metrics::default(),
            role_progress: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn record(&self, story_id: &str) -> Option<&StoryRecord> {
        self.stories.iter().find(|record| record.id == story_id)
    }

    pub fn record_mut(&mut self, story_id: &str) -> Option<&mut StoryRecord> {
        self.stories.iter_mut().find(|record| record.id == story_id)
    }

    /// Most recent coverage percent, if any verification has been recorded.
    pub fn latest_coverage(&self) -> Option<f64> {
        self.coverage_history.last().map(|sample| sample.percent)
    }
}
