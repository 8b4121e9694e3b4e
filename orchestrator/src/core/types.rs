//! Shared deterministic types for orchestrator core logic.
//!
//! These types define stable contracts between core components and the
//! persisted state document. They must not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-story lifecycle status.
///
/// `ready → in_progress` on selection, `in_progress → done` when verification
/// passes, `in_progress → blocked` on verification failure or an unresolved
/// protected-path conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Ready,
    InProgress,
    Done,
    Blocked,
}

impl StoryStatus {
    pub const ALL: [StoryStatus; 4] = [
        StoryStatus::Ready,
        StoryStatus::InProgress,
        StoryStatus::Done,
        StoryStatus::Blocked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StoryStatus::Ready => "ready",
            StoryStatus::InProgress => "in_progress",
            StoryStatus::Done => "done",
            StoryStatus::Blocked => "blocked",
        }
    }

    /// Parse one of the four wire values. Anything else yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == raw)
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed taxonomy of blocking conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// A required edit path intersects the protected zone with no matching override.
    BlockedNeedsOverride,
    /// The codebase cannot be imported from the workspace root.
    EnvironmentMismatch,
    /// Verification failed (tests and/or coverage below threshold) after an edit.
    OutOfScopeRegression,
    /// An edit touched a path it was not authorized to touch.
    ComplianceViolation,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::BlockedNeedsOverride => "blocked_needs_override",
            Classification::EnvironmentMismatch => "environment_mismatch",
            Classification::OutOfScopeRegression => "out_of_scope_regression",
            Classification::ComplianceViolation => "compliance_violation",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw outcome of the external verification command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReport {
    /// Exit code, or `None` when the process was killed or could not be spawned.
    pub exit_code: Option<i32>,
    /// Combined stdout + stderr (possibly truncated).
    pub output: String,
    pub timed_out: bool,
}

impl CommandReport {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Interpreted verification result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerificationSummary {
    /// Parsed coverage percent (0 when no summary line was found).
    pub coverage: f64,
    pub coverage_ok: bool,
    /// Verification process exited with code 0.
    pub tests_ok: bool,
    pub timed_out: bool,
}

impl VerificationSummary {
    /// Full success: exit code zero and coverage at or above the threshold.
    pub fn success(&self) -> bool {
        self.tests_ok && self.coverage_ok
    }
}

/// Metrics contribution of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsDelta {
    pub throughput: u64,
    pub error_rate: f64,
}

/// A single operator action required to unblock the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingIssue {
    pub id: String,
    pub code: Classification,
    pub action: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_accepts_only_wire_values() {
        assert_eq!(StoryStatus::parse("ready"), Some(StoryStatus::Ready));
        assert_eq!(StoryStatus::parse("in_progress"), Some(StoryStatus::InProgress));
        assert_eq!(StoryStatus::parse("Done"), None);
        assert_eq!(StoryStatus::parse("weird"), None);
    }

    #[test]
    fn classification_serializes_snake_case() {
        let json = serde_json::to_string(&Classification::BlockedNeedsOverride).expect("json");
        assert_eq!(json, "\"blocked_needs_override\"");
        assert_eq!(
            Classification::OutOfScopeRegression.to_string(),
            "out_of_scope_regression"
        );
    }
}
