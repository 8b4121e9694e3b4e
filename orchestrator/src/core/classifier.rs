//! Deterministic classification of execution outcomes into blocking issues.

use crate::core::types::{BlockingIssue, Classification, VerificationSummary};

pub const COVERAGE_ISSUE_ID: &str = "coverage_or_tests";
pub const ENVIRONMENT_ISSUE_ID: &str = "environment_import";

const COVERAGE_ACTION: &str =
    "Add/adjust targeted tests for touched modules ONLY, keep within allowed_paths. Then rerun.";

/// Signals gathered while executing one story, in gate order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionSignals {
    pub protected_conflict: bool,
    pub compliance_violation: bool,
    pub verification: Option<VerificationSummary>,
}

/// Classify an execution; `None` means full success.
///
/// A protected conflict wins over everything, then an unauthorized edit,
/// then a verification shortfall. Missing verification without an earlier
/// gate firing is treated as a regression.
pub fn classify(signals: &ExecutionSignals) -> Option<Classification> {
    if signals.protected_conflict {
        return Some(Classification::BlockedNeedsOverride);
    }
    if signals.compliance_violation {
        return Some(Classification::ComplianceViolation);
    }
    match signals.verification {
        Some(summary) if summary.success() => None,
        _ => Some(Classification::OutOfScopeRegression),
    }
}

/// Remediation for a protected-path conflict: create this override file.
pub fn override_issue(story_id: &str, override_file: &str, override_json: &str) -> BlockingIssue {
    BlockingIssue {
        id: story_id.to_string(),
        code: Classification::BlockedNeedsOverride,
        action: format!("Create override file {override_file} containing:\n{override_json}"),
    }
}

pub fn coverage_issue() -> BlockingIssue {
    BlockingIssue {
        id: COVERAGE_ISSUE_ID.to_string(),
        code: Classification::OutOfScopeRegression,
        action: COVERAGE_ACTION.to_string(),
    }
}

pub fn environment_issue(detail: &str) -> BlockingIssue {
    BlockingIssue {
        id: ENVIRONMENT_ISSUE_ID.to_string(),
        code: Classification::EnvironmentMismatch,
        action: format!("Make the package importable from the workspace root: {detail}"),
    }
}

pub fn compliance_issue(story_id: &str, paths: &[String]) -> BlockingIssue {
    BlockingIssue {
        id: story_id.to_string(),
        code: Classification::ComplianceViolation,
        action: format!(
            "Revert unauthorized edits or grant them via allowed_paths/override: {}",
            paths.join(", ")
        ),
    }
}
