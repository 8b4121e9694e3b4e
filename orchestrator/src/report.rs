//! Rendering of pass reports for the terminal.
//!
//! `json` output is the serialized [`PassReport`]; `text` output follows a
//! fixed section layout and is scrubbed of emails and phone numbers.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;

use crate::core::types::StoryStatus;
use crate::pass::PassReport;

const REPORT_TEMPLATE: &str = include_str!("templates/report.txt");

static RE_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
});
static RE_PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\+?\d{1,3}[-.\s]?)?(?:\d{3}[-.\s]?){2}\d{4}\b").expect("valid phone regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Text,
}

#[derive(Serialize)]
struct StoryCounts {
    done: usize,
    in_progress: usize,
    ready: usize,
    blocked: usize,
}

impl StoryCounts {
    fn from_report(report: &PassReport) -> Self {
        let count = |status: StoryStatus| report.progress.get(&status).copied().unwrap_or(0);
        Self {
            done: count(StoryStatus::Done),
            in_progress: count(StoryStatus::InProgress),
            ready: count(StoryStatus::Ready),
            blocked: count(StoryStatus::Blocked),
        }
    }
}

struct ReportEngine {
    env: Environment<'static>,
}

impl ReportEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("report", REPORT_TEMPLATE)
            .expect("report template should be valid");
        Self { env }
    }

    fn render(&self, report: &PassReport) -> Result<String> {
        let template = self.env.get_template("report")?;
        let (preflight, preflight_notes) = match &report.execution {
            Some(outcome) => (
                outcome
                    .preflight
                    .checks()
                    .iter()
                    .map(|(name, check)| format!("{name}={}", check.ok))
                    .collect(),
                outcome.preflight.notes(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        let rendered = template.render(context! {
            report => report,
            stories => StoryCounts::from_report(report),
            exec => report.execution.as_ref(),
            preflight => preflight,
            preflight_notes => preflight_notes,
        })?;
        Ok(rendered)
    }
}

/// Render `report` in the requested format.
pub fn render(report: &PassReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => {
            let mut buf = serde_json::to_string_pretty(report).context("serialize pass report")?;
            buf.push('\n');
            Ok(buf)
        }
        ReportFormat::Text => {
            let mut rendered = ReportEngine::new()
                .render(report)
                .context("render pass report")?;
            rendered.push('\n');
            Ok(redact(&rendered))
        }
    }
}

/// Replace email addresses and phone numbers with placeholders.
pub fn redact(text: &str) -> String {
    let scrubbed = RE_EMAIL.replace_all(text, "[email_redacted]");
    RE_PHONE.replace_all(&scrubbed, "[phone_redacted]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::core::types::{BlockingIssue, Classification};
    use crate::pass::{
        CoverageSnapshot, PassMode, SelectedStory, SelectionReason, StateDelta, ZoneSummary,
    };
    use crate::state::Metrics;

    fn report() -> PassReport {
        PassReport {
            mode: PassMode::Run,
            executive_summary: "Selected next item executed.".to_string(),
            blocking_issues: Vec::new(),
            progress: BTreeMap::from([(StoryStatus::Done, 2), (StoryStatus::Ready, 1)]),
            coverage: CoverageSnapshot {
                current: 96.0,
                delta: 1.5,
                target: 95.0,
            },
            metrics: Metrics {
                throughput: 2,
                error_rate: 0.0,
            },
            selected: Some(SelectedStory {
                story_id: "S2".to_string(),
                title: "Add endpoint".to_string(),
                reason: SelectionReason::Priority,
                assigned_role: None,
            }),
            protected_zone: ZoneSummary {
                count: 2,
                key_paths: vec!["app/auth".to_string(), "app/main.py".to_string()],
            },
            state_delta: StateDelta::Updated,
            resume_token: "token-1".to_string(),
            next_ready: vec!["S3".to_string()],
            execution: None,
            batch_complete: false,
            release_notes: Vec::new(),
            logs: vec!["start orchestrator: mode=run".to_string()],
        }
    }

    #[test]
    fn redact_scrubs_emails_and_phone_numbers() {
        let text = "contact jane.doe@example.com or 555-123-4567 about S1";
        assert_eq!(
            redact(text),
            "contact [email_redacted] or [phone_redacted] about S1"
        );
        assert_eq!(redact("coverage 96.5%"), "coverage 96.5%");
    }

    #[test]
    fn text_report_has_sections_in_order() {
        let text = render(&report(), ReportFormat::Text).expect("render");
        let headers = [
            "EXECUTIVE SUMMARY:",
            "BLOCKING ISSUES:",
            "PROGRESS METRICS:",
            "DETAILED LOGS:",
            "ORCHESTRATOR OUTPUT:",
            "EXECUTOR OUTPUT",
        ];
        let positions: Vec<usize> = headers
            .iter()
            .map(|header| text.find(header).expect(header))
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(text.contains("- None"));
        assert!(text.contains("done=2 / in_progress=0 / ready=1 / blocked=0"));
        assert!(text.contains("Selected Work Item: S2 (priority)"));
        assert!(text.contains("No executor action performed this run."));
        assert!(!text.contains("BUILD_COMPLETE"));
    }

    #[test]
    fn text_report_lists_blocking_issue_and_release_notes() {
        let mut report = report();
        report.blocking_issues.push(BlockingIssue {
            id: "BLOCK-S1".to_string(),
            code: Classification::BlockedNeedsOverride,
            action: "create override".to_string(),
        });
        report.batch_complete = true;
        report.release_notes = vec!["S1: completed by role N/A".to_string()];

        let text = render(&report, ReportFormat::Text).expect("render");
        assert!(text.contains("- id=BLOCK-S1, code=blocked_needs_override, action=create override"));
        assert!(text.contains("BUILD_COMPLETE\nRELEASE NOTES:\n- S1: completed by role N/A"));
    }

    #[test]
    fn json_report_uses_snake_case_values() {
        let json = render(&report(), ReportFormat::Json).expect("render");
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["mode"], "run");
        assert_eq!(value["progress"]["done"], 2);
        assert_eq!(value["selected"]["reason"], "priority");
    }
}
