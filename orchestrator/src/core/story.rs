//! Strict story values and their parse-boundary normalization.
//!
//! Backlog files are loosely typed. Everything funnels through
//! [`Story::from_value`], which applies the documented defaults and rejects
//! records that cannot be interpreted instead of patching them downstream.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::types::StoryStatus;

/// Priority assigned when a record omits one (lowest urgency).
pub const DEFAULT_PRIORITY: i64 = 999;
/// Risk level assigned when a record omits one.
pub const DEFAULT_RISK_LEVEL: &str = "medium";

/// Reasons a backlog record is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoryRecordError {
    #[error("story record is not an object")]
    NotAnObject,
    #[error("story record has no id")]
    MissingId,
    #[error("story id must be a non-empty string or integer")]
    InvalidId,
    #[error("field '{field}' has an invalid type (expected {expected})")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// A normalized backlog story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub priority: i64,
    pub status: StoryStatus,
    pub dependencies: Vec<String>,
    pub allowed_paths: Vec<String>,
    pub risk_level: String,
    pub assigned_role: Option<String>,
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub auto_generated: bool,
}

impl Story {
    /// Construct a story with every optional field at its default.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            priority: DEFAULT_PRIORITY,
            status: StoryStatus::Ready,
            dependencies: Vec::new(),
            allowed_paths: Vec::new(),
            risk_level: DEFAULT_RISK_LEVEL.to_string(),
            assigned_role: None,
            acceptance_criteria: Vec::new(),
            auto_generated: false,
        }
    }

    /// Normalize a decoded backlog record.
    ///
    /// - `status` falls back to `ready` when missing or not one of the four values.
    /// - `dependencies` / `allowed_paths` default to empty.
    /// - `priority` defaults to [`DEFAULT_PRIORITY`].
    pub fn from_value(value: &Value) -> Result<Self, StoryRecordError> {
        let object = value.as_object().ok_or(StoryRecordError::NotAnObject)?;
        let id = parse_id(object)?;

        let mut story = Story::new(id);
        story.title = optional_string(object, "title")?.unwrap_or_default();
        story.priority = parse_priority(object)?;
        story.status = object
            .get("status")
            .and_then(Value::as_str)
            .and_then(StoryStatus::parse)
            .unwrap_or(StoryStatus::Ready);
        story.dependencies = string_list(object, "dependencies")?;
        story.allowed_paths = string_list(object, "allowed_paths")?;
        if let Some(risk) = optional_string(object, "risk_level")? {
            story.risk_level = risk;
        }
        story.assigned_role = optional_string(object, "assigned_role")?;
        story.acceptance_criteria = criteria(object)?;
        story.auto_generated = object
            .get("auto_generated")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(story)
    }

    /// Canonical backlog order: priority, then title, then id.
    pub fn backlog_order(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.title.cmp(&other.title))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Sort stories into canonical backlog order (stable).
pub fn sort_backlog(stories: &mut [Story]) {
    stories.sort_by(Story::backlog_order);
}

fn parse_id(object: &Map<String, Value>) -> Result<String, StoryRecordError> {
    match object.get("id") {
        None | Some(Value::Null) => Err(StoryRecordError::MissingId),
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Some(Value::Number(id)) if id.is_i64() || id.is_u64() => Ok(id.to_string()),
        Some(_) => Err(StoryRecordError::InvalidId),
    }
}

fn parse_priority(object: &Map<String, Value>) -> Result<i64, StoryRecordError> {
    match object.get("priority") {
        None | Some(Value::Null) => Ok(DEFAULT_PRIORITY),
        Some(Value::Number(number)) => number.as_i64().ok_or(StoryRecordError::InvalidField {
            field: "priority",
            expected: "integer",
        }),
        Some(_) => Err(StoryRecordError::InvalidField {
            field: "priority",
            expected: "integer",
        }),
    }
}

fn optional_string(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, StoryRecordError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(Value::Number(value)) => Ok(Some(value.to_string())),
        Some(_) => Err(StoryRecordError::InvalidField {
            field,
            expected: "string",
        }),
    }
}

fn string_list(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Vec<String>, StoryRecordError> {
    let invalid = StoryRecordError::InvalidField {
        field,
        expected: "list of strings",
    };
    match object.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(value) => Ok(value.clone()),
                Value::Number(value) => Ok(value.to_string()),
                _ => Err(StoryRecordError::InvalidField {
                    field,
                    expected: "list of strings",
                }),
            })
            .collect(),
        Some(_) => Err(invalid),
    }
}

fn criteria(object: &Map<String, Value>) -> Result<Vec<String>, StoryRecordError> {
    match object.get("acceptance_criteria") {
        Some(Value::String(single)) => Ok(vec![single.clone()]),
        _ => string_list(object, "acceptance_criteria"),
    }
}
