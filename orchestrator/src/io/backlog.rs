//! Backlog discovery over `*.json`, `*.yml` and `*.yaml` story files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::core::story::{Story, sort_backlog};

const EXTENSIONS: [&str; 3] = ["json", "yml", "yaml"];

/// Result of scanning the backlog directory.
#[derive(Debug, Clone, Default)]
pub struct Backlog {
    /// Normalized stories in canonical backlog order.
    pub stories: Vec<Story>,
    /// Story files found (sorted).
    pub files: Vec<PathBuf>,
    /// Files skipped, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Discover and normalize stories; a missing directory yields an empty backlog.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn discover(dir: &Path) -> Backlog {
    let mut backlog = Backlog::default();
    let Ok(entries) = fs::read_dir(dir) else {
        debug!("backlog directory missing");
        return backlog;
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file() && has_story_extension(path))
        .collect();
    files.sort();

    for path in &files {
        match load_story(path) {
            Ok(story) => backlog.stories.push(story),
            Err(err) => {
                warn!(path = %path.display(), err = %format!("{err:#}"), "skipping story file");
                backlog.skipped.push((path.clone(), format!("{err:#}")));
            }
        }
    }
    backlog.files = files;
    sort_backlog(&mut backlog.stories);
    debug!(
        stories = backlog.stories.len(),
        skipped = backlog.skipped.len(),
        "backlog discovered"
    );
    backlog
}

fn has_story_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn load_story(path: &Path) -> Result<Story> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| !ext.eq_ignore_ascii_case("json"));
    let record = parse_record(&text, is_yaml)?;
    Story::from_value(&record).with_context(|| format!("normalize {}", path.display()))
}

/// Decode one story file's text into a loose record.
///
/// Text starting with `{` or `[` is JSON. Otherwise YAML files try a
/// structured parse first, then the flat `key: value` reader.
pub fn parse_record(text: &str, is_yaml: bool) -> Result<Value> {
    let stripped = text.trim_start_matches('\u{feff}').trim();
    if stripped.starts_with('{') || stripped.starts_with('[') {
        let value: Value = serde_json::from_str(stripped).context("parse json story")?;
        return match value {
            Value::Object(_) => Ok(value),
            _ => bail!("story file is not a single object"),
        };
    }
    if !is_yaml {
        bail!("json story file does not contain an object");
    }
    if let Ok(value @ Value::Object(_)) = serde_yaml::from_str::<Value>(stripped) {
        return Ok(value);
    }
    Ok(parse_flat(stripped))
}

/// Flat `key: value` reader: values are JSON-decoded, else unquoted strings.
pub fn parse_flat(text: &str) -> Value {
    let mut record = Map::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, raw)) = line.split_once(':') else {
            continue;
        };
        let raw = raw.trim();
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(unquote(raw)));
        record.insert(key.trim().to_string(), value);
    }
    Value::Object(record)
}

fn unquote(raw: &str) -> String {
    let quoted = raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')));
    if quoted {
        raw[1..raw.len() - 1].to_string()
    } else {
        raw.to_string()
    }
}
