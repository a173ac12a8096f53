//! Model response parsing.
//!
//! Models are asked for a YAML list but wrap it in prose, code fences or
//! reasoning text. [`yaml_payload`] picks the most likely YAML region;
//! [`parse_parameter_records`] turns it into raw records for consensus.
//! Parsing never fails outward: an unusable response is zero records.

use std::sync::LazyLock;

use consensus::RawParameterRecord;
use regex::Regex;
use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a YAML list or mapping, found {0}")]
    UnexpectedShape(&'static str),
}

/// Body of a ```` ```yaml ```` or ```` ```yml ```` fence.
static FENCED_YAML_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```ya?ml\s*(.*?)\s*```").expect("FENCED_YAML_RE regex should compile")
});

/// `name: value` or `- name: value` on its own line.
static NAME_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*-?\s*name:\s*(.+)$").expect("NAME_LINE_RE regex should compile")
});

/// The region of `text` most likely to hold the YAML answer.
///
/// A fenced `yaml`/`yml` block wins; otherwise everything from the first
/// line that starts with `- name:`; otherwise the whole text.
pub fn yaml_payload(text: &str) -> &str {
    if let Some(body) = FENCED_YAML_RE.captures(text).and_then(|c| c.get(1)) {
        return body.as_str();
    }
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with("- name:") {
            return &text[offset..];
        }
        offset += line.len();
    }
    text
}

fn shape_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn record_from_value(value: Value) -> Option<RawParameterRecord> {
    if !value.is_mapping() {
        return None;
    }
    match serde_yaml::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!(error = %e, "Skipping unreadable record");
            None
        }
    }
}

/// Strict form of [`parse_parameter_records`]; reports why nothing was usable.
pub fn try_parse_parameter_records(text: &str) -> Result<Vec<RawParameterRecord>, ParseError> {
    let parsed: Value = serde_yaml::from_str(yaml_payload(text))?;
    match parsed {
        Value::Sequence(items) => Ok(items.into_iter().filter_map(record_from_value).collect()),
        value @ Value::Mapping(_) => Ok(record_from_value(value).into_iter().collect()),
        other => Err(ParseError::UnexpectedShape(shape_of(&other))),
    }
}

/// Parse a model response into raw parameter records.
///
/// Non-mapping list items are skipped. Anything unusable yields an empty
/// list and a warning.
pub fn parse_parameter_records(text: &str) -> Vec<RawParameterRecord> {
    match try_parse_parameter_records(text) {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "Could not parse model response");
            Vec::new()
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn names_from_yaml(text: &str) -> Result<Vec<String>, ParseError> {
    let parsed: Value = serde_yaml::from_str(yaml_payload(text))?;
    let Value::Sequence(items) = parsed else {
        return Err(ParseError::UnexpectedShape(shape_of(&parsed)));
    };
    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::Mapping(map) => map.get("name").and_then(scalar_text),
            other => scalar_text(other),
        })
        .collect())
}

fn names_from_json(text: &str) -> Result<Vec<String>, ParseError> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Ok(Vec::new());
    };
    if end < start {
        return Ok(Vec::new());
    }
    let items: Vec<serde_json::Value> = serde_json::from_str(&text[start..=end])?;
    Ok(items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .collect())
}

/// Parameter names only, for scoring against ground truth.
///
/// Tries a YAML list (of mappings or plain strings), then `name:` lines,
/// then the outermost JSON array.
pub fn extract_parameter_names(text: &str) -> Vec<String> {
    if text.contains("- name:") {
        match names_from_yaml(text) {
            Ok(names) => return names,
            Err(e) => debug!(error = %e, "YAML name extraction failed, trying line match"),
        }
    }

    let matched: Vec<String> = NAME_LINE_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect();
    if !matched.is_empty() {
        return matched;
    }

    names_from_json(text).unwrap_or_else(|e| {
        warn!(error = %e, "Could not extract parameter names");
        Vec::new()
    })
}
