//! Record normalization: canonical keys and loosely-typed field coercion.
//!
//! Upstream parsing of model output is unreliable: a `constraints` field may
//! arrive as text, as a list, or as a bare number, and `keywords` may be a
//! single string instead of a list. Every field is captured at ingestion as a
//! [`FieldValue`] and canonicalized exactly once by [`normalize`], so nothing
//! downstream has to branch on the shape of the input.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of the model (source) that produced a record.
pub type SourceId = String;

/// A loosely-typed field value as produced by YAML/JSON parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Sequence(Vec<FieldValue>),
    Mapping(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Textual representation of the value.
    ///
    /// Scalars use their display form; sequences and mappings are rendered as
    /// compact JSON. `Null` has no textual form.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(b) => Some(b.to_string()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Text(s) => Some(s.clone()),
            Self::Sequence(_) | Self::Mapping(_) => serde_json::to_string(self).ok(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(values: Vec<T>) -> Self {
        Self::Sequence(values.into_iter().map(Into::into).collect())
    }
}

/// One candidate parameter exactly as a model reported it.
///
/// Only `name` matters for voting; every other field is optional and may
/// carry any shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawParameterRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<FieldValue>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub param_type: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<FieldValue>,
}

impl RawParameterRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(FieldValue::Text(name.into())),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(FieldValue::Text(description.into()));
        self
    }

    pub fn with_type(mut self, param_type: impl Into<String>) -> Self {
        self.param_type = Some(FieldValue::Text(param_type.into()));
        self
    }

    pub fn with_constraints(mut self, constraints: impl Into<FieldValue>) -> Self {
        self.constraints = Some(constraints.into());
        self
    }

    pub fn with_keywords(mut self, keywords: impl Into<FieldValue>) -> Self {
        self.keywords = Some(keywords.into());
        self
    }
}

/// Join key across sources: the parameter name trimmed and lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    /// Canonicalize a name. Blank names have no key.
    pub fn from_name(name: &str) -> Option<Self> {
        let key = name.trim().to_lowercase();
        if key.is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A constraint after coercion: either free text or a list of clauses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Constraint {
    Text(String),
    List(Vec<String>),
}

impl Constraint {
    /// Coerce a raw field. Null, blank text and empty lists are absent.
    pub fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Null => None,
            FieldValue::Text(text) => non_blank(text).map(Self::Text),
            FieldValue::Sequence(items) => {
                let items: Vec<String> = items
                    .iter()
                    .filter_map(FieldValue::to_text)
                    .filter_map(|s| non_blank(&s))
                    .collect();
                if items.is_empty() {
                    None
                } else {
                    Some(Self::List(items))
                }
            }
            other => other.to_text().and_then(|s| non_blank(&s)).map(Self::Text),
        }
    }

    /// Length used to pick the most detailed constraint.
    ///
    /// Text is measured in characters. A list is measured as it is rendered
    /// for display: `['32', '64']`, items quoted and separated by `", "`.
    pub fn rendered_len(&self) -> usize {
        match self {
            Self::Text(text) => text.chars().count(),
            Self::List(items) => {
                let separators = 2 * items.len().saturating_sub(1);
                2 + separators + items.iter().map(|i| quoted_len(i)).sum::<usize>()
            }
        }
    }
}

/// Characters in a single-quoted rendering of `item`, escapes included.
/// Double quotes are used instead when the item holds only `'`.
fn quoted_len(item: &str) -> usize {
    let escape_single = item.contains('\'') && item.contains('"');
    2 + item
        .chars()
        .map(|c| match c {
            '\\' | '\n' | '\r' | '\t' => 2,
            '\'' if escape_single => 2,
            _ => 1,
        })
        .sum::<usize>()
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::List(items) => f.write_str(&items.join("; ")),
        }
    }
}

/// A record whose fields have all been canonicalized.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub key: CanonicalKey,
    pub description: Option<String>,
    pub param_type: Option<String>,
    pub constraints: Option<Constraint>,
    pub keywords: Vec<String>,
}

/// Canonicalize one raw record.
///
/// Returns `None` when the name is missing or blank; such records are
/// filtered out of voting entirely. Never fails on odd field shapes.
pub fn normalize(raw: &RawParameterRecord) -> Option<NormalizedRecord> {
    let name = raw.name.as_ref()?.to_text()?;
    let key = CanonicalKey::from_name(&name)?;

    Some(NormalizedRecord {
        key,
        description: text_field(raw.description.as_ref()),
        param_type: text_field(raw.param_type.as_ref()),
        constraints: raw.constraints.as_ref().and_then(Constraint::from_field),
        keywords: keyword_list(raw.keywords.as_ref()),
    })
}

fn non_blank(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn text_field(value: Option<&FieldValue>) -> Option<String> {
    value?.to_text().and_then(|s| non_blank(&s))
}

fn keyword_list(value: Option<&FieldValue>) -> Vec<String> {
    match value {
        None | Some(FieldValue::Null) => Vec::new(),
        Some(FieldValue::Sequence(items)) => items
            .iter()
            .filter_map(FieldValue::to_text)
            .filter_map(|s| non_blank(&s))
            .collect(),
        Some(other) => other
            .to_text()
            .and_then(|s| non_blank(&s))
            .into_iter()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key_trims_and_lowercases() {
        let key = CanonicalKey::from_name("  Cache_Block_Size \n").unwrap();
        assert_eq!(key.as_str(), "cache_block_size");
    }

    #[test]
    fn test_blank_names_are_skipped() {
        assert!(normalize(&RawParameterRecord::named("")).is_none());
        assert!(normalize(&RawParameterRecord::named("   ")).is_none());
        assert!(normalize(&RawParameterRecord::default()).is_none());

        let null_name = RawParameterRecord {
            name: Some(FieldValue::Null),
            ..Default::default()
        };
        assert!(normalize(&null_name).is_none());
    }

    #[test]
    fn test_numeric_name_is_coerced() {
        let raw = RawParameterRecord {
            name: Some(FieldValue::Integer(42)),
            ..Default::default()
        };
        assert_eq!(normalize(&raw).unwrap().key.as_str(), "42");
    }

    #[test]
    fn test_scalar_constraint_becomes_text() {
        let raw = RawParameterRecord::named("xlen").with_constraints(64i64);
        let record = normalize(&raw).unwrap();
        assert_eq!(record.constraints, Some(Constraint::Text("64".into())));

        let raw = RawParameterRecord::named("ratio").with_constraints(0.5);
        let record = normalize(&raw).unwrap();
        assert_eq!(record.constraints, Some(Constraint::Text("0.5".into())));
    }

    #[test]
    fn test_list_constraint_is_kept_as_list() {
        let raw = RawParameterRecord::named("xlen").with_constraints(vec!["32", "64"]);
        let record = normalize(&raw).unwrap();
        assert_eq!(
            record.constraints,
            Some(Constraint::List(vec!["32".into(), "64".into()]))
        );
        // ['32', '64']
        assert_eq!(record.constraints.unwrap().rendered_len(), 12);
    }

    #[test]
    fn test_falsy_scalar_constraints_are_kept() {
        let zero = normalize(&RawParameterRecord::named("x").with_constraints(0i64)).unwrap();
        assert_eq!(zero.constraints, Some(Constraint::Text("0".into())));
        let no = normalize(&RawParameterRecord::named("x").with_constraints(false)).unwrap();
        assert_eq!(no.constraints, Some(Constraint::Text("false".into())));
    }

    #[test]
    fn test_rendered_len_counts_quotes_and_escapes() {
        let single = Constraint::List(vec!["pow2".into()]);
        assert_eq!(single.rendered_len(), "['pow2']".len());
        let apostrophe = Constraint::List(vec!["it's".into()]);
        assert_eq!(apostrophe.rendered_len(), "[\"it's\"]".len());
        let both = Constraint::List(vec!["it's \"x\"".into()]);
        assert_eq!(both.rendered_len(), r#"['it\'s "x"']"#.len());
        assert_eq!(Constraint::Text("abc".into()).rendered_len(), 3);
    }

    #[test]
    fn test_empty_constraints_are_absent() {
        let raw = RawParameterRecord::named("a").with_constraints("  ");
        assert_eq!(normalize(&raw).unwrap().constraints, None);

        let raw = RawParameterRecord::named("a").with_constraints(Vec::<String>::new());
        assert_eq!(normalize(&raw).unwrap().constraints, None);
    }

    #[test]
    fn test_single_keyword_becomes_list() {
        let raw = RawParameterRecord::named("a").with_keywords("may");
        assert_eq!(normalize(&raw).unwrap().keywords, vec!["may".to_string()]);
    }

    #[test]
    fn test_mixed_keyword_sequence() {
        let raw = RawParameterRecord::named("a").with_keywords(FieldValue::Sequence(vec![
            FieldValue::from("should"),
            FieldValue::Integer(2),
            FieldValue::Null,
            FieldValue::from(" "),
        ]));
        assert_eq!(
            normalize(&raw).unwrap().keywords,
            vec!["should".to_string(), "2".to_string()]
        );
    }

    #[test]
    fn test_deserialize_loose_yaml_record() {
        let yaml = r#"
name: Cache_Line_Size
description: Size of a cache line
type: implementation-defined
constraints: 64
keywords: may
"#;
        let raw: RawParameterRecord = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(raw.constraints, Some(FieldValue::Integer(64)));

        let record = normalize(&raw).unwrap();
        assert_eq!(record.key.as_str(), "cache_line_size");
        assert_eq!(record.param_type.as_deref(), Some("implementation-defined"));
        assert_eq!(record.constraints, Some(Constraint::Text("64".into())));
        assert_eq!(record.keywords, vec!["may".to_string()]);
    }

    #[test]
    fn test_constraint_display() {
        let list = Constraint::List(vec!["power of two".into(), "32-128 bytes".into()]);
        assert_eq!(list.to_string(), "power of two; 32-128 bytes");
    }
}
