//! Result assembly: ordering, summary statistics, and the public result
//! types whose field names renderers depend on.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::merge::MergedFields;
use crate::record::Constraint;
use crate::score::{ConfidenceLevel, ConfidenceScore};

/// One voted-on parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedParameterRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub param_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraint>,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub model_agreement: String,
}

impl MergedParameterRecord {
    pub fn new(fields: MergedFields, score: ConfidenceScore) -> Self {
        Self {
            name: fields.name.into_string(),
            description: fields.description,
            param_type: fields.param_type,
            constraints: fields.constraints,
            keywords: fields.keywords,
            confidence: score.confidence,
            confidence_level: score.level,
            model_agreement: score.model_agreement(),
        }
    }
}

/// Tier counts over a merged set. `high + medium + low == total` always.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total_parameters: usize,
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
}

impl ValidationSummary {
    pub fn from_records(records: &[MergedParameterRecord]) -> Self {
        records
            .iter()
            .fold(Self::default(), |mut summary, record| {
                summary.total_parameters += 1;
                match record.confidence_level {
                    ConfidenceLevel::High => summary.high_confidence += 1,
                    ConfidenceLevel::Medium => summary.medium_confidence += 1,
                    ConfidenceLevel::Low => summary.low_confidence += 1,
                }
                summary
            })
    }
}

/// Output of one consensus run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub parameters: Vec<MergedParameterRecord>,
    pub validation_summary: ValidationSummary,
}

impl ValidationResult {
    /// The zero-source result: no parameters, all counts zero.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parameters at or above the given confidence score.
    pub fn at_least(&self, min_confidence: f64) -> impl Iterator<Item = &MergedParameterRecord> {
        self.parameters
            .iter()
            .filter(move |p| p.confidence >= min_confidence)
    }
}

/// Order records by confidence (highest first) and summarize.
///
/// The sort is stable: equal confidences keep their incoming order.
pub fn assemble(mut records: Vec<MergedParameterRecord>) -> ValidationResult {
    records.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let validation_summary = ValidationSummary::from_records(&records);
    ValidationResult {
        parameters: records,
        validation_summary,
    }
}
