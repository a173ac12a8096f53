//! Confidence scoring from source coverage.
//!
//! Confidence is `coverage / total_sources` and nothing else. Tier lower
//! bounds are inclusive: exactly the threshold is `high`, exactly 0.5 is
//! `medium`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default lower bound of the `high` tier.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Lower bound of the `medium` tier.
pub const MEDIUM_CONFIDENCE_FLOOR: f64 = 0.5;

/// Three-tier confidence label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_confidence(confidence: f64, threshold: f64) -> Self {
        if confidence >= threshold {
            Self::High
        } else if confidence >= MEDIUM_CONFIDENCE_FLOOR {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Score of one key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceScore {
    pub coverage: usize,
    pub total_sources: usize,
    pub confidence: f64,
    pub level: ConfidenceLevel,
}

impl ConfidenceScore {
    /// Human-readable agreement, e.g. `"3/4 models"`.
    pub fn model_agreement(&self) -> String {
        format!("{}/{} models", self.coverage, self.total_sources)
    }
}

/// Score a key seen by `coverage` of `total_sources` sources.
///
/// Callers guarantee `total_sources > 0`; the zero-source case is answered
/// before any key exists.
pub fn score(coverage: usize, total_sources: usize, threshold: f64) -> ConfidenceScore {
    debug_assert!(total_sources > 0, "score called with zero sources");
    debug_assert!(coverage <= total_sources);

    let confidence = coverage as f64 / total_sources as f64;
    ConfidenceScore {
        coverage,
        total_sources,
        confidence,
        level: ConfidenceLevel::from_confidence(confidence, threshold),
    }
}
