//! Consensus validator: the full aggregate → merge → score → assemble
//! pipeline behind one call.
//!
//! The validator is pure: no I/O, no state carried between calls. A source
//! that failed upstream must be passed in with an empty record list; it
//! then simply lends no votes.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::{aggregate, ModelOutputs};
use crate::assemble::{assemble, MergedParameterRecord, ValidationResult};
use crate::merge::merge;
use crate::score::{score, DEFAULT_CONFIDENCE_THRESHOLD};

/// Error type for consensus configuration
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("Confidence threshold must be within [0, 1], got {0}")]
    InvalidThreshold(f64),
}

/// Tunables for the consensus validator.
///
/// Deserialization goes through [`ConsensusConfig::with_threshold`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedConfig")]
pub struct ConsensusConfig {
    /// Minimum confidence for the `high` tier.
    pub confidence_threshold: f64,
}

impl ConsensusConfig {
    pub fn with_threshold(confidence_threshold: f64) -> Result<Self, ConsensusError> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(ConsensusError::InvalidThreshold(confidence_threshold));
        }
        Ok(Self {
            confidence_threshold,
        })
    }
}

#[derive(Deserialize)]
struct UncheckedConfig {
    confidence_threshold: f64,
}

impl TryFrom<UncheckedConfig> for ConsensusConfig {
    type Error = ConsensusError;

    fn try_from(raw: UncheckedConfig) -> Result<Self, Self::Error> {
        Self::with_threshold(raw.confidence_threshold)
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Cross-model consensus validator.
#[derive(Debug, Clone, Default)]
pub struct ConsensusValidator {
    config: ConsensusConfig,
}

impl ConsensusValidator {
    pub fn new(config: ConsensusConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Vote on every key produced by any source.
    pub fn validate(&self, outputs: &ModelOutputs) -> ValidationResult {
        if outputs.is_empty() {
            return ValidationResult::empty();
        }

        let aggregation = aggregate(outputs);
        let total = aggregation.total_sources;

        let records: Vec<MergedParameterRecord> = aggregation
            .groups
            .iter()
            .map(|group| {
                let fields = merge(&group.key, &group.variants);
                let score = score(group.coverage(), total, self.config.confidence_threshold);
                MergedParameterRecord::new(fields, score)
            })
            .collect();

        let result = assemble(records);
        debug!(
            total_sources = total,
            parameters = result.validation_summary.total_parameters,
            high = result.validation_summary.high_confidence,
            medium = result.validation_summary.medium_confidence,
            low = result.validation_summary.low_confidence,
            "Consensus validation complete"
        );
        result
    }
}
