//! Consensus Library
//!
//! Reconciles candidate-parameter extractions from several independent LLMs
//! into one deduplicated, confidence-scored list by cross-model voting.
//!
//! # Pipeline
//!
//! ```text
//! ModelOutputs (source -> [RawParameterRecord])
//!   │
//!   ├─ record::normalize      canonical key, field coercion, blank-name skip
//!   ├─ aggregate::aggregate   group by key, count distinct sources per key
//!   ├─ merge::merge           one consolidated record per key
//!   ├─ score::score           coverage / total -> confidence + tier
//!   └─ assemble::assemble     stable sort by confidence, tier summary
//!   ▼
//! ValidationResult
//! ```
//!
//! # Usage
//!
//! ```
//! use consensus::{ConsensusValidator, ModelOutputs, RawParameterRecord};
//!
//! let outputs: ModelOutputs = [
//!     ("model-a", vec![RawParameterRecord::named("tlb_entries")]),
//!     ("model-b", vec![RawParameterRecord::named("TLB_Entries")]),
//! ]
//! .into_iter()
//! .collect();
//!
//! let result = ConsensusValidator::default().validate(&outputs);
//! assert_eq!(result.parameters[0].model_agreement, "2/2 models");
//! ```

pub mod aggregate;
pub mod assemble;
pub mod merge;
pub mod record;
pub mod score;
pub mod validator;

pub use aggregate::{aggregate, Aggregation, KeyGroup, ModelOutputs, SourceAnnotatedRecord};
pub use assemble::{assemble, MergedParameterRecord, ValidationResult, ValidationSummary};
pub use merge::{merge, MergedFields};
pub use record::{
    normalize, CanonicalKey, Constraint, FieldValue, NormalizedRecord, RawParameterRecord,
    SourceId,
};
pub use score::{
    score, ConfidenceLevel, ConfidenceScore, DEFAULT_CONFIDENCE_THRESHOLD,
    MEDIUM_CONFIDENCE_FLOOR,
};
pub use validator::{ConsensusConfig, ConsensusError, ConsensusValidator};
