//! Consensus property tests: randomized validation of voting invariants
//! across varied inputs.
//!
//! Tests verify:
//! - Repeated validation of the same input is identical
//! - Confidence equals distinct-source coverage over total sources
//! - Tier counts always partition the total
//! - Blank names never influence any key
//! - Output is sorted by confidence, descending

use std::collections::{BTreeSet, HashMap};

use consensus::{
    CanonicalKey, ConfidenceLevel, ConsensusValidator, FieldValue, ModelOutputs,
    RawParameterRecord,
};

const NAMES: &[&str] = &[
    "cache_line_size",
    "Cache_Line_Size",
    "tlb_entries",
    "page_size",
    " PAGE_SIZE",
    "vlen",
    "",
    "   ",
    "hpm_counter_count",
    "misaligned_access",
];

const TYPES: &[&str] = &["optional", "configurable", "implementation-defined"];

/// Small deterministic generator so every run sees the same inputs.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

fn random_record(rng: &mut XorShift) -> RawParameterRecord {
    let mut record = RawParameterRecord::named(NAMES[rng.below(NAMES.len())]);
    if rng.below(2) == 0 {
        record = record.with_description("d".repeat(rng.below(12)));
    }
    if rng.below(2) == 0 {
        record = record.with_type(TYPES[rng.below(TYPES.len())]);
    }
    record.constraints = match rng.below(4) {
        0 => None,
        1 => Some(FieldValue::Integer(rng.below(128) as i64)),
        2 => Some(FieldValue::from("power of two")),
        _ => Some(FieldValue::from(vec!["32", "64"])),
    };
    if rng.below(2) == 0 {
        record = record.with_keywords(vec!["may", "should"]);
    } else {
        record = record.with_keywords("optional");
    }
    record
}

fn random_outputs(seed: u64) -> ModelOutputs {
    let mut rng = XorShift(seed);
    let sources = 1 + rng.below(6);
    (0..sources)
        .map(|i| {
            let count = rng.below(7);
            let records: Vec<RawParameterRecord> =
                (0..count).map(|_| random_record(&mut rng)).collect();
            (format!("model-{i}"), records)
        })
        .collect()
}

/// Independent reference count: distinct sources per canonical key.
fn reference_coverage(outputs: &ModelOutputs) -> HashMap<String, usize> {
    let mut seen: HashMap<String, BTreeSet<String>> = HashMap::new();
    for (source, records) in outputs.iter() {
        for record in records {
            let Some(FieldValue::Text(name)) = &record.name else {
                continue;
            };
            if let Some(key) = CanonicalKey::from_name(name) {
                seen.entry(key.into_string())
                    .or_default()
                    .insert(source.to_string());
            }
        }
    }
    seen.into_iter().map(|(k, s)| (k, s.len())).collect()
}

#[test]
fn validation_is_deterministic() {
    let validator = ConsensusValidator::default();
    for seed in 1..200u64 {
        let outputs = random_outputs(seed);
        let first = validator.validate(&outputs);
        let second = validator.validate(&outputs);
        assert_eq!(first, second, "seed {seed}");
    }
}

#[test]
fn confidence_matches_distinct_source_coverage() {
    let validator = ConsensusValidator::default();
    for seed in 1..200u64 {
        let outputs = random_outputs(seed);
        let total = outputs.len();
        let expected = reference_coverage(&outputs);
        let result = validator.validate(&outputs);

        assert_eq!(result.parameters.len(), expected.len(), "seed {seed}");
        for param in &result.parameters {
            let coverage = expected[&param.name];
            assert!((0.0..=1.0).contains(&param.confidence));
            assert_eq!(param.confidence, coverage as f64 / total as f64, "seed {seed}");
            assert_eq!(param.model_agreement, format!("{coverage}/{total} models"));
        }
    }
}

#[test]
fn summary_partitions_total() {
    let validator = ConsensusValidator::default();
    for seed in 1..200u64 {
        let result = validator.validate(&random_outputs(seed));
        let s = result.validation_summary;
        assert_eq!(
            s.high_confidence + s.medium_confidence + s.low_confidence,
            s.total_parameters
        );
        assert_eq!(s.total_parameters, result.parameters.len());

        let high = result
            .parameters
            .iter()
            .filter(|p| p.confidence_level == ConfidenceLevel::High)
            .count();
        assert_eq!(high, s.high_confidence);
    }
}

#[test]
fn blank_names_have_no_effect() {
    let validator = ConsensusValidator::default();
    for seed in 1..100u64 {
        let outputs = random_outputs(seed);
        let baseline = validator.validate(&outputs);

        let padded: ModelOutputs = outputs
            .iter()
            .map(|(source, records)| {
                let mut records = records.to_vec();
                records.push(RawParameterRecord::named(" \t "));
                records.insert(0, RawParameterRecord::named(""));
                (source.to_string(), records)
            })
            .collect();
        let result = validator.validate(&padded);

        let strip = |r: &consensus::ValidationResult| {
            r.parameters
                .iter()
                .map(|p| (p.name.clone(), p.confidence))
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(&baseline), strip(&result), "seed {seed}");
        assert!(result.parameters.iter().all(|p| !p.name.trim().is_empty()));
    }
}

#[test]
fn output_is_sorted_by_confidence() {
    let validator = ConsensusValidator::default();
    for seed in 1..200u64 {
        let result = validator.validate(&random_outputs(seed));
        for pair in result.parameters.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence, "seed {seed}");
        }
    }
}
