//! Cross-source aggregation: grouping records by canonical key.
//!
//! Input order matters: merge tie-breaks are "first seen", so both the
//! per-source mapping ([`ModelOutputs`]) and the per-key variant lists keep
//! explicit insertion order instead of relying on hash-map iteration.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::record::{normalize, CanonicalKey, NormalizedRecord, RawParameterRecord, SourceId};

/// Extraction output of every source, in insertion order.
///
/// A source that failed upstream is still a source: insert it with an empty
/// record list so it counts toward the vote total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOutputs {
    sources: Vec<(SourceId, Vec<RawParameterRecord>)>,
}

impl ModelOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a source's records. Replacing keeps the source's
    /// original position.
    pub fn insert(&mut self, source: impl Into<SourceId>, records: Vec<RawParameterRecord>) {
        let source = source.into();
        match self.sources.iter_mut().find(|(id, _)| *id == source) {
            Some((_, existing)) => *existing = records,
            None => self.sources.push((source, records)),
        }
    }

    /// Number of distinct sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, source: &str) -> Option<&[RawParameterRecord]> {
        self.sources
            .iter()
            .find(|(id, _)| id == source)
            .map(|(_, records)| records.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[RawParameterRecord])> {
        self.sources
            .iter()
            .map(|(id, records)| (id.as_str(), records.as_slice()))
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|(id, _)| id.as_str())
    }
}

impl<S: Into<SourceId>> FromIterator<(S, Vec<RawParameterRecord>)> for ModelOutputs {
    fn from_iter<I: IntoIterator<Item = (S, Vec<RawParameterRecord>)>>(iter: I) -> Self {
        let mut outputs = Self::new();
        for (source, records) in iter {
            outputs.insert(source, records);
        }
        outputs
    }
}

impl Serialize for ModelOutputs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.sources.len()))?;
        for (source, records) in &self.sources {
            map.serialize_entry(source, records)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ModelOutputs {
    /// Deserializes a `source -> [record]` mapping in document order.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OutputsVisitor;

        impl<'de> Visitor<'de> for OutputsVisitor {
            type Value = ModelOutputs;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping from source id to a list of parameter records")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut outputs = ModelOutputs::new();
                while let Some((source, records)) =
                    access.next_entry::<String, Option<Vec<RawParameterRecord>>>()?
                {
                    outputs.insert(source, records.unwrap_or_default());
                }
                Ok(outputs)
            }
        }

        deserializer.deserialize_map(OutputsVisitor)
    }
}

/// A normalized record tagged with the source that produced it.
///
/// `sequence` is the record's position in the global scan order and is the
/// tie-break for every "first seen" rule in the merger.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceAnnotatedRecord {
    pub source: SourceId,
    pub sequence: usize,
    pub record: NormalizedRecord,
}

/// All variants of one canonical key across sources.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyGroup {
    pub key: CanonicalKey,
    pub variants: Vec<SourceAnnotatedRecord>,
    sources: BTreeSet<SourceId>,
}

impl KeyGroup {
    fn new(key: CanonicalKey) -> Self {
        Self {
            key,
            variants: Vec::new(),
            sources: BTreeSet::new(),
        }
    }

    fn push(&mut self, variant: SourceAnnotatedRecord) {
        self.sources.insert(variant.source.clone());
        self.variants.push(variant);
    }

    /// Number of distinct sources that produced this key.
    pub fn coverage(&self) -> usize {
        self.sources.len()
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(String::as_str)
    }
}

/// Result of grouping every source's records by canonical key.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    /// Groups in first-seen key order.
    pub groups: Vec<KeyGroup>,
    /// Number of sources supplied, including those with no records.
    pub total_sources: usize,
    /// Records dropped for having a blank name.
    pub skipped: usize,
}

/// Group all records by canonical key, counting distinct sources per key.
///
/// A source that repeats a name contributes one vote for it, not two.
pub fn aggregate(outputs: &ModelOutputs) -> Aggregation {
    let mut groups: Vec<KeyGroup> = Vec::new();
    let mut index: HashMap<CanonicalKey, usize> = HashMap::new();
    let mut sequence = 0usize;
    let mut skipped = 0usize;

    for (source, records) in outputs.iter() {
        for raw in records {
            let Some(record) = normalize(raw) else {
                skipped += 1;
                continue;
            };

            let slot = *index.entry(record.key.clone()).or_insert_with(|| {
                groups.push(KeyGroup::new(record.key.clone()));
                groups.len() - 1
            });

            groups[slot].push(SourceAnnotatedRecord {
                source: source.to_string(),
                sequence,
                record,
            });
            sequence += 1;
        }
    }

    debug!(
        sources = outputs.len(),
        keys = groups.len(),
        records = sequence,
        skipped,
        "Aggregated extraction outputs"
    );

    Aggregation {
        groups,
        total_sources: outputs.len(),
        skipped,
    }
}
