//! Version merging: collapsing per-source variants of one key.
//!
//! Field policies:
//! - `description`: longest (in characters), first seen wins ties
//! - `type`: most frequent, first seen wins ties
//! - `constraints`: longest rendered form (`rendered_len`), first seen wins ties
//! - `keywords`: set union

use std::collections::BTreeSet;

use crate::aggregate::SourceAnnotatedRecord;
use crate::record::{CanonicalKey, Constraint};

/// Consolidated fields of one key, before confidence scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedFields {
    pub name: CanonicalKey,
    pub description: Option<String>,
    pub param_type: Option<String>,
    pub constraints: Option<Constraint>,
    pub keywords: BTreeSet<String>,
}

/// Merge every variant of `key` into one set of fields.
///
/// Variants are read in slice order, which must be the aggregation scan
/// order for the "first seen" tie-breaks to hold.
pub fn merge(key: &CanonicalKey, variants: &[SourceAnnotatedRecord]) -> MergedFields {
    let description = longest_by(
        variants
            .iter()
            .filter_map(|v| v.record.description.as_deref()),
        |d| d.chars().count(),
    )
    .map(str::to_string);

    let param_type = most_frequent(
        variants
            .iter()
            .filter_map(|v| v.record.param_type.as_deref()),
    );

    let constraints = longest_by(
        variants.iter().filter_map(|v| v.record.constraints.as_ref()),
        |c| c.rendered_len(),
    )
    .cloned();

    let keywords = variants
        .iter()
        .flat_map(|v| v.record.keywords.iter().cloned())
        .collect();

    MergedFields {
        name: key.clone(),
        description,
        param_type,
        constraints,
        keywords,
    }
}

/// First element with the strictly greatest length.
fn longest_by<T, I, F>(items: I, len: F) -> Option<T>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> usize,
{
    let mut best: Option<(T, usize)> = None;
    for item in items {
        let item_len = len(&item);
        if best.as_ref().map_or(true, |(_, best_len)| item_len > *best_len) {
            best = Some((item, item_len));
        }
    }
    best.map(|(item, _)| item)
}

/// Mode of the values; among equal counts the first seen wins.
fn most_frequent<'a, I>(values: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: Vec<(&'a str, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value.to_string())
}
