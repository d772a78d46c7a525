use std::collections::BTreeSet;

use fxhash::FxHashMap;

use varanno_core::models::{AnnotationRecord, VariantKey};

/// In-memory reference index: annotation records keyed by exact [`VariantKey`].
///
/// Records are kept sorted by key, one record per key. An index is built once
/// and then shared read-only behind an `Arc`; a refreshed source produces a
/// new index rather than mutating this one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReferenceIndex {
    records: Vec<AnnotationRecord>,
    lookup: FxHashMap<VariantKey, usize>,
}

impl ReferenceIndex {
    ///
    /// Build an index from parsed records.
    ///
    /// Records sharing a key are merged in input order, later fields
    /// overriding earlier ones. The result is sorted by key, so the same input
    /// always yields the same index.
    ///
    pub fn from_records(records: Vec<AnnotationRecord>) -> Self {
        let mut merged: FxHashMap<VariantKey, AnnotationRecord> = FxHashMap::default();
        for record in records {
            match merged.get_mut(&record.key) {
                Some(existing) => existing.merge(record),
                None => {
                    merged.insert(record.key.clone(), record);
                }
            }
        }

        let mut records: Vec<AnnotationRecord> = merged.into_values().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Self::from_sorted(records)
    }

    /// Build from records that are already sorted and unique, e.g. a decoded artifact.
    pub(crate) fn from_sorted(records: Vec<AnnotationRecord>) -> Self {
        let lookup = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.key.clone(), i))
            .collect();
        ReferenceIndex { records, lookup }
    }

    pub fn get(&self, key: &VariantKey) -> Option<&AnnotationRecord> {
        self.lookup.get(key).map(|&i| &self.records[i])
    }

    pub fn contains(&self, key: &VariantKey) -> bool {
        self.lookup.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnnotationRecord> {
        self.records.iter()
    }

    /// All records, sorted by key.
    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }

    /// Distinct chromosome labels, sorted.
    pub fn chromosomes(&self) -> Vec<&str> {
        self.records
            .iter()
            .map(|r| r.key.chrom())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
