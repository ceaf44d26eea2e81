use std::collections::BTreeMap;
use std::ops::Bound;

use cachecore_primitives::RecordId;
use cachecore_schema::KeyValue;
use indexmap::IndexSet;

/// A scalar (non-list) index: every declared index key gets one of these.
///
/// Backed by a `BTreeMap` regardless of whether the key is declared
/// `ordered` — that flag only gates which predicates the query evaluator
/// considers legal against it (range predicates need `ordered`), not how the
/// index itself is stored. This mirrors the teacher's `BTreeIndex`, which
/// serves both equality and range seeks off the same `BTreeSet`.
///
/// Buckets are `IndexSet`s so enumeration order within a bucket is insertion
/// order (stable) and removing one member doesn't reorder the others, unlike
/// a swap-remove `Vec`.
#[derive(Debug, Default, Clone)]
pub struct ScalarIndex {
    map: BTreeMap<KeyValue, IndexSet<RecordId>>,
}

impl ScalarIndex {
    pub fn insert(&mut self, value: KeyValue, id: RecordId) {
        self.map.entry(value).or_default().insert(id);
    }

    pub fn remove(&mut self, value: &KeyValue, id: RecordId) {
        if let Some(bucket) = self.map.get_mut(value) {
            bucket.shift_remove(&id);
            if bucket.is_empty() {
                self.map.remove(value);
            }
        }
    }

    /// Number of records currently filed under `value`. Used by the query
    /// evaluator to pick the cheapest driving predicate when more than one
    /// equality-indexable field is available.
    pub fn bucket_len(&self, value: &KeyValue) -> usize {
        self.map.get(value).map_or(0, |b| b.len())
    }

    pub fn seek_eq(&self, value: &KeyValue) -> impl Iterator<Item = RecordId> + '_ {
        self.map.get(value).into_iter().flatten().copied()
    }

    pub fn seek_range(
        &self,
        lower: Bound<KeyValue>,
        upper: Bound<KeyValue>,
    ) -> impl Iterator<Item = RecordId> + '_ {
        self.map.range((lower, upper)).flat_map(|(_, bucket)| bucket.iter().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A list-index: each element of a record's list-valued field maps back to
/// the owning record, supporting `contains`.
#[derive(Debug, Default, Clone)]
pub struct ListIndex {
    map: BTreeMap<KeyValue, IndexSet<RecordId>>,
}

impl ListIndex {
    pub fn insert(&mut self, value: KeyValue, id: RecordId) {
        self.map.entry(value).or_default().insert(id);
    }

    pub fn remove(&mut self, value: &KeyValue, id: RecordId) {
        if let Some(bucket) = self.map.get_mut(value) {
            bucket.shift_remove(&id);
            if bucket.is_empty() {
                self.map.remove(value);
            }
        }
    }

    pub fn bucket_len(&self, value: &KeyValue) -> usize {
        self.map.get(value).map_or(0, |b| b.len())
    }

    pub fn seek_contains_any(&self, values: &[KeyValue]) -> impl Iterator<Item = RecordId> + '_ {
        let mut seen = IndexSet::new();
        for value in values {
            if let Some(bucket) = self.map.get(value) {
                seen.extend(bucket.iter().copied());
            }
        }
        seen.into_iter()
    }
}
