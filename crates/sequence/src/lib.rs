//! Named, monotonically increasing id sequences, each handing out
//! contiguous ranges of ids under its own lock.
//!
//! Modeled on the per-sequence locking of the table layer's own sequence
//! state (`locking_tx_datastore::sequence`), simplified: there is no min/max
//! wraparound or pre-allocation buffer here, just a running counter per name.

use std::collections::HashMap;
use std::ops::Range;

use cachecore_primitives::SequenceName;
use parking_lot::{Mutex, RwLock};

#[derive(Default)]
pub struct SequenceGenerator {
    sequences: RwLock<HashMap<SequenceName, Mutex<i64>>>,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `count` contiguous ids from the named sequence, creating it
    /// (starting at 0) if this is the first request for that name, and
    /// returns the reserved range.
    pub fn generate_unique_ids(&self, name: impl Into<SequenceName>, count: u64) -> Range<i64> {
        let name = name.into();
        if let Some(range) = self.try_reserve(&name, count) {
            return range;
        }
        self.sequences.write().entry(name.clone()).or_insert_with(|| Mutex::new(0));
        self.try_reserve(&name, count).expect("sequence was just inserted")
    }

    fn try_reserve(&self, name: &SequenceName, count: u64) -> Option<Range<i64>> {
        let sequences = self.sequences.read();
        let slot = sequences.get(name)?;
        let mut value = slot.lock();
        let start = *value;
        *value += count as i64;
        Some(start..*value)
    }

    pub fn current_value(&self, name: &SequenceName) -> i64 {
        self.sequences
            .read()
            .get(name)
            .map(|slot| *slot.lock())
            .unwrap_or(0)
    }

    /// Overwrites a sequence's current value, used when replaying a
    /// `SequenceReserve` log record or restoring from a dump.
    pub fn restore(&self, name: impl Into<SequenceName>, value: i64) {
        let name = name.into();
        {
            let sequences = self.sequences.read();
            if let Some(slot) = sequences.get(&name) {
                *slot.lock() = value;
                return;
            }
        }
        self.sequences.write().insert(name, Mutex::new(value));
    }

    pub fn known_sequences(&self) -> Vec<SequenceName> {
        self.sequences.read().keys().cloned().collect()
    }
}
