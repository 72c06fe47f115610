use rustc_hash::FxHashMap;

use crate::archive::SaInterval;

/// An SA interval annotated with the error count of the search path
/// that produced it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct IntervalEntry {
    pub(crate) interval: SaInterval,
    pub(crate) distance: usize,
}

/// Union of the SA intervals produced so far. Re-adding an interval
/// keeps the minimum distance seen for it; empty intervals are dropped.
#[derive(Debug, Default)]
pub(crate) struct IntervalSet {
    entries: Vec<IntervalEntry>,
    index: FxHashMap<(usize, usize), usize>,
}

impl IntervalSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub(crate) fn add(&mut self, interval: SaInterval, distance: usize) {
        if interval.is_empty() {
            return;
        }
        match self.index.get(&(interval.lo, interval.hi)) {
            Some(&at) => {
                let entry = &mut self.entries[at];
                entry.distance = entry.distance.min(distance);
            }
            None => {
                self.index
                    .insert((interval.lo, interval.hi), self.entries.len());
                self.entries.push(IntervalEntry { interval, distance });
            }
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &IntervalEntry> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of SA positions covered, counting overlaps once per
    /// entry (entries are deduplicated, not coalesced).
    pub(crate) fn total_positions(&self) -> usize {
        self.entries.iter().map(|e| e.interval.len()).sum()
    }
}
