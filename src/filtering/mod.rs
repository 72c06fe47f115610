use crate::matches::CigarOp;

pub(crate) mod decode;
pub(crate) mod verify;

pub(crate) use decode::{collect_profile_jobs, DecodeJob};
pub(crate) use verify::VerifyJob;

/// A decoded candidate begin-position on the text, tagged with its
/// originating region and the error count of the path that produced it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FilteringPosition {
    pub text_begin: usize,
    pub region_index: usize,
    pub source_distance: usize,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AlignmentStatus {
    Pending,
    Accepted,
    Discarded,
}

/// A compacted candidate group awaiting verification: the covered text
/// span plus the minimum source distance of the merged positions.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FilteringRegion {
    pub text_begin: usize,
    pub text_end: usize,
    pub source_distance: usize,
    pub status: AlignmentStatus,
    pub distance: Option<usize>,
    pub cigar: Vec<CigarOp>,
}

/// Candidate-level failure counters; these never propagate as errors,
/// they are swallowed here and surfaced for diagnostics.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct FilteringCounters {
    pub clipped_slices: u64,
    pub discarded: u64,
    pub duplicates: u64,
}

/// The staging area between candidate generation and match production:
/// decoded positions, in-flight candidate regions, failure counters.
/// Owned by one approximate search; cleared (capacity kept) between
/// reads.
#[derive(Debug, Default)]
pub struct FilteringCandidates {
    positions: Vec<FilteringPosition>,
    regions: Vec<FilteringRegion>,
    counters: FilteringCounters,
}

impl FilteringCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.regions.clear();
        self.counters = FilteringCounters::default();
    }

    pub fn num_positions(&self) -> usize {
        self.positions.len()
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn regions(&self) -> &[FilteringRegion] {
        &self.regions
    }

    pub fn counters(&self) -> FilteringCounters {
        self.counters
    }

    pub(crate) fn add_position(
        &mut self,
        text_begin: usize,
        region_index: usize,
        source_distance: usize,
    ) {
        self.positions.push(FilteringPosition {
            text_begin,
            region_index,
            source_distance,
        });
    }

    /// Sort decoded positions and merge runs within `max_error` of each
    /// other into single candidate groups, keeping the minimum tagged
    /// distance. Verification windows widen with the group span, so the
    /// merge never loses an occurrence.
    pub(crate) fn compact_positions(
        &mut self,
        max_error: usize,
        key_length: usize,
    ) {
        if self.positions.is_empty() {
            return;
        }
        self.positions.sort_unstable_by_key(|p| p.text_begin);
        let mut positions = std::mem::take(&mut self.positions);
        let mut open: Option<FilteringRegion> = None;
        for position in positions.drain(..) {
            match open.as_mut() {
                Some(region)
                    if position.text_begin
                        <= (region.text_end - key_length) + max_error =>
                {
                    region.text_end = position.text_begin + key_length;
                    region.source_distance =
                        region.source_distance.min(position.source_distance);
                }
                _ => {
                    if let Some(done) = open.take() {
                        self.regions.push(done);
                    }
                    open = Some(FilteringRegion {
                        text_begin: position.text_begin,
                        text_end: position.text_begin + key_length,
                        source_distance: position.source_distance,
                        status: AlignmentStatus::Pending,
                        distance: None,
                        cigar: Vec::new(),
                    });
                }
            }
        }
        if let Some(done) = open.take() {
            self.regions.push(done);
        }
        self.positions = positions;
    }
}
