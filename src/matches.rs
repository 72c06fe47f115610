use std::fmt::Write as _;

use rustc_hash::FxHashSet;

use crate::archive::SaInterval;
use crate::util::Strand;

/// One CIGAR run. Soft-clips only appear on local alignments.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CigarOp {
    Eq(u32),
    Mismatch(u32),
    Ins(u32),
    Del(u32),
    SoftClip(u32),
}

impl CigarOp {
    #[inline]
    pub fn len(&self) -> u32 {
        match self {
            Self::Eq(n)
            | Self::Mismatch(n)
            | Self::Ins(n)
            | Self::Del(n)
            | Self::SoftClip(n) => *n,
        }
    }

    #[inline]
    pub fn code(&self) -> char {
        match self {
            Self::Eq(_) => '=',
            Self::Mismatch(_) => 'X',
            Self::Ins(_) => 'I',
            Self::Del(_) => 'D',
            Self::SoftClip(_) => 'S',
        }
    }

    /// Reference bases this run consumes.
    #[inline]
    pub fn reference_len(&self) -> usize {
        match self {
            Self::Eq(n) | Self::Mismatch(n) | Self::Del(n) => *n as usize,
            Self::Ins(_) | Self::SoftClip(_) => 0,
        }
    }

    /// Read bases this run consumes.
    #[inline]
    pub fn read_len(&self) -> usize {
        match self {
            Self::Eq(n)
            | Self::Mismatch(n)
            | Self::Ins(n)
            | Self::SoftClip(n) => *n as usize,
            Self::Del(_) => 0,
        }
    }
}

pub fn cigar_string(ops: &[CigarOp]) -> String {
    let mut out = String::with_capacity(ops.len() * 3);
    for op in ops {
        write!(&mut out, "{}{}", op.len(), op.code())
            .expect("writing to a String cannot fail");
    }
    out
}

/// A fully decoded match: a text position with its alignment trace.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MatchTrace {
    pub text_position: usize,
    pub strand: Strand,
    pub distance: usize,
    pub score: i64,
    cigar_offset: usize,
    cigar_len: usize,
}

/// A compact representation of a whole SA interval of matches sharing
/// one distance, expanded lazily during selection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MatchInterval {
    pub interval: SaInterval,
    pub distance: usize,
    pub strand: Strand,
    pub key_length: usize,
}

/// A selected match resolved to its sequence of origin, ready for the
/// output layer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MappedMatch {
    pub sequence_name: String,
    pub position: usize,
    pub strand: Strand,
    pub distance: usize,
    pub cigar: Vec<CigarOp>,
    pub score: i64,
}

/// Mapping-quality inputs: the best and second-best edit distance seen.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct MatchMetrics {
    pub min_distance: Option<usize>,
    pub subdominant_distance: Option<usize>,
}

impl MatchMetrics {
    fn observe(&mut self, distance: usize) {
        match self.min_distance {
            None => self.min_distance = Some(distance),
            Some(best) if distance < best => {
                self.subdominant_distance = Some(best);
                self.min_distance = Some(distance);
            }
            Some(_) => match self.subdominant_distance {
                None => self.subdominant_distance = Some(distance),
                Some(second) if distance < second => {
                    self.subdominant_distance = Some(distance)
                }
                Some(_) => {}
            },
        }
    }
}

type DedupKey = (usize, Strand, Vec<CigarOp>);

/// Accumulator for one read's matches across both strands: per-stratum
/// counters, position matches, interval matches, and one shared CIGAR
/// buffer. Cleared (capacity kept) between reads.
///
/// Invariant: `counters[d]` equals the number of matches (position and
/// interval alike) whose edit distance is exactly `d`.
pub struct Matches {
    counters: Vec<u64>,
    traces: Vec<MatchTrace>,
    interval_matches: Vec<MatchInterval>,
    cigar_ops: Vec<CigarOp>,
    metrics: MatchMetrics,
    max_complete_stratum: usize,
    seen: FxHashSet<DedupKey>,
}

impl Default for Matches {
    fn default() -> Self {
        Self::new()
    }
}

impl Matches {
    pub fn new() -> Self {
        Self {
            counters: Vec::new(),
            traces: Vec::new(),
            interval_matches: Vec::new(),
            cigar_ops: Vec::new(),
            metrics: MatchMetrics::default(),
            max_complete_stratum: usize::MAX,
            seen: FxHashSet::default(),
        }
    }

    pub fn clear(&mut self) {
        self.counters.clear();
        self.traces.clear();
        self.interval_matches.clear();
        self.cigar_ops.clear();
        self.metrics = MatchMetrics::default();
        self.max_complete_stratum = usize::MAX;
        self.seen.clear();
    }

    fn bump_counter(&mut self, distance: usize, by: u64) {
        if self.counters.len() <= distance {
            self.counters.resize(distance + 1, 0);
        }
        self.counters[distance] += by;
    }

    /// Add a verified position match; duplicates (same position, strand
    /// and trace) are silently dropped. Returns whether the match was
    /// kept.
    pub fn add_match_trace(
        &mut self,
        text_position: usize,
        strand: Strand,
        distance: usize,
        ops: &[CigarOp],
        score: i64,
    ) -> bool {
        let key = (text_position, strand, ops.to_vec());
        if !self.seen.insert(key) {
            return false;
        }
        let cigar_offset = self.cigar_ops.len();
        self.cigar_ops.extend_from_slice(ops);
        self.traces.push(MatchTrace {
            text_position,
            strand,
            distance,
            score,
            cigar_offset,
            cigar_len: ops.len(),
        });
        self.bump_counter(distance, 1);
        self.metrics.observe(distance);
        true
    }

    pub fn add_interval_match(
        &mut self,
        interval: SaInterval,
        distance: usize,
        strand: Strand,
        key_length: usize,
    ) {
        if interval.is_empty() {
            return;
        }
        self.bump_counter(distance, interval.len() as u64);
        for _ in 0..interval.len().min(2) {
            self.metrics.observe(distance);
        }
        self.interval_matches.push(MatchInterval {
            interval,
            distance,
            strand,
            key_length,
        });
    }

    pub fn num_matches(&self) -> usize {
        self.counters.iter().sum::<u64>() as usize
    }

    pub fn is_mapped(&self) -> bool {
        self.num_matches() > 0
    }

    pub fn counters(&self) -> &[u64] {
        &self.counters
    }

    /// Shrink the counters to the last non-zero stratum; returns the
    /// number of retained strata.
    pub fn counters_compact(&mut self) -> usize {
        while self.counters.last() == Some(&0) {
            self.counters.pop();
        }
        self.counters.len()
    }

    pub fn min_matching_stratum(&self) -> Option<usize> {
        self.counters.iter().position(|&c| c > 0)
    }

    pub fn traces(&self) -> &[MatchTrace] {
        &self.traces
    }

    pub fn interval_matches(&self) -> &[MatchInterval] {
        &self.interval_matches
    }

    pub fn metrics(&self) -> MatchMetrics {
        self.metrics
    }

    pub fn cigar_of(&self, trace: &MatchTrace) -> &[CigarOp] {
        &self.cigar_ops[trace.cigar_offset..trace.cigar_offset + trace.cigar_len]
    }

    pub fn max_complete_stratum(&self) -> usize {
        self.max_complete_stratum
    }

    /// The container-level stratum is the weakest guarantee of any
    /// search that contributed matches.
    pub fn limit_max_complete_stratum(&mut self, stratum: usize) {
        self.max_complete_stratum = self.max_complete_stratum.min(stratum);
    }

    pub(crate) fn effective_ref_length(&self, trace: &MatchTrace) -> usize {
        self.cigar_of(trace).iter().map(|op| op.reference_len()).sum()
    }

    /// Reverse a trace's CIGAR in place (emulated reverse-strand search
    /// reported on forward coordinates).
    pub(crate) fn reverse_cigar(&mut self, trace_idx: usize) {
        let trace = &self.traces[trace_idx];
        let (offset, len) = (trace.cigar_offset, trace.cigar_len);
        self.cigar_ops[offset..offset + len].reverse();
    }

    /// Color-space rule: runs reverse like DNA; the per-base color
    /// re-coding of the original applies to mismatch payloads, which the
    /// op buffer does not carry.
    pub(crate) fn reverse_cigar_colorspace(&mut self, trace_idx: usize) {
        self.reverse_cigar(trace_idx);
    }

    /// Drop every match above `max_distance` (applied after the
    /// max-error adjustment rule tightened the budget mid-search).
    pub(crate) fn discard_above(&mut self, max_distance: usize) {
        if self.counters.len() <= max_distance + 1 {
            return;
        }
        self.traces.retain(|t| t.distance <= max_distance);
        self.interval_matches.retain(|iv| iv.distance <= max_distance);
        self.counters.truncate(max_distance + 1);
        let mut metrics = MatchMetrics::default();
        for (distance, &count) in self.counters.iter().enumerate() {
            for _ in 0..count.min(2) {
                metrics.observe(distance);
            }
        }
        self.metrics = metrics;
    }
}

#[cfg(test)]
mod matches_tests {
    use similar_asserts::assert_eq;

    use super::{cigar_string, CigarOp, Matches};
    use crate::archive::SaInterval;
    use crate::util::Strand;

    #[test]
    fn test_cigar_string_rendering() {
        let ops =
            [CigarOp::Eq(2), CigarOp::Mismatch(1), CigarOp::Eq(1)];
        assert_eq!(cigar_string(&ops), "2=1X1=");
    }

    #[test]
    fn test_counters_track_strata() {
        let mut matches = Matches::new();
        let ops = [CigarOp::Eq(4)];
        assert!(matches.add_match_trace(0, Strand::Forward, 0, &ops, 4));
        assert!(matches.add_match_trace(9, Strand::Forward, 2, &ops, 1));
        assert!(!matches.add_match_trace(0, Strand::Forward, 0, &ops, 4));
        assert_eq!(matches.counters(), &[1, 0, 1]);
        assert_eq!(matches.num_matches(), 2);
        assert_eq!(matches.metrics().min_distance, Some(0));
        assert_eq!(matches.metrics().subdominant_distance, Some(2));
    }

    #[test]
    fn test_interval_matches_count_positions() {
        let mut matches = Matches::new();
        matches.add_interval_match(
            SaInterval { lo: 3, hi: 6 },
            0,
            Strand::Forward,
            4,
        );
        assert_eq!(matches.num_matches(), 3);
        assert_eq!(matches.metrics().min_distance, Some(0));
        assert_eq!(matches.metrics().subdominant_distance, Some(0));
    }

    #[test]
    fn test_counters_compact() {
        let mut matches = Matches::new();
        let ops = [CigarOp::Eq(4)];
        matches.add_match_trace(0, Strand::Forward, 1, &ops, 0);
        matches.bump_counter(5, 0);
        assert_eq!(matches.counters().len(), 6);
        assert_eq!(matches.counters_compact(), 2);
        assert_eq!(matches.counters(), &[0, 1]);
        assert_eq!(matches.min_matching_stratum(), Some(1));
    }

    #[test]
    fn test_discard_above_rebuilds_metrics() {
        let mut matches = Matches::new();
        let ops = [CigarOp::Eq(4)];
        matches.add_match_trace(0, Strand::Forward, 1, &ops, 0);
        matches.add_match_trace(7, Strand::Reverse, 2, &ops, 0);
        matches.discard_above(1);
        assert_eq!(matches.num_matches(), 1);
        assert_eq!(matches.metrics().min_distance, Some(1));
        assert_eq!(matches.metrics().subdominant_distance, None);
    }

    #[test]
    fn test_reverse_cigar() {
        let mut matches = Matches::new();
        let ops =
            [CigarOp::Eq(2), CigarOp::Del(1), CigarOp::Mismatch(1)];
        matches.add_match_trace(0, Strand::Reverse, 2, &ops, 0);
        matches.reverse_cigar(0);
        let trace = matches.traces()[0].clone();
        assert_eq!(cigar_string(matches.cigar_of(&trace)), "1X1D2=");
    }
}
