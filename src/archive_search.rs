use bio::alphabets::dna::revcomp;
use log::debug;
use rayon::prelude::*;

use crate::approximate_search::{ApproximateSearch, SearchState};
use crate::archive::Archive;
use crate::errs::{MapError, MapResult};
use crate::filtering::verify::swg_score;
use crate::matches::{CigarOp, MappedMatch, Matches};
use crate::myers::BpmMatch;
use crate::params::{SearchParameters, SelectionParameters};
use crate::pattern::Pattern;
use crate::pipeline::device::BpmDeviceBlock;
use crate::util::Strand;

/// Single-end search over both strands of one read: prepares the
/// forward pattern and (unless the archive indexes the complement) its
/// reverse-complement twin, runs the approximate search per strand into
/// one shared matches container, and decodes/selects the results.
///
/// The forward search is probed first and may suspend before its
/// neighborhood stage; the reverse result then tightens the error
/// budget before the forward search resumes.
pub struct ArchiveSearch<'a> {
    archive: &'a Archive,
    params: &'a SearchParameters,
    forward: Option<ApproximateSearch<'a>>,
    reverse: Option<ApproximateSearch<'a>>,
    matches: Matches,
    search_reverse: bool,
    prepare_error: Option<MapError>,
    tag: usize,
}

impl<'a> ArchiveSearch<'a> {
    pub fn new(archive: &'a Archive, params: &'a SearchParameters) -> Self {
        Self {
            archive,
            params,
            forward: None,
            reverse: None,
            matches: Matches::new(),
            search_reverse: false,
            prepare_error: None,
            tag: 0,
        }
    }

    pub fn tag(&self) -> usize {
        self.tag
    }

    pub fn set_tag(&mut self, tag: usize) {
        self.tag = tag;
    }

    pub fn matches(&self) -> &Matches {
        &self.matches
    }

    pub fn prepare_error(&self) -> Option<&MapError> {
        self.prepare_error.as_ref()
    }

    /// Encode the read for both strands. A pattern-level failure leaves
    /// the search prepared-but-unmapped: `search` becomes a no-op and
    /// selection reports nothing.
    pub fn prepare(&mut self, read: &[u8]) -> MapResult<()> {
        self.matches.clear();
        self.prepare_error = None;
        self.search_reverse = false;
        let forward =
            match Pattern::prepare(read, self.params, Strand::Forward) {
                Ok(pattern) => pattern,
                Err(e) => {
                    self.forward = None;
                    self.reverse = None;
                    self.prepare_error = Some(e.clone());
                    return Err(e);
                }
            };
        if !self.archive.indexed_complement() {
            // color-space archives reverse without complementing
            let rc_key = if self.archive.colorspace() {
                forward.key().iter().rev().copied().collect::<Vec<u8>>()
            } else {
                revcomp(forward.key())
            };
            // a palindromic read makes the second strand redundant
            self.search_reverse = rc_key != forward.key();
            if self.search_reverse {
                let pattern = match Pattern::prepare(
                    &rc_key,
                    self.params,
                    Strand::Reverse,
                ) {
                    Ok(pattern) => pattern,
                    Err(e) => {
                        self.forward = None;
                        self.reverse = None;
                        self.prepare_error = Some(e.clone());
                        return Err(e);
                    }
                };
                match self.reverse.as_mut() {
                    Some(search) => search.reset(pattern),
                    None => {
                        self.reverse = Some(ApproximateSearch::new(
                            self.archive,
                            self.params,
                            pattern,
                        ))
                    }
                }
            }
        }
        match self.forward.as_mut() {
            Some(search) => search.reset(forward),
            None => {
                self.forward = Some(ApproximateSearch::new(
                    self.archive,
                    self.params,
                    forward,
                ))
            }
        }
        Ok(())
    }

    /// Run the single-end workflow: probe the forward strand, search the
    /// reverse, resume the forward if it was suspended, then apply the
    /// strata cap. Quick-abandons between strands zero the complete
    /// stratum.
    pub fn search(&mut self) {
        if self.prepare_error.is_some() {
            return;
        }
        let max_matches = self.params.max_matches;
        let delta = self.params.complete_strata_after_best_nominal;
        let forward =
            self.forward.as_mut().expect("prepared search has a pattern");
        if !self.search_reverse {
            forward.set_stop_before(None);
            forward.search(&mut self.matches);
        } else {
            let probe = delta < forward.pattern().max_error();
            forward.set_stop_before(
                probe.then_some(SearchState::Neighborhood),
            );
            forward.search(&mut self.matches);
            if self.matches.num_matches() > max_matches {
                // more matches than requested, give up on this strand
                self.matches.limit_max_complete_stratum(0);
            } else {
                let reverse = self
                    .reverse
                    .as_mut()
                    .expect("reverse strand was prepared");
                reverse.set_stop_before(None);
                reverse.search(&mut self.matches);
                let forward = self.forward.as_mut().unwrap();
                if forward.state() != SearchState::End {
                    if self.matches.num_matches() > max_matches {
                        self.matches.limit_max_complete_stratum(0);
                    } else {
                        forward.set_stop_before(None);
                        forward.search(&mut self.matches);
                    }
                }
            }
        }
        self.apply_strata_cap();
    }

    /// Drop strata past `best + delta` once both strands have reported:
    /// the adjustment rule bounds what the search explores, this bounds
    /// what it returns.
    fn apply_strata_cap(&mut self) {
        let delta = self.params.complete_strata_after_best_nominal;
        let max_error = self
            .forward
            .as_ref()
            .map(|s| s.pattern().max_error())
            .unwrap_or(0);
        if delta < max_error {
            if let Some(best) = self.matches.metrics().min_distance {
                self.matches.discard_above(best + delta);
            }
        }
    }

    pub(crate) fn reverse_search(&self) -> Option<&ApproximateSearch<'a>> {
        if self.search_reverse {
            self.reverse.as_ref()
        } else {
            None
        }
    }

    /// Pipeline stage 1 on both strands.
    pub(crate) fn stepwise_region_profile(&mut self) {
        if self.prepare_error.is_some() {
            return;
        }
        if let Some(forward) = self.forward.as_mut() {
            forward.stepwise_region_profile();
        }
        if self.search_reverse {
            if let Some(reverse) = self.reverse.as_mut() {
                reverse.stepwise_region_profile();
            }
        }
    }

    pub(crate) fn num_decode_jobs(&self) -> usize {
        let forward = self
            .forward
            .as_ref()
            .map(|s| s.num_decode_jobs())
            .unwrap_or(0);
        let reverse = self
            .reverse_search()
            .map(|s| s.num_decode_jobs())
            .unwrap_or(0);
        forward + reverse
    }

    /// Copy both strands' encoded SA indices into a decode buffer.
    pub(crate) fn append_decode_indices(&self, out: &mut Vec<usize>) {
        if let Some(forward) = self.forward.as_ref() {
            out.extend(forward.decode_sa_indices());
        }
        if let Some(reverse) = self.reverse_search() {
            out.extend(reverse.decode_sa_indices());
        }
    }

    /// Feed the located positions back, forward strand first (the order
    /// `append_decode_indices` copied them out).
    pub(crate) fn stepwise_decode_retrieve(&mut self, positions: &[usize]) {
        let split = self
            .forward
            .as_ref()
            .map(|s| s.num_decode_jobs())
            .unwrap_or(0);
        if let Some(forward) = self.forward.as_mut() {
            forward.stepwise_decode_retrieve(&positions[..split]);
        }
        if self.search_reverse {
            if let Some(reverse) = self.reverse.as_mut() {
                reverse.stepwise_decode_retrieve(&positions[split..]);
            }
        }
    }

    pub(crate) fn num_verify_jobs(&self) -> usize {
        let forward = self
            .forward
            .as_ref()
            .map(|s| s.num_verify_jobs())
            .unwrap_or(0);
        let reverse = self
            .reverse_search()
            .map(|s| s.num_verify_jobs())
            .unwrap_or(0);
        forward + reverse
    }

    /// Pack both strands' pending verifications for the BPM kernel.
    pub(crate) fn bpm_blocks(
        &self,
    ) -> (Option<BpmDeviceBlock>, Option<BpmDeviceBlock>) {
        let block_of = |search: &ApproximateSearch<'a>| {
            let jobs = search.verify_jobs_pending();
            if jobs.is_empty() {
                return None;
            }
            Some(BpmDeviceBlock {
                peq: search.pattern().peq_table().to_vec(),
                key_length: search.pattern().key_length(),
                max_error: search.current_max_error(),
                windows: jobs
                    .iter()
                    .map(|job| (job.window_begin, job.window_len))
                    .collect(),
            })
        };
        (
            self.forward.as_ref().and_then(|s| block_of(s)),
            self.reverse_search().and_then(|s| block_of(s)),
        )
    }

    /// Settle both strands with their kernel results.
    pub(crate) fn stepwise_verify_retrieve(
        &mut self,
        forward_results: &[Option<BpmMatch>],
        reverse_results: &[Option<BpmMatch>],
    ) {
        let Self { forward, reverse, matches, search_reverse, .. } = self;
        if let Some(forward) = forward.as_mut() {
            forward.stepwise_verify_retrieve(forward_results, matches);
        }
        if *search_reverse {
            if let Some(reverse) = reverse.as_mut() {
                reverse.stepwise_verify_retrieve(reverse_results, matches);
            }
        }
    }

    /// Pipeline epilogue: both strands run to their end state, then the
    /// strata cap is applied as in the inline path.
    pub(crate) fn stepwise_finish(&mut self) {
        if self.prepare_error.is_some() {
            return;
        }
        if let Some(forward) = self.forward.as_mut() {
            forward.stepwise_finish(&mut self.matches);
        }
        if self.search_reverse {
            if let Some(reverse) = self.reverse.as_mut() {
                reverse.stepwise_finish(&mut self.matches);
            }
        }
        self.apply_strata_cap();
    }

    /// Decode interval matches and trim to the reporting caps (counter
    /// compaction, strata accumulation, top-trim), then resolve every
    /// kept match through the locator and order by (distance, position).
    pub fn select_matches(
        &mut self,
        selection: &SelectionParameters,
    ) -> Vec<MappedMatch> {
        if selection.max_decoded == 0
            && selection.min_strata == 0
            && selection.min_reported == 0
        {
            return Vec::new();
        }
        if selection.min_reported == 0 && selection.max_reported == 0 {
            return Vec::new();
        }
        let max_nz_stratum = self.matches.counters_compact();
        if max_nz_stratum == 0 {
            return Vec::new();
        }
        let counters = self.matches.counters().to_vec();
        let mut strata = 0usize;
        let mut total = 0u64;
        while strata < max_nz_stratum {
            total += counters[strata];
            if total as usize > selection.max_decoded {
                total -= counters[strata];
                break;
            }
            strata += 1;
        }
        if selection.min_strata > 0 {
            let min_nz =
                self.matches.min_matching_stratum().unwrap_or(0);
            let mandatory = min_nz + selection.min_strata;
            while strata < max_nz_stratum && strata < mandatory {
                total += counters[strata];
                strata += 1;
            }
        }
        while strata < max_nz_stratum
            && (total as usize) < selection.min_reported
        {
            total += counters[strata];
            strata += 1;
        }
        while strata > 0 {
            let prev = total - counters[strata - 1];
            if total as usize <= selection.max_reported
                || (prev as usize) < selection.min_reported
            {
                break;
            }
            total = prev;
            strata -= 1;
        }
        if total == 0 || strata == 0 {
            return Vec::new();
        }
        let last_distance = strata - 1;
        let last_stratum_cap = if total as usize > selection.max_reported {
            selection.max_reported
                - (total - counters[strata - 1]) as usize
        } else {
            usize::MAX
        };

        let mut out = Vec::new();
        let mut last_stratum_count = 0usize;
        for idx in 0..self.matches.traces().len() {
            let distance = self.matches.traces()[idx].distance;
            if distance > last_distance {
                continue;
            }
            if distance == last_distance {
                if last_stratum_count >= last_stratum_cap {
                    continue;
                }
                last_stratum_count += 1;
            }
            if let Some(mapped) = self.decode_trace(idx) {
                out.push(mapped);
            }
        }
        let intervals = self.matches.interval_matches().to_vec();
        for interval_match in intervals {
            if interval_match.distance > last_distance
                || interval_match.interval.is_empty()
            {
                continue;
            }
            let is_last = interval_match.distance == last_distance;
            for sa_idx in
                interval_match.interval.lo..interval_match.interval.hi
            {
                if is_last {
                    if last_stratum_count >= last_stratum_cap {
                        break;
                    }
                    last_stratum_count += 1;
                }
                let text_position = self.archive.fm_index_lookup(sa_idx);
                let ops =
                    vec![CigarOp::Eq(interval_match.key_length as u32)];
                if let Some(mapped) = self.decode_position(
                    text_position,
                    interval_match.strand,
                    interval_match.distance,
                    ops,
                ) {
                    out.push(mapped);
                }
            }
        }
        // the full key makes the order reproducible across the inline
        // and pipelined paths whatever the insertion order was
        out.sort_by(|a, b| {
            (a.distance, &a.sequence_name, a.position, a.strand, &a.cigar)
                .cmp(&(
                    b.distance,
                    &b.sequence_name,
                    b.position,
                    b.strand,
                    &b.cigar,
                ))
        });
        out
    }

    fn decode_trace(&mut self, trace_idx: usize) -> Option<MappedMatch> {
        let trace = self.matches.traces()[trace_idx].clone();
        let location = match self.archive.locator_map(trace.text_position)
        {
            Ok(location) => location,
            Err(e) => {
                debug!("dropping undecodable match: {e}");
                return None;
            }
        };
        let emulated_rc = trace.strand == Strand::Reverse;
        let projected_rc = location.direction == Strand::Reverse;
        if emulated_rc || projected_rc {
            if self.archive.colorspace() {
                self.matches.reverse_cigar_colorspace(trace_idx);
            } else {
                self.matches.reverse_cigar(trace_idx);
            }
        }
        let trace = self.matches.traces()[trace_idx].clone();
        let ops = self.matches.cigar_of(&trace).to_vec();
        let position = if projected_rc {
            let effective = self.matches.effective_ref_length(&trace);
            location.offset.checked_sub(effective.saturating_sub(1))?
        } else {
            location.offset
        };
        let strand = if emulated_rc || projected_rc {
            Strand::Reverse
        } else {
            Strand::Forward
        };
        Some(MappedMatch {
            sequence_name: location.name,
            position,
            strand,
            distance: trace.distance,
            cigar: ops,
            score: trace.score,
        })
    }

    fn decode_position(
        &self,
        text_position: usize,
        strand: Strand,
        distance: usize,
        ops: Vec<CigarOp>,
    ) -> Option<MappedMatch> {
        let location = match self.archive.locator_map(text_position) {
            Ok(location) => location,
            Err(e) => {
                debug!("dropping undecodable interval match: {e}");
                return None;
            }
        };
        let projected_rc = location.direction == Strand::Reverse;
        let effective =
            ops.iter().map(|op| op.reference_len()).sum::<usize>();
        let position = if projected_rc {
            location.offset.checked_sub(effective.saturating_sub(1))?
        } else {
            location.offset
        };
        let strand = if projected_rc || strand == Strand::Reverse {
            Strand::Reverse
        } else {
            Strand::Forward
        };
        let score = swg_score(&ops);
        Some(MappedMatch {
            sequence_name: location.name,
            position,
            strand,
            distance,
            cigar: ops,
            score,
        })
    }
}

/// Map a batch of reads with one in-line archive search per rayon
/// worker; the shared archive is read-only.
pub fn map_reads_parallel<R>(
    archive: &Archive,
    params: &SearchParameters,
    selection: &SelectionParameters,
    reads: &[R],
) -> Vec<Vec<MappedMatch>>
where
    R: AsRef<[u8]> + Sync,
{
    reads
        .par_iter()
        .map_init(
            || ArchiveSearch::new(archive, params),
            |search, read| {
                if search.prepare(read.as_ref()).is_err() {
                    return Vec::new();
                }
                search.search();
                search.select_matches(selection)
            },
        )
        .collect()
}

#[cfg(test)]
mod archive_search_tests {
    use similar_asserts::assert_eq;

    use super::{map_reads_parallel, ArchiveSearch};
    use crate::archive::Archive;
    use crate::errs::MapError;
    use crate::matches::cigar_string;
    use crate::params::{
        ErrorLimit, SearchParameters, SelectionParameters,
    };
    use crate::util::Strand;

    fn archive(text: &str) -> Archive {
        Archive::from_sequences(
            &[("ref".to_string(), text.as_bytes())],
            false,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_both_strands_are_searched() {
        let archive = archive("TTAACCGGTT");
        let mut params = SearchParameters::default();
        params.max_error = ErrorLimit::Bases(0);
        let mut search = ArchiveSearch::new(&archive, &params);
        // read GGTTAA: revcomp is TTAACC, present at 0
        search.prepare(b"GGTTAA").unwrap();
        search.search();
        let selected =
            search.select_matches(&SelectionParameters::default());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].strand, Strand::Reverse);
        assert_eq!(selected[0].position, 0);
        assert_eq!(selected[0].distance, 0);
    }

    #[test]
    fn test_palindromic_read_searches_once() {
        let archive = archive("AATTAATT");
        let mut params = SearchParameters::default();
        params.max_error = ErrorLimit::Bases(0);
        let mut search = ArchiveSearch::new(&archive, &params);
        search.prepare(b"AATT").unwrap();
        search.search();
        let selected =
            search.select_matches(&SelectionParameters::default());
        // only forward-strand hits, not doubled by the identical RC
        assert_eq!(selected.len(), 2);
        assert!(selected
            .iter()
            .all(|m| m.strand == Strand::Forward));
    }

    #[test]
    fn test_prepare_error_yields_unmapped() {
        let archive = archive("ACGTACGT");
        let params = SearchParameters::default();
        let mut search = ArchiveSearch::new(&archive, &params);
        let err = search.prepare(b"NNNN").unwrap_err();
        assert_eq!(err, MapError::AllWildcards);
        search.search();
        assert!(search
            .select_matches(&SelectionParameters::default())
            .is_empty());
    }

    #[test]
    fn test_selection_orders_by_distance_then_position() {
        let archive = archive("ACGTTTTTACCT");
        let mut params = SearchParameters::default();
        params.max_error = ErrorLimit::Bases(1);
        params.complete_strata_after_best_nominal = 1;
        let mut search = ArchiveSearch::new(&archive, &params);
        search.prepare(b"ACGT").unwrap();
        search.search();
        let selected =
            search.select_matches(&SelectionParameters::default());
        assert!(selected.len() >= 2);
        assert_eq!(selected[0].distance, 0);
        assert_eq!(selected[0].position, 0);
        for pair in selected.windows(2) {
            assert!(
                (pair[0].distance, pair[0].position)
                    <= (pair[1].distance, pair[1].position)
            );
        }
    }

    #[test]
    fn test_max_reported_trims_last_stratum() {
        let archive = archive(&"ACGT".repeat(16));
        let mut params = SearchParameters::default();
        params.max_error = ErrorLimit::Bases(0);
        let mut search = ArchiveSearch::new(&archive, &params);
        search.prepare(b"ACGTACGT").unwrap();
        search.search();
        let selection = SelectionParameters {
            max_decoded: 100,
            min_strata: 1,
            min_reported: 1,
            max_reported: 5,
        };
        let selected = search.select_matches(&selection);
        assert_eq!(selected.len(), 5);
    }

    #[test]
    fn test_round_trip_against_complement_indexed_archive() {
        let text = "ACGTTGCAACGTGGGG";
        let plain = archive(text);
        let both = Archive::from_sequences(
            &[("ref".to_string(), text.as_bytes())],
            true,
            false,
        )
        .unwrap();
        let mut params = SearchParameters::default();
        params.max_error = ErrorLimit::Bases(0);
        let selection = SelectionParameters::default();

        let run = |archive: &Archive| {
            let mut search = ArchiveSearch::new(archive, &params);
            search.prepare(b"CCCC").unwrap();
            search.search();
            let mut out = search.select_matches(&selection);
            out.sort_by_key(|m| (m.position, m.strand));
            out.into_iter()
                .map(|m| (m.position, m.strand, m.distance))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(&plain), run(&both));
    }

    #[test]
    fn test_idempotent_search() {
        let archive = archive("ACGTACGTACGT");
        let mut params = SearchParameters::default();
        params.max_error = ErrorLimit::Bases(1);
        let selection = SelectionParameters::default();
        let mut search = ArchiveSearch::new(&archive, &params);
        let mut runs = Vec::new();
        for _ in 0..2 {
            search.prepare(b"ACGT").unwrap();
            search.search();
            runs.push(search.select_matches(&selection));
        }
        assert_eq!(runs[0], runs[1]);
    }

    #[test]
    fn test_parallel_driver_matches_serial() {
        let archive = archive("ACGTACGTACGTTTTTGGGG");
        let mut params = SearchParameters::default();
        params.max_error = ErrorLimit::Bases(1);
        let selection = SelectionParameters::default();
        let reads: Vec<&[u8]> =
            vec![b"ACGT", b"TTTT", b"GGGG", b"CCCC"];
        let parallel =
            map_reads_parallel(&archive, &params, &selection, &reads);
        let mut search = ArchiveSearch::new(&archive, &params);
        for (read, expected) in reads.iter().zip(&parallel) {
            search.prepare(read).unwrap();
            search.search();
            assert_eq!(&search.select_matches(&selection), expected);
        }
    }

    #[test]
    fn test_cigar_of_reverse_match_is_reversed() {
        // forward text holds the RC of the read with one mismatch so
        // the reported reverse-strand CIGAR comes out flipped
        let archive = archive("TTTTAGGCGT");
        let mut params = SearchParameters::default();
        params.max_error = ErrorLimit::Bases(1);
        params.complete_strata_after_best_nominal = 1;
        let mut search = ArchiveSearch::new(&archive, &params);
        // revcomp(ACGCCA) = TGGCGT; text has AGGCGT at 4 (mismatch at
        // window start), so the un-reversed trace is 1X5= and the
        // reported CIGAR must read 5=1X
        search.prepare(b"ACGCCA").unwrap();
        search.search();
        let selected =
            search.select_matches(&SelectionParameters::default());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].strand, Strand::Reverse);
        assert_eq!(selected[0].distance, 1);
        assert_eq!(cigar_string(&selected[0].cigar), "5=1X");
    }
}
