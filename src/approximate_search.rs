use log::debug;

use crate::archive::{Archive, SaInterval};
use crate::filtering::{
    collect_profile_jobs, DecodeJob, FilteringCandidates, VerifyJob,
};
use crate::interval_set::IntervalSet;
use crate::matches::Matches;
use crate::myers::BpmMatch;
use crate::params::{
    EvaluatedParameters, LocalAlignmentPolicy, MappingMode,
    SearchParameters,
};
use crate::pattern::Pattern;
use crate::region_profile::RegionProfile;
use crate::util::is_real_base;

/// Shortest wildcard-free fragment worth seeding during read recovery.
const RECOVERY_MIN_FRAGMENT: usize = 4;

/// States of the approximate search; the search loop dispatches on the
/// current state until a terminal one is reached.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SearchState {
    Begin,
    NoRegions,
    ExactMatches,
    ExactFilteringAdaptive,
    CandidatesVerified,
    ExactFilteringBoost,
    InexactFiltering,
    Neighborhood,
    LocalAlignment,
    ReadRecovery,
    End,
}

impl SearchState {
    /// Stable label for debug and profile output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::NoRegions => "no_regions",
            Self::ExactMatches => "exact_matches",
            Self::ExactFilteringAdaptive => "exact_filtering_adaptive",
            Self::CandidatesVerified => "candidates_verified",
            Self::ExactFilteringBoost => "exact_filtering_boost",
            Self::InexactFiltering => "inexact_filtering",
            Self::Neighborhood => "neighborhood",
            Self::LocalAlignment => "local_alignment",
            Self::ReadRecovery => "read_recovery",
            Self::End => "end",
        }
    }
}

/// One strand's search: the state machine orchestrating region
/// profiling, candidate decoding, verification and the escalation
/// stages. Deterministic given (pattern, parameters, archive); after a
/// pipeline suspension the stored state is resumed as-is.
pub struct ApproximateSearch<'a> {
    archive: &'a Archive,
    params: &'a SearchParameters,
    evaluated: EvaluatedParameters,
    pattern: Pattern,
    state: SearchState,
    stop_before: Option<SearchState>,
    current_max_error: usize,
    max_complete_stratum: usize,
    max_matches_reached: bool,
    exact_interval: Option<SaInterval>,
    region_profile: Option<RegionProfile>,
    filtering_candidates: FilteringCandidates,
    interval_set: IntervalSet,
    pending_decode: Vec<DecodeJob>,
    pending_verify: Vec<VerifyJob>,
}

impl<'a> ApproximateSearch<'a> {
    pub fn new(
        archive: &'a Archive,
        params: &'a SearchParameters,
        pattern: Pattern,
    ) -> Self {
        let evaluated = params.evaluate(pattern.key_length());
        let current_max_error = evaluated.max_error;
        Self {
            archive,
            params,
            evaluated,
            pattern,
            state: SearchState::Begin,
            stop_before: None,
            current_max_error,
            max_complete_stratum: 0,
            max_matches_reached: false,
            exact_interval: None,
            region_profile: None,
            filtering_candidates: FilteringCandidates::new(),
            interval_set: IntervalSet::new(),
            pending_decode: Vec::new(),
            pending_verify: Vec::new(),
        }
    }

    /// Rearm for the next read, keeping the allocated buffers.
    pub fn reset(&mut self, pattern: Pattern) {
        self.evaluated = self.params.evaluate(pattern.key_length());
        self.current_max_error = self.evaluated.max_error;
        self.pattern = pattern;
        self.state = SearchState::Begin;
        self.stop_before = None;
        self.max_complete_stratum = 0;
        self.max_matches_reached = false;
        self.exact_interval = None;
        self.region_profile = None;
        self.filtering_candidates.clear();
        self.interval_set.clear();
        self.pending_decode.clear();
        self.pending_verify.clear();
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn current_max_error(&self) -> usize {
        self.current_max_error
    }

    pub fn max_complete_stratum(&self) -> usize {
        self.max_complete_stratum
    }

    pub fn max_matches_reached(&self) -> bool {
        self.max_matches_reached
    }

    pub fn num_filtering_candidates(&self) -> usize {
        self.filtering_candidates.num_regions()
    }

    pub fn filtering_candidates(&self) -> &FilteringCandidates {
        &self.filtering_candidates
    }

    pub(crate) fn set_stop_before(&mut self, state: Option<SearchState>) {
        self.stop_before = state;
    }

    /// Run the state machine until `end` (or the configured suspension
    /// state). Re-entrant: a suspended search resumes where it stopped.
    pub fn search(&mut self, matches: &mut Matches) {
        loop {
            if self.stop_before == Some(self.state)
                && self.state != SearchState::End
            {
                return;
            }
            debug!("asearch state {}", self.state.label());
            match self.state {
                SearchState::Begin => self.transition_begin(),
                SearchState::ExactFilteringAdaptive => {
                    self.run_exact_filtering_adaptive(matches)
                }
                SearchState::CandidatesVerified => {
                    self.transition_candidates_verified(matches)
                }
                SearchState::ExactMatches => {
                    self.transition_exact_matches(matches)
                }
                SearchState::NoRegions => self.transition_no_regions(),
                SearchState::ExactFilteringBoost => {
                    self.run_exact_filtering_boost(matches)
                }
                SearchState::InexactFiltering => {
                    self.run_inexact_filtering(matches)
                }
                SearchState::Neighborhood => self.run_neighborhood(matches),
                SearchState::LocalAlignment => {
                    self.run_local_alignment(matches)
                }
                SearchState::ReadRecovery => self.run_read_recovery(matches),
                SearchState::End => {
                    self.finish(matches);
                    return;
                }
            }
        }
    }

    /// The max-error adjustment rule: with best distance d* and
    /// delta strata after best, never explore past d* + delta.
    fn adjust_current_max_error(&mut self, matches: &Matches) {
        let delta = self.evaluated.complete_strata_after_best;
        if delta < self.current_max_error {
            if let Some(best) = matches.metrics().min_distance {
                if best + delta < self.current_max_error {
                    self.current_max_error = best + delta;
                }
            }
        }
    }

    fn quick_abandon(&mut self, matches: &Matches) -> bool {
        if matches.num_matches() > self.params.max_matches {
            self.max_matches_reached = true;
            self.state = SearchState::End;
            true
        } else {
            false
        }
    }

    fn local_or_end(&self) -> SearchState {
        match self.params.local_alignment {
            LocalAlignmentPolicy::Never => SearchState::End,
            _ => SearchState::LocalAlignment,
        }
    }

    fn transition_begin(&mut self) {
        let key_length = self.pattern.key_length();
        if key_length == 0 || key_length == self.pattern.num_wildcards() {
            self.state = SearchState::End;
        } else {
            self.state = SearchState::ExactFilteringAdaptive;
        }
    }

    /// Stage-1 entry point, shared by the inline path and the pipeline:
    /// profile the pattern, record the pigeonhole bound, branch to the
    /// exact-matches or no-regions shortcuts, otherwise queue the SA
    /// indices for decoding.
    pub(crate) fn stepwise_region_profile(&mut self) {
        if self.state == SearchState::Begin {
            self.transition_begin();
        }
        if self.state != SearchState::ExactFilteringAdaptive {
            return;
        }
        let mut profile = RegionProfile::generate_adaptive(
            self.archive,
            &self.pattern,
            self.params,
        );
        self.max_complete_stratum = self.max_complete_stratum.max(
            profile.error_budget().min(self.current_max_error + 1),
        );
        if let Some(region) =
            profile.whole_key_region(self.pattern.key_length())
        {
            self.exact_interval = Some(region.interval);
            self.region_profile = Some(profile);
            self.state = SearchState::ExactMatches;
            return;
        }
        let usable = profile
            .regions()
            .iter()
            .any(|r| r.is_searchable() && !r.interval.is_empty());
        if !usable {
            self.region_profile = Some(profile);
            self.state = SearchState::NoRegions;
            return;
        }
        self.pending_decode = collect_profile_jobs(
            &mut profile,
            self.params.max_candidates_per_region,
        );
        self.region_profile = Some(profile);
    }

    pub(crate) fn num_decode_jobs(&self) -> usize {
        self.pending_decode.len()
    }

    pub(crate) fn decode_sa_indices(
        &self,
    ) -> impl Iterator<Item = usize> + '_ {
        self.pending_decode.iter().map(|job| job.sa_idx)
    }

    /// Stage-2 retrieval: store the located positions, compact them into
    /// candidate groups and queue the verification windows.
    pub(crate) fn stepwise_decode_retrieve(&mut self, positions: &[usize]) {
        debug_assert_eq!(positions.len(), self.pending_decode.len());
        for (position, job) in positions.iter().zip(&self.pending_decode) {
            self.filtering_candidates
                .apply_decoded_position(*position, job);
        }
        self.pending_decode.clear();
        self.filtering_candidates.compact_positions(
            self.current_max_error,
            self.pattern.key_length(),
        );
        self.pending_verify =
            self.filtering_candidates.verify_jobs(self.current_max_error);
    }

    pub(crate) fn num_verify_jobs(&self) -> usize {
        self.pending_verify.len()
    }

    pub(crate) fn verify_jobs_pending(&self) -> &[VerifyJob] {
        &self.pending_verify
    }

    /// Stage-3 retrieval: settle every candidate with its device result.
    pub(crate) fn stepwise_verify_retrieve(
        &mut self,
        results: &[Option<BpmMatch>],
        matches: &mut Matches,
    ) {
        debug_assert_eq!(results.len(), self.pending_verify.len());
        let jobs = std::mem::take(&mut self.pending_verify);
        for (job, result) in jobs.iter().zip(results) {
            self.filtering_candidates.apply_bpm_result(
                self.archive,
                &self.pattern,
                job,
                *result,
                self.params.alignment_global_min_identity,
                matches,
            );
        }
        if self.state == SearchState::ExactFilteringAdaptive {
            self.post_verify(matches);
        }
    }

    /// Finish a suspended search from whatever state it parked in.
    pub(crate) fn stepwise_finish(&mut self, matches: &mut Matches) {
        self.stop_before = None;
        self.search(matches);
    }

    fn post_verify(&mut self, matches: &mut Matches) {
        self.adjust_current_max_error(matches);
        self.state = SearchState::CandidatesVerified;
    }

    fn run_exact_filtering_adaptive(&mut self, matches: &mut Matches) {
        self.stepwise_region_profile();
        if self.state != SearchState::ExactFilteringAdaptive {
            return;
        }
        let jobs = std::mem::take(&mut self.pending_decode);
        self.filtering_candidates.decode_candidates(self.archive, &jobs);
        self.filtering_candidates.compact_positions(
            self.current_max_error,
            self.pattern.key_length(),
        );
        self.filtering_candidates.verify_candidates(
            self.archive,
            &self.pattern,
            self.current_max_error,
            self.params.alignment_global_min_identity,
            matches,
        );
        self.post_verify(matches);
    }

    fn transition_candidates_verified(&mut self, matches: &mut Matches) {
        if self.quick_abandon(matches) {
            return;
        }
        if matches.is_mapped() {
            if let Some(fulfilled) = self.params.fulfilled_hook {
                if fulfilled(matches) {
                    self.state = SearchState::End;
                    return;
                }
            }
            self.state = match self.params.local_alignment {
                LocalAlignmentPolicy::Always => SearchState::LocalAlignment,
                _ => SearchState::End,
            };
        } else {
            self.state = match self.params.mapping_mode {
                MappingMode::Fast => self.local_or_end(),
                _ => SearchState::ExactFilteringBoost,
            };
        }
    }

    fn transition_exact_matches(&mut self, matches: &mut Matches) {
        let interval = self
            .exact_interval
            .take()
            .expect("exact matches state carries an interval");
        if self.params.mapping_mode == MappingMode::Complete
            && self.current_max_error >= 1
        {
            // the neighborhood re-enumerates the exact stratum with full
            // traces, so the compact interval is not emitted twice
            self.state = SearchState::Neighborhood;
            return;
        }
        matches.add_interval_match(
            interval,
            0,
            self.pattern.strand(),
            self.pattern.key_length(),
        );
        self.max_complete_stratum = self.max_complete_stratum.max(1);
        self.adjust_current_max_error(matches);
        if self.quick_abandon(matches) {
            return;
        }
        self.state = SearchState::End;
    }

    fn transition_no_regions(&mut self) {
        self.state = match self.params.mapping_mode {
            MappingMode::Fast => SearchState::End,
            _ => SearchState::ReadRecovery,
        };
    }

    fn run_exact_filtering_boost(&mut self, matches: &mut Matches) {
        let prior = match self.region_profile.take() {
            Some(profile) => profile,
            None => RegionProfile::generate_adaptive(
                self.archive,
                &self.pattern,
                self.params,
            ),
        };
        let mut profile = RegionProfile::generate_boost(
            self.archive,
            &self.pattern,
            self.params,
            &prior,
        );
        self.max_complete_stratum = self.max_complete_stratum.max(
            profile.error_budget().min(self.current_max_error + 1),
        );
        let jobs = collect_profile_jobs(
            &mut profile,
            self.params.max_candidates_per_region,
        );
        self.region_profile = Some(profile);
        self.filtering_candidates.decode_candidates(self.archive, &jobs);
        self.filtering_candidates.compact_positions(
            self.current_max_error,
            self.pattern.key_length(),
        );
        self.filtering_candidates.verify_candidates(
            self.archive,
            &self.pattern,
            self.current_max_error,
            self.params.alignment_global_min_identity,
            matches,
        );
        self.adjust_current_max_error(matches);
        if self.quick_abandon(matches) {
            return;
        }
        self.state = if matches.is_mapped() {
            SearchState::End
        } else {
            SearchState::InexactFiltering
        };
    }

    fn run_inexact_filtering(&mut self, matches: &mut Matches) {
        let prior = match self.region_profile.take() {
            Some(profile) => profile,
            None => RegionProfile::generate_adaptive(
                self.archive,
                &self.pattern,
                self.params,
            ),
        };
        let profile = RegionProfile::generate_boost(
            self.archive,
            &self.pattern,
            self.params,
            &prior,
        );
        let per_region_budget = self.current_max_error.min(1);
        let cap = self.params.max_candidates_per_region;
        let mut jobs = Vec::new();
        for (region_index, region) in profile.regions().iter().enumerate()
        {
            if !region.is_searchable() || region.len() < 2 {
                continue;
            }
            self.interval_set.clear();
            crate::neighborhood::bounded_search(
                self.archive,
                &self.pattern.key()[region.begin..region.end],
                per_region_budget,
                &mut self.interval_set,
            );
            for entry in self.interval_set.iter() {
                let take = entry.interval.len().min(cap);
                for sa_idx in entry.interval.lo..entry.interval.lo + take {
                    jobs.push(DecodeJob {
                        sa_idx,
                        region_index,
                        pattern_offset: region.begin,
                        source_distance: entry.distance,
                    });
                }
            }
        }
        self.region_profile = Some(profile);
        self.filtering_candidates.decode_candidates(self.archive, &jobs);
        self.filtering_candidates.compact_positions(
            self.current_max_error,
            self.pattern.key_length(),
        );
        self.filtering_candidates.verify_candidates(
            self.archive,
            &self.pattern,
            self.current_max_error,
            self.params.alignment_global_min_identity,
            matches,
        );
        self.adjust_current_max_error(matches);
        if self.quick_abandon(matches) {
            return;
        }
        self.state = if matches.is_mapped() {
            SearchState::End
        } else if self.params.mapping_mode == MappingMode::Complete {
            SearchState::Neighborhood
        } else {
            self.local_or_end()
        };
    }

    /// Exhaustive k-bounded generation over the whole key up to the
    /// current max error; every stratum through that budget is complete
    /// afterwards.
    fn run_neighborhood(&mut self, matches: &mut Matches) {
        self.adjust_current_max_error(matches);
        let budget = self.current_max_error;
        self.interval_set.clear();
        crate::neighborhood::bounded_search(
            self.archive,
            self.pattern.key(),
            budget,
            &mut self.interval_set,
        );
        let cap = self.params.max_candidates_per_region;
        let mut jobs = Vec::new();
        for entry in self.interval_set.iter() {
            let take = entry.interval.len().min(cap);
            for sa_idx in entry.interval.lo..entry.interval.lo + take {
                jobs.push(DecodeJob {
                    sa_idx,
                    region_index: usize::MAX,
                    pattern_offset: 0,
                    source_distance: entry.distance,
                });
            }
        }
        self.filtering_candidates.decode_candidates(self.archive, &jobs);
        self.filtering_candidates.compact_positions(
            budget,
            self.pattern.key_length(),
        );
        self.filtering_candidates.verify_candidates(
            self.archive,
            &self.pattern,
            budget,
            self.params.alignment_global_min_identity,
            matches,
        );
        self.max_complete_stratum =
            self.max_complete_stratum.max(budget + 1);
        self.adjust_current_max_error(matches);
        if self.quick_abandon(matches) {
            return;
        }
        self.state = SearchState::End;
    }

    fn run_local_alignment(&mut self, matches: &mut Matches) {
        let band = self.pattern.max_error().max(1);
        self.filtering_candidates.verify_local(
            self.archive,
            &self.pattern,
            self.params.alignment_local_min_identity,
            band,
            matches,
        );
        self.state = SearchState::End;
    }

    /// Fallback seed-and-extend on wildcard-free fragments when the
    /// profile yielded nothing usable. No completeness claim is made.
    fn run_read_recovery(&mut self, matches: &mut Matches) {
        let cap = self.params.max_candidates_per_region;
        let mut jobs = Vec::new();
        let key = self.pattern.key();
        let mut i = 0usize;
        while i < key.len() {
            if !is_real_base(key[i]) {
                i += 1;
                continue;
            }
            let begin = i;
            while i < key.len() && is_real_base(key[i]) {
                i += 1;
            }
            if i - begin < RECOVERY_MIN_FRAGMENT {
                continue;
            }
            let interval = self.archive.exact_interval(&key[begin..i]);
            let take = interval.len().min(cap);
            for sa_idx in interval.lo..interval.lo + take {
                jobs.push(DecodeJob {
                    sa_idx,
                    region_index: usize::MAX,
                    pattern_offset: begin,
                    source_distance: 0,
                });
            }
        }
        self.filtering_candidates.decode_candidates(self.archive, &jobs);
        self.filtering_candidates.compact_positions(
            self.current_max_error,
            self.pattern.key_length(),
        );
        self.filtering_candidates.verify_candidates(
            self.archive,
            &self.pattern,
            self.current_max_error,
            self.params.alignment_global_min_identity,
            matches,
        );
        self.adjust_current_max_error(matches);
        if self.quick_abandon(matches) {
            return;
        }
        // recovery makes no completeness claim, so a complete-mode
        // search still owes the neighborhood enumeration
        self.state = if self.params.mapping_mode == MappingMode::Complete {
            SearchState::Neighborhood
        } else {
            SearchState::End
        };
    }

    fn finish(&mut self, matches: &mut Matches) {
        let stratum = if self.max_matches_reached {
            0
        } else {
            self.max_complete_stratum
        };
        matches.limit_max_complete_stratum(stratum);
    }
}
