use derive_new::new;

use crate::matches::Matches;

/// Escalation policy of the approximate search. Fast stops after the
/// adaptive-filtering stage, Sensitive adds the boosted and inexact
/// filtering stages, Complete finishes with a full neighborhood search
/// up to the current maximum error.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum MappingMode {
    #[default]
    Fast,
    Sensitive,
    Complete,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum LocalAlignmentPolicy {
    Never,
    #[default]
    IfUnmapped,
    Always,
}

/// An error budget, either proportional to the read length or absolute.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ErrorLimit {
    Ratio(f64),
    Bases(usize),
}

impl ErrorLimit {
    pub(crate) fn evaluate(&self, key_length: usize) -> usize {
        match self {
            Self::Ratio(r) => (r * key_length as f64).floor() as usize,
            Self::Bases(n) => *n,
        }
    }
}

/// Search parameters as configured by the caller. Budgets expressed as
/// ratios are instantiated per read length into [`EvaluatedParameters`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParameters {
    pub max_error: ErrorLimit,
    /// After the best distance d* is known, explore at most d* + delta.
    pub complete_strata_after_best_nominal: usize,
    pub mapping_mode: MappingMode,
    pub local_alignment: LocalAlignmentPolicy,
    /// Lower bound on read identity; caps the evaluated error budget at
    /// `(1 - min_identity) * key_length`. Zero disables the cap.
    pub min_identity: f64,
    /// Minimum fraction of matching bases a verified global alignment
    /// must carry to be accepted. Zero disables the gate.
    pub alignment_global_min_identity: f64,
    /// Minimum fraction of matching bases a local realignment must
    /// carry to be accepted.
    pub alignment_local_min_identity: f64,
    /// Quick-abandon limit on the total number of matches.
    pub max_matches: usize,
    pub min_key_length: usize,
    /// Region-profile tuning: close a region once its interval holds at
    /// most `region_th` positions; relax the threshold by `dec_factor`
    /// for every backward step past `max_steps`.
    pub region_th: usize,
    pub max_steps: usize,
    pub dec_factor: usize,
    /// Per-region cap on decoded candidate positions.
    pub max_candidates_per_region: usize,
    pub gpu_enabled: bool,
    pub gpu_buffers_per_stage: usize,
    pub gpu_buffer_capacity: usize,
    /// Early-fulfillment hook: when set and it reports the matches as
    /// sufficient, the search ends right after candidates are verified.
    /// Off by default, preserving the non-short-circuiting behavior of
    /// the plain workflow.
    pub fulfilled_hook: Option<fn(&Matches) -> bool>,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            max_error: ErrorLimit::Ratio(0.04),
            complete_strata_after_best_nominal: 1,
            mapping_mode: MappingMode::Fast,
            local_alignment: LocalAlignmentPolicy::IfUnmapped,
            min_identity: 0.0,
            alignment_global_min_identity: 0.0,
            alignment_local_min_identity: 0.40,
            max_matches: 1000,
            min_key_length: 0,
            region_th: 20,
            max_steps: 4,
            dec_factor: 2,
            max_candidates_per_region: 200,
            gpu_enabled: false,
            gpu_buffers_per_stage: 2,
            gpu_buffer_capacity: 4096,
            fulfilled_hook: None,
        }
    }
}

impl SearchParameters {
    pub fn evaluate(&self, key_length: usize) -> EvaluatedParameters {
        let identity_cap = ((1.0 - self.min_identity)
            * key_length as f64)
            .floor() as usize;
        let max_error =
            self.max_error.evaluate(key_length).min(identity_cap);
        EvaluatedParameters::new(
            key_length,
            max_error,
            self.complete_strata_after_best_nominal,
        )
    }
}

/// The parameter block instantiated for one read length.
#[derive(Debug, Copy, Clone, Eq, PartialEq, new)]
pub struct EvaluatedParameters {
    pub key_length: usize,
    pub max_error: usize,
    pub complete_strata_after_best: usize,
}

/// Caps applied while decoding and reporting matches.
#[derive(Debug, Copy, Clone, Eq, PartialEq, new)]
pub struct SelectionParameters {
    pub max_decoded: usize,
    pub min_strata: usize,
    pub min_reported: usize,
    pub max_reported: usize,
}

impl Default for SelectionParameters {
    fn default() -> Self {
        Self {
            max_decoded: 100,
            min_strata: 1,
            min_reported: 1,
            max_reported: 100,
        }
    }
}
