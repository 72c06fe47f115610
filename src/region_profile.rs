use log::debug;

use crate::archive::{Archive, SaInterval};
use crate::params::SearchParameters;
use crate::pattern::Pattern;
use crate::util::is_real_base;

/// Region lifecycle within a profile. `Gap` spans wildcard runs the
/// FM-index cannot step over; `Elected` marks regions chosen to emit
/// candidates during decode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegionStatus {
    Standard,
    Unique,
    Elected,
    Gap,
}

/// A maximal pattern slice `[begin, end)` mapped to its SA interval,
/// carrying a unit error budget for the pigeonhole bound.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Region {
    pub begin: usize,
    pub end: usize,
    pub interval: SaInterval,
    pub degree: usize,
    pub status: RegionStatus,
}

impl Region {
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_searchable(&self) -> bool {
        self.status != RegionStatus::Gap
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProfileStrategy {
    Adaptive,
    Boost,
}

/// Decomposition of the pattern into non-overlapping regions, ordered by
/// `begin`. Regions are produced right-to-left (the FM-index extends
/// backward) and reversed on close.
#[derive(Debug)]
pub struct RegionProfile {
    regions: Vec<Region>,
    strategy: ProfileStrategy,
}

impl RegionProfile {
    /// Walk the pattern right-to-left extending each region with
    /// backward FM-index steps until its interval holds at most
    /// `region_th` positions (the threshold relaxes by `dec_factor` for
    /// every step past `max_steps`), the interval empties, a wildcard
    /// interrupts, or the key is exhausted.
    pub fn generate_adaptive(
        archive: &Archive,
        pattern: &Pattern,
        params: &SearchParameters,
    ) -> Self {
        Self::generate(
            archive,
            pattern,
            params.region_th,
            params.max_steps,
            params.dec_factor,
            usize::MAX,
            ProfileStrategy::Adaptive,
        )
    }

    /// Re-profile after a failed pass: a raised closing threshold plus a
    /// cap at half the longest prior region bisects long regions into
    /// more, shorter ones.
    pub fn generate_boost(
        archive: &Archive,
        pattern: &Pattern,
        params: &SearchParameters,
        prior: &Self,
    ) -> Self {
        let longest = prior
            .regions
            .iter()
            .filter(|r| r.is_searchable())
            .map(|r| r.len())
            .max()
            .unwrap_or(pattern.key_length());
        let max_region_len = (longest / 2).max(4);
        Self::generate(
            archive,
            pattern,
            params.region_th.saturating_mul(params.dec_factor),
            params.max_steps,
            params.dec_factor,
            max_region_len,
            ProfileStrategy::Boost,
        )
    }

    fn generate(
        archive: &Archive,
        pattern: &Pattern,
        region_th: usize,
        max_steps: usize,
        dec_factor: usize,
        max_region_len: usize,
        strategy: ProfileStrategy,
    ) -> Self {
        let key = pattern.key();
        let mut regions: Vec<Region> = Vec::new();
        let mut open_end = key.len();
        let mut interval = archive.full_interval();
        let mut threshold = region_th;
        let close = |regions: &mut Vec<Region>,
                         begin: usize,
                         end: usize,
                         interval: SaInterval,
                         status: RegionStatus| {
            if end > begin {
                regions.push(Region {
                    begin,
                    end,
                    interval,
                    degree: usize::from(status != RegionStatus::Gap),
                    status,
                });
            }
        };
        for i in (0..key.len()).rev() {
            if !is_real_base(key[i]) {
                // close whatever is open, then swallow the wildcard run
                close(
                    &mut regions,
                    i + 1,
                    open_end,
                    interval,
                    status_of(interval),
                );
                let mut gap_begin = i;
                while gap_begin > 0 && !is_real_base(key[gap_begin - 1]) {
                    gap_begin -= 1;
                }
                close(
                    &mut regions,
                    gap_begin,
                    i + 1,
                    SaInterval::empty(),
                    RegionStatus::Gap,
                );
                open_end = gap_begin;
                interval = archive.full_interval();
                threshold = region_th;
                continue;
            }
            interval = archive.fm_index_step(interval, key[i]);
            let steps = open_end - i;
            if steps > max_steps {
                threshold = threshold.saturating_mul(dec_factor);
            }
            if interval.len() <= threshold || steps >= max_region_len {
                close(
                    &mut regions,
                    i,
                    open_end,
                    interval,
                    status_of(interval),
                );
                open_end = i;
                interval = archive.full_interval();
                threshold = region_th;
            }
        }
        // tail region left open at the key start keeps its wide interval
        close(&mut regions, 0, open_end, interval, status_of(interval));
        regions.reverse();
        debug!(
            "region profile ({strategy:?}): {} regions, {} searchable",
            regions.len(),
            regions.iter().filter(|r| r.is_searchable()).count()
        );
        Self { regions, strategy }
    }

    pub fn strategy(&self) -> ProfileStrategy {
        self.strategy
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub(crate) fn regions_mut(&mut self) -> &mut [Region] {
        &mut self.regions
    }

    pub fn num_filtered_regions(&self) -> usize {
        self.regions.iter().filter(|r| r.is_searchable()).count()
    }

    /// Sum of unit budgets over searchable regions, the pigeonhole bound
    /// on the complete stratum after exact filtering.
    pub fn error_budget(&self) -> usize {
        self.regions.iter().map(|r| r.degree).sum()
    }

    pub fn total_candidates(&self) -> usize {
        self.regions
            .iter()
            .filter(|r| r.is_searchable())
            .map(|r| r.interval.len())
            .sum()
    }

    pub fn has_searchable_regions(&self) -> bool {
        self.num_filtered_regions() > 0
    }

    /// The exact-match shortcut: one region covering the whole key with
    /// at least one occurrence.
    pub fn whole_key_region(&self, key_length: usize) -> Option<&Region> {
        match self.regions.as_slice() {
            [region]
                if region.begin == 0
                    && region.end == key_length
                    && !region.interval.is_empty() =>
            {
                Some(region)
            }
            _ => None,
        }
    }
}

fn status_of(interval: SaInterval) -> RegionStatus {
    if interval.len() == 1 {
        RegionStatus::Unique
    } else {
        RegionStatus::Standard
    }
}
