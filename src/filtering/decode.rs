use crate::archive::Archive;
use crate::filtering::FilteringCandidates;
use crate::region_profile::{RegionProfile, RegionStatus};

/// One SA index awaiting translation to a text position, as copied into
/// a decode-stage device buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct DecodeJob {
    pub(crate) sa_idx: usize,
    pub(crate) region_index: usize,
    /// Offset of the originating region within the pattern; subtracted
    /// from the located position to yield the candidate begin.
    pub(crate) pattern_offset: usize,
    pub(crate) source_distance: usize,
}

/// Gather the encoded SA indices of every searchable region, electing
/// the regions that emit candidates and capping each at
/// `max_candidates_per_region`.
pub(crate) fn collect_profile_jobs(
    profile: &mut RegionProfile,
    max_candidates_per_region: usize,
) -> Vec<DecodeJob> {
    let mut jobs = Vec::new();
    for (region_index, region) in
        profile.regions_mut().iter_mut().enumerate()
    {
        if !region.is_searchable() || region.interval.is_empty() {
            continue;
        }
        region.status = RegionStatus::Elected;
        let take = region.interval.len().min(max_candidates_per_region);
        for sa_idx in region.interval.lo..region.interval.lo + take {
            jobs.push(DecodeJob {
                sa_idx,
                region_index,
                pattern_offset: region.begin,
                source_distance: 0,
            });
        }
    }
    jobs
}

impl FilteringCandidates {
    /// Record one located position for its job; candidate begins left of
    /// the text start saturate to zero (clipped later by verification).
    pub(crate) fn apply_decoded_position(
        &mut self,
        text_position: usize,
        job: &DecodeJob,
    ) {
        self.add_position(
            text_position.saturating_sub(job.pattern_offset),
            job.region_index,
            job.source_distance,
        );
    }

    /// Inline (non-buffered) decode: locate every job through the
    /// archive's suffix array.
    pub(crate) fn decode_candidates(
        &mut self,
        archive: &Archive,
        jobs: &[DecodeJob],
    ) {
        for job in jobs {
            let text_position = archive.fm_index_lookup(job.sa_idx);
            self.apply_decoded_position(text_position, job);
        }
    }
}
