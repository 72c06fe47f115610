use log::debug;

use crate::archive::Archive;
use crate::filtering::{AlignmentStatus, FilteringCandidates};
use crate::matches::{CigarOp, Matches};
use crate::myers::{bpm_best_match, window_traceback, BpmMatch};
use crate::pattern::Pattern;

const SWG_MATCH: i64 = 1;
const SWG_MISMATCH: i64 = -4;
const SWG_GAP_OPEN: i64 = -6;
const SWG_GAP_EXTEND: i64 = -1;

/// Smith-Waterman-Gotoh score of a finished trace, the `score` carried
/// on every reported match.
pub(crate) fn swg_score(ops: &[CigarOp]) -> i64 {
    ops.iter()
        .map(|op| match op {
            CigarOp::Eq(n) => SWG_MATCH * *n as i64,
            CigarOp::Mismatch(n) => SWG_MISMATCH * *n as i64,
            CigarOp::Ins(n) | CigarOp::Del(n) => {
                SWG_GAP_OPEN + SWG_GAP_EXTEND * (*n as i64 - 1)
            }
            CigarOp::SoftClip(_) => 0,
        })
        .sum()
}

/// One candidate region packed for the BPM kernel: the banded text
/// window to scan.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct VerifyJob {
    pub(crate) region_index: usize,
    pub(crate) window_begin: isize,
    pub(crate) window_len: usize,
}

impl FilteringCandidates {
    /// Pack every pending region into a verification job; the window is
    /// the candidate span widened by the error band on both sides.
    pub(crate) fn verify_jobs(&self, band: usize) -> Vec<VerifyJob> {
        self.regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == AlignmentStatus::Pending)
            .map(|(region_index, r)| VerifyJob {
                region_index,
                window_begin: r.text_begin as isize - band as isize,
                window_len: (r.text_end - r.text_begin) + 2 * band,
            })
            .collect()
    }

    /// Settle one candidate with its BPM result: discarded when over
    /// budget or under the global identity gate, otherwise traced back
    /// and promoted to a match. Duplicates of already-accepted matches
    /// are counted and suppressed.
    pub(crate) fn apply_bpm_result(
        &mut self,
        archive: &Archive,
        pattern: &Pattern,
        job: &VerifyJob,
        result: Option<BpmMatch>,
        global_min_identity: f64,
        matches: &mut Matches,
    ) {
        let (window, window_begin, clipped) =
            archive.text_slice(job.window_begin, job.window_len);
        if clipped {
            self.counters.clipped_slices += 1;
        }
        let hit = match result {
            Some(hit) => hit,
            None => {
                self.regions[job.region_index].status =
                    AlignmentStatus::Discarded;
                self.counters.discarded += 1;
                return;
            }
        };
        let alignment = match window_traceback(pattern.key(), &window[..hit.end])
        {
            Some(alignment) => alignment,
            None => {
                self.regions[job.region_index].status =
                    AlignmentStatus::Discarded;
                self.counters.discarded += 1;
                return;
            }
        };
        debug_assert_eq!(alignment.distance, hit.distance);
        let matched = alignment
            .ops
            .iter()
            .map(|op| match op {
                CigarOp::Eq(n) => *n as usize,
                _ => 0,
            })
            .sum::<usize>();
        if (matched as f64)
            < global_min_identity * pattern.key_length() as f64
        {
            self.regions[job.region_index].status =
                AlignmentStatus::Discarded;
            self.counters.discarded += 1;
            return;
        }
        let text_position = window_begin + alignment.begin;
        let score = swg_score(&alignment.ops);
        let region = &mut self.regions[job.region_index];
        region.status = AlignmentStatus::Accepted;
        region.distance = Some(alignment.distance);
        region.cigar = alignment.ops.clone();
        if !matches.add_match_trace(
            text_position,
            pattern.strand(),
            alignment.distance,
            &alignment.ops,
            score,
        ) {
            self.counters.duplicates += 1;
        }
    }

    /// Inline (non-buffered) verification of every pending candidate,
    /// scanning each banded window with the bit-parallel verifier.
    pub(crate) fn verify_candidates(
        &mut self,
        archive: &Archive,
        pattern: &Pattern,
        current_max_error: usize,
        global_min_identity: f64,
        matches: &mut Matches,
    ) {
        let jobs = self.verify_jobs(current_max_error);
        for job in jobs {
            let (window, _, clipped) =
                archive.text_slice(job.window_begin, job.window_len);
            if clipped {
                debug!(
                    "clipped verification window at {}",
                    job.window_begin
                );
            }
            let result = bpm_best_match(pattern, window, current_max_error);
            self.apply_bpm_result(
                archive,
                pattern,
                &job,
                result,
                global_min_identity,
                matches,
            );
        }
    }

    /// Local realignment of discarded candidates: best-scoring local
    /// segment with the pattern overhangs soft-clipped, kept when it
    /// covers at least `min_identity` of the key.
    pub(crate) fn verify_local(
        &mut self,
        archive: &Archive,
        pattern: &Pattern,
        min_identity: f64,
        band: usize,
        matches: &mut Matches,
    ) {
        let discarded = self
            .regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == AlignmentStatus::Discarded)
            .map(|(i, r)| {
                (i, r.text_begin as isize - band as isize,
                 (r.text_end - r.text_begin) + 2 * band)
            })
            .collect::<Vec<(usize, isize, usize)>>();
        for (region_index, window_begin, window_len) in discarded {
            let (window, actual_begin, _) =
                archive.text_slice(window_begin, window_len);
            let local = match local_align(pattern.key(), window) {
                Some(local) => local,
                None => continue,
            };
            let matched = local
                .ops
                .iter()
                .map(|op| match op {
                    CigarOp::Eq(n) => *n as usize,
                    _ => 0,
                })
                .sum::<usize>();
            if (matched as f64)
                < min_identity * pattern.key_length() as f64
            {
                continue;
            }
            let region = &mut self.regions[region_index];
            region.status = AlignmentStatus::Accepted;
            region.distance = Some(local.distance);
            region.cigar = local.ops.clone();
            if !matches.add_match_trace(
                actual_begin + local.text_begin,
                pattern.strand(),
                local.distance,
                &local.ops,
                swg_score(&local.ops),
            ) {
                self.counters.duplicates += 1;
            }
        }
    }
}

struct LocalAlignment {
    text_begin: usize,
    distance: usize,
    ops: Vec<CigarOp>,
}

/// Plain Smith-Waterman over the window with unit scores, traced back
/// from the best cell; unaligned key overhangs become soft-clips.
fn local_align(key: &[u8], window: &[u8]) -> Option<LocalAlignment> {
    let m = key.len();
    let n = window.len();
    if m == 0 || n == 0 {
        return None;
    }
    let width = n + 1;
    let mut dp = vec![0i32; (m + 1) * width];
    let mut best = (0i32, 0usize, 0usize);
    for i in 1..=m {
        for j in 1..=n {
            let diag = dp[(i - 1) * width + (j - 1)]
                + if Pattern::base_matches(key[i - 1], window[j - 1]) {
                    1
                } else {
                    -1
                };
            let up = dp[(i - 1) * width + j] - 1;
            let left = dp[i * width + (j - 1)] - 1;
            let score = diag.max(up).max(left).max(0);
            dp[i * width + j] = score;
            if score > best.0 {
                best = (score, i, j);
            }
        }
    }
    if best.0 <= 0 {
        return None;
    }
    let (_, end_i, end_j) = best;
    let mut ops: Vec<CigarOp> = Vec::new();
    let push_run = |ops: &mut Vec<CigarOp>, op: CigarOp| match (
        ops.last_mut(),
        op,
    ) {
        (Some(CigarOp::Eq(n)), CigarOp::Eq(x)) => *n += x,
        (Some(CigarOp::Mismatch(n)), CigarOp::Mismatch(x)) => *n += x,
        (Some(CigarOp::Ins(n)), CigarOp::Ins(x)) => *n += x,
        (Some(CigarOp::Del(n)), CigarOp::Del(x)) => *n += x,
        (_, op) => ops.push(op),
    };
    if end_i < m {
        push_run(&mut ops, CigarOp::SoftClip((m - end_i) as u32));
    }
    let (mut i, mut j) = (end_i, end_j);
    let mut distance = 0usize;
    while i > 0 && j > 0 && dp[i * width + j] > 0 {
        let here = dp[i * width + j];
        let matched = Pattern::base_matches(key[i - 1], window[j - 1]);
        let diag = dp[(i - 1) * width + (j - 1)];
        if here == diag + if matched { 1 } else { -1 } {
            if matched {
                push_run(&mut ops, CigarOp::Eq(1));
            } else {
                push_run(&mut ops, CigarOp::Mismatch(1));
                distance += 1;
            }
            i -= 1;
            j -= 1;
        } else if here == dp[(i - 1) * width + j] - 1 {
            push_run(&mut ops, CigarOp::Ins(1));
            distance += 1;
            i -= 1;
        } else {
            push_run(&mut ops, CigarOp::Del(1));
            distance += 1;
            j -= 1;
        }
    }
    if i > 0 {
        push_run(&mut ops, CigarOp::SoftClip(i as u32));
    }
    ops.reverse();
    Some(LocalAlignment { text_begin: j, distance, ops })
}

#[cfg(test)]
mod verify_tests {
    use similar_asserts::assert_eq;

    use super::{local_align, swg_score};
    use crate::archive::Archive;
    use crate::filtering::{AlignmentStatus, FilteringCandidates};
    use crate::matches::{cigar_string, CigarOp, Matches};
    use crate::params::{ErrorLimit, SearchParameters};
    use crate::pattern::Pattern;
    use crate::util::Strand;

    fn fixture(
        text: &str,
        read: &[u8],
        max_error: usize,
    ) -> (Archive, Pattern) {
        let archive = Archive::from_sequences(
            &[("ref".to_string(), text.as_bytes())],
            false,
            false,
        )
        .unwrap();
        let mut params = SearchParameters::default();
        params.max_error = ErrorLimit::Bases(max_error);
        let pattern =
            Pattern::prepare(read, &params, Strand::Forward).unwrap();
        (archive, pattern)
    }

    #[test]
    fn test_verify_accepts_and_discards() {
        let (archive, pattern) = fixture("ACGTACGTTTTT", b"ACCT", 1);
        let mut candidates = FilteringCandidates::new();
        candidates.add_position(0, 0, 0);
        candidates.add_position(8, 0, 0);
        candidates.compact_positions(1, 4);
        let mut matches = Matches::new();
        candidates.verify_candidates(&archive, &pattern, 1, 0.0, &mut matches);
        assert_eq!(matches.num_matches(), 1);
        assert_eq!(candidates.counters().discarded, 1);
        let trace = &matches.traces()[0];
        assert_eq!(trace.text_position, 0);
        assert_eq!(trace.distance, 1);
        assert_eq!(cigar_string(matches.cigar_of(trace)), "2=1X1=");
    }

    #[test]
    fn test_global_identity_gate_discards() {
        let (archive, pattern) = fixture("ACGTACGTTTTT", b"ACCT", 1);
        let mut candidates = FilteringCandidates::new();
        candidates.add_position(0, 0, 0);
        candidates.compact_positions(1, 4);
        let mut matches = Matches::new();
        // 3 of 4 bases match, below a 0.9 identity floor
        candidates.verify_candidates(
            &archive, &pattern, 1, 0.9, &mut matches,
        );
        assert_eq!(matches.num_matches(), 0);
        assert_eq!(candidates.counters().discarded, 1);
    }

    #[test]
    fn test_verify_dedups_merged_groups() {
        let (archive, pattern) = fixture("AAAAAAAAAA", b"AAAA", 1);
        let mut candidates = FilteringCandidates::new();
        // two begins inside one band-merged group resolve to one match
        candidates.add_position(2, 0, 0);
        candidates.add_position(3, 0, 0);
        candidates.compact_positions(1, 4);
        assert_eq!(candidates.num_regions(), 1);
        let mut matches = Matches::new();
        candidates.verify_candidates(&archive, &pattern, 1, 0.0, &mut matches);
        assert_eq!(matches.num_matches(), 1);
    }

    #[test]
    fn test_verify_clips_out_of_bounds_windows() {
        let (archive, pattern) = fixture("ACGT", b"ACGT", 1);
        let mut candidates = FilteringCandidates::new();
        candidates.add_position(0, 0, 0);
        candidates.compact_positions(1, 4);
        let mut matches = Matches::new();
        candidates.verify_candidates(&archive, &pattern, 1, 0.0, &mut matches);
        assert_eq!(matches.num_matches(), 1);
        assert_eq!(matches.traces()[0].text_position, 0);
    }

    #[test]
    fn test_swg_score() {
        let ops = [CigarOp::Eq(10), CigarOp::Mismatch(1), CigarOp::Ins(2)];
        assert_eq!(swg_score(&ops), 10 - 4 - 7);
    }

    #[test]
    fn test_local_align_soft_clips_overhangs() {
        let local = local_align(b"GGGGACGTACGT", b"TTACGTACGTTT").unwrap();
        let rendered = cigar_string(&local.ops);
        assert_eq!(rendered, "4S8=");
        assert_eq!(local.text_begin, 2);
        assert_eq!(local.distance, 0);
    }
}
