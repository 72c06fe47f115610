use crate::matches::CigarOp;
use crate::pattern::Pattern;
use crate::util::{symbol_code, NUM_SYMBOLS};

const WORD_BITS: usize = 64;
const HIGH_BIT: u64 = 1 << (WORD_BITS - 1);

/// Best end column found by the bit-parallel scan.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct BpmMatch {
    /// Exclusive end offset within the scanned text.
    pub(crate) end: usize,
    pub(crate) distance: usize,
}

/// Myers bit-parallel edit-distance scan of `pattern` over `text` with a
/// free text start (one DP column per text symbol, score read at the last
/// pattern row). Returns the minimum-distance end column within
/// `max_error`, preferring the leftmost end on ties, or `None`.
///
/// The scan abandons early once the running score cannot drop back under
/// `max_error` in the remaining columns (it changes by at most one per
/// column).
pub(crate) fn bpm_best_match(
    pattern: &Pattern,
    text: &[u8],
    max_error: usize,
) -> Option<BpmMatch> {
    bpm_scan(pattern.peq_table(), pattern.key_length(), text, max_error)
}

/// The scan core over a raw PEQ table (`NUM_SYMBOLS` words per pattern
/// word), the layout the BPM device buffers carry.
pub(crate) fn bpm_scan(
    peq: &[u64],
    key_length: usize,
    text: &[u8],
    max_error: usize,
) -> Option<BpmMatch> {
    let m = key_length;
    if m == 0 || text.is_empty() {
        return None;
    }
    let num_words = peq.len() / NUM_SYMBOLS;
    let last_word = num_words - 1;
    let last_bit = 1u64 << ((m - 1) % WORD_BITS);
    let mut pv = vec![u64::MAX; num_words];
    let mut mv = vec![0u64; num_words];
    let mut score = m;
    let mut best: Option<BpmMatch> = None;
    for (column, &symbol) in text.iter().enumerate() {
        let code = symbol_code(symbol);
        let mut hin: i8 = 0;
        let mut score_delta: i8 = 0;
        for word in 0..num_words {
            let eq = peq[word * NUM_SYMBOLS + code];
            let pv_w = pv[word];
            let mv_w = mv[word];
            let xv = eq | mv_w;
            let eq_in = if hin < 0 { eq | 1 } else { eq };
            let xh = (((eq_in & pv_w).wrapping_add(pv_w)) ^ pv_w) | eq_in;
            let mut ph = mv_w | !(xh | pv_w);
            let mut mh = pv_w & xh;
            if word == last_word {
                score_delta = if ph & last_bit != 0 {
                    1
                } else if mh & last_bit != 0 {
                    -1
                } else {
                    0
                };
            }
            let hout: i8 = if ph & HIGH_BIT != 0 {
                1
            } else if mh & HIGH_BIT != 0 {
                -1
            } else {
                0
            };
            ph <<= 1;
            mh <<= 1;
            if hin < 0 {
                mh |= 1;
            } else if hin > 0 {
                ph |= 1;
            }
            pv[word] = mh | !(xv | ph);
            mv[word] = ph & xv;
            hin = hout;
        }
        score = (score as isize + score_delta as isize) as usize;
        if score <= max_error
            && best.map_or(true, |b| score < b.distance)
        {
            best = Some(BpmMatch { end: column + 1, distance: score });
        }
        let remaining = text.len() - column - 1;
        if score > max_error + remaining {
            break;
        }
    }
    best
}

/// Alignment of the whole key against a suffix-anchored window.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct WindowAlignment {
    /// Begin offset within the window.
    pub(crate) begin: usize,
    pub(crate) distance: usize,
    pub(crate) ops: Vec<CigarOp>,
}

/// Dynamic-programming traceback over the verification window, the
/// error-banded `[begin - k, end]` slice the candidate was fetched
/// with. The text start is free, the alignment must end at the window
/// end and consume the entire key. Produces the run-length CIGAR and
/// the exact begin column.
pub(crate) fn window_traceback(
    key: &[u8],
    window: &[u8],
) -> Option<WindowAlignment> {
    let m = key.len();
    let n = window.len();
    if m == 0 {
        return None;
    }
    let width = n + 1;
    let mut dp = vec![0u32; (m + 1) * width];
    for i in 0..=m {
        dp[i * width] = i as u32;
    }
    // row 0 stays zero: free text start
    for i in 1..=m {
        for j in 1..=n {
            let sub_cost =
                !Pattern::base_matches(key[i - 1], window[j - 1]) as u32;
            let diag = dp[(i - 1) * width + (j - 1)] + sub_cost;
            let up = dp[(i - 1) * width + j] + 1;
            let left = dp[i * width + (j - 1)] + 1;
            dp[i * width + j] = diag.min(up).min(left);
        }
    }
    let distance = dp[m * width + n] as usize;

    let mut raw_ops: Vec<CigarOp> = Vec::with_capacity(m + 2);
    let push_run = |ops: &mut Vec<CigarOp>, op: CigarOp| {
        // runs are merged as they are emitted (walking right to left)
        match (ops.last_mut(), op) {
            (Some(CigarOp::Eq(n)), CigarOp::Eq(x)) => *n += x,
            (Some(CigarOp::Mismatch(n)), CigarOp::Mismatch(x)) => *n += x,
            (Some(CigarOp::Ins(n)), CigarOp::Ins(x)) => *n += x,
            (Some(CigarOp::Del(n)), CigarOp::Del(x)) => *n += x,
            (_, op) => ops.push(op),
        }
    };
    let (mut i, mut j) = (m, n);
    while i > 0 {
        let here = dp[i * width + j];
        if j > 0 {
            let matched = Pattern::base_matches(key[i - 1], window[j - 1]);
            let diag = dp[(i - 1) * width + (j - 1)];
            if matched && here == diag {
                push_run(&mut raw_ops, CigarOp::Eq(1));
                i -= 1;
                j -= 1;
                continue;
            }
            if !matched && here == diag + 1 {
                push_run(&mut raw_ops, CigarOp::Mismatch(1));
                i -= 1;
                j -= 1;
                continue;
            }
        }
        if here == dp[(i - 1) * width + j] + 1 {
            push_run(&mut raw_ops, CigarOp::Ins(1));
            i -= 1;
            continue;
        }
        debug_assert!(j > 0 && here == dp[i * width + (j - 1)] + 1);
        push_run(&mut raw_ops, CigarOp::Del(1));
        j -= 1;
    }
    raw_ops.reverse();
    Some(WindowAlignment { begin: j, distance, ops: raw_ops })
}
