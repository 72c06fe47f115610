use crate::archive::{Archive, SaInterval};
use crate::interval_set::IntervalSet;
use crate::util::is_real_base;

const DNA_BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Restricts branching so equivalent edit scripts are walked once: an
/// indel may only follow a consumed column or another indel of the same
/// kind, and alignments never open with one (trailing indels belong to
/// a cheaper, shifted occurrence).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum LastOperation {
    Initial,
    Consumed,
    KeySkip,
    TextSkip,
}

impl LastOperation {
    fn allows_key_skip(self) -> bool {
        matches!(self, Self::Consumed | Self::KeySkip)
    }

    fn allows_text_skip(self) -> bool {
        matches!(self, Self::Consumed | Self::TextSkip)
    }
}

/// Enumerate every SA interval whose text occurrence is within
/// `max_error` edits of `slice`, walking the FM-index backward from the
/// slice end. Wildcard key positions consume any base at no cost.
/// Intervals are recorded with the error count of their path; the true
/// distance is settled later by verification.
pub(crate) fn bounded_search(
    archive: &Archive,
    slice: &[u8],
    max_error: usize,
    out: &mut IntervalSet,
) {
    if slice.is_empty() {
        return;
    }
    recurse(
        archive,
        slice,
        slice.len(),
        0,
        max_error,
        LastOperation::Initial,
        archive.full_interval(),
        out,
    );
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    archive: &Archive,
    slice: &[u8],
    remaining: usize,
    errors: usize,
    max_error: usize,
    last: LastOperation,
    interval: SaInterval,
    out: &mut IntervalSet,
) {
    if interval.is_empty() {
        return;
    }
    if remaining == 0 {
        out.add(interval, errors);
        return;
    }
    let key_base = slice[remaining - 1];
    let wildcard = !is_real_base(key_base);
    for base in DNA_BASES {
        let stepped = archive.fm_index_step(interval, base);
        let cost = usize::from(!wildcard && base != key_base);
        if errors + cost <= max_error {
            recurse(
                archive,
                slice,
                remaining - 1,
                errors + cost,
                max_error,
                LastOperation::Consumed,
                stepped,
                out,
            );
        }
        // text-only column: the occurrence carries an extra base
        if errors < max_error
            && base != key_base
            && last.allows_text_skip()
        {
            recurse(
                archive,
                slice,
                remaining,
                errors + 1,
                max_error,
                LastOperation::TextSkip,
                stepped,
                out,
            );
        }
    }
    // key-only column: the occurrence drops this base
    if errors < max_error && last.allows_key_skip() {
        recurse(
            archive,
            slice,
            remaining - 1,
            errors + 1,
            max_error,
            LastOperation::KeySkip,
            interval,
            out,
        );
    }
}
