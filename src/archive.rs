use bio::alphabets::dna::revcomp;
use bio::alphabets::Alphabet;
use bio::data_structures::bwt::{bwt, less, Less, Occ, BWT};
use bio::data_structures::fmindex::{FMIndex, FMIndexable};
use bio::data_structures::suffix_array::{suffix_array, RawSuffixArray};
use itertools::Itertools;

use crate::errs::{MapError, MapResult};
use crate::util::{Strand, SENTINEL, SEPARATOR};

/// Half-open range `[lo, hi)` of suffix-array positions whose suffixes
/// share a common prefix.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SaInterval {
    pub lo: usize,
    pub hi: usize,
}

impl SaInterval {
    pub(crate) fn empty() -> Self {
        Self { lo: 0, hi: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.hi.saturating_sub(self.lo)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hi <= self.lo
    }
}

/// A text position resolved to its sequence of origin.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SequenceLocation {
    pub name: String,
    pub offset: usize,
    pub direction: Strand,
}

#[derive(Debug, Clone)]
struct ContigSpan {
    name: String,
    begin: usize,
    end: usize,
    direction: Strand,
}

/// The pre-built index the search runs against: encoded text, FM-index
/// over its BWT, suffix array for locate, and the locator spans mapping
/// text offsets back to named sequences.
///
/// The text is laid out as the contig sequences joined by `$` separators
/// with a terminal `#` sentinel; when `indexed_complement` is set the
/// reverse complement of every contig follows the forward copies and the
/// locator projects those spans back onto forward coordinates.
#[derive(Debug)]
pub struct Archive {
    text: Vec<u8>,
    sa: RawSuffixArray,
    fm: FMIndex<BWT, Less, Occ>,
    spans: Vec<ContigSpan>,
    indexed_complement: bool,
    colorspace: bool,
}

impl Archive {
    pub fn from_sequences<S: AsRef<[u8]>>(
        sequences: &[(String, S)],
        indexed_complement: bool,
        colorspace: bool,
    ) -> MapResult<Self> {
        if sequences.is_empty()
            || sequences.iter().all(|(_, s)| s.as_ref().is_empty())
        {
            return Err(MapError::EmptyArchive);
        }
        if !sequences.iter().map(|(name, _)| name).all_unique() {
            let dup = sequences
                .iter()
                .map(|(name, _)| name)
                .duplicates()
                .next()
                .expect("non-unique names have a duplicate")
                .to_owned();
            return Err(MapError::DuplicateSequenceName(dup));
        }
        let mut text = Vec::new();
        let mut spans = Vec::new();
        for (name, seq) in sequences {
            let begin = text.len();
            text.extend_from_slice(seq.as_ref());
            spans.push(ContigSpan {
                name: name.clone(),
                begin,
                end: text.len(),
                direction: Strand::Forward,
            });
            text.push(SEPARATOR);
        }
        if indexed_complement {
            for (name, seq) in sequences {
                let begin = text.len();
                text.extend_from_slice(&revcomp(seq.as_ref()));
                spans.push(ContigSpan {
                    name: name.clone(),
                    begin,
                    end: text.len(),
                    direction: Strand::Reverse,
                });
                text.push(SEPARATOR);
            }
        }
        text.push(SENTINEL);

        let alphabet = Alphabet::new(b"#$ACGTN");
        let sa = suffix_array(&text);
        let bwt = bwt(&text, &sa);
        let less = less(&bwt, &alphabet);
        let occ = Occ::new(&bwt, 16, &alphabet);
        let fm = FMIndex::new(bwt, less, occ);
        Ok(Self { text, sa, fm, spans, indexed_complement, colorspace })
    }

    pub fn indexed_complement(&self) -> bool {
        self.indexed_complement
    }

    pub fn colorspace(&self) -> bool {
        self.colorspace
    }

    pub fn text_len(&self) -> usize {
        self.text.len()
    }

    /// The interval covering the whole suffix array, the starting point
    /// of every backward search.
    pub fn full_interval(&self) -> SaInterval {
        SaInterval { lo: 0, hi: self.text.len() }
    }

    /// One backward-extension step of the FM-index, prepending `base` to
    /// the string the interval stands for.
    #[inline]
    pub fn fm_index_step(&self, iv: SaInterval, base: u8) -> SaInterval {
        if iv.is_empty() {
            return SaInterval::empty();
        }
        let less = self.fm.less(base);
        let lo =
            less + if iv.lo > 0 { self.fm.occ(iv.lo - 1, base) } else { 0 };
        let hi = less + self.fm.occ(iv.hi - 1, base);
        SaInterval { lo, hi }
    }

    /// Suffix-array locate.
    #[inline]
    pub fn fm_index_lookup(&self, sa_idx: usize) -> usize {
        self.sa[sa_idx]
    }

    /// Backward search of a whole slice; the slice must hold only real
    /// bases.
    pub fn exact_interval(&self, slice: &[u8]) -> SaInterval {
        let mut iv = self.full_interval();
        for &base in slice.iter().rev() {
            iv = self.fm_index_step(iv, base);
            if iv.is_empty() {
                break;
            }
        }
        iv
    }

    /// Fetch `[begin, begin + len)` clipped to the text bounds. Returns
    /// the clipped slice, its actual begin, and whether clipping was
    /// applied (the `TextOutOfBounds` recovery of the filtering layer).
    pub fn text_slice(&self, begin: isize, len: usize) -> (&[u8], usize, bool) {
        let clipped_begin = begin.max(0) as usize;
        let end = clipped_begin.saturating_add(len).min(self.text.len());
        let clipped_begin = clipped_begin.min(end);
        let clipped =
            begin < 0 || (begin as usize).saturating_add(len) > self.text.len();
        (&self.text[clipped_begin..end], clipped_begin, clipped)
    }

    /// Resolve a text offset to its contig. Reverse-direction spans
    /// (indexed complement) are projected onto forward coordinates of
    /// the base the offset points at; the caller adjusts match begins by
    /// the effective alignment length.
    pub fn locator_map(&self, pos: usize) -> MapResult<SequenceLocation> {
        let idx = self.spans.partition_point(|span| span.end <= pos);
        let span = self
            .spans
            .get(idx)
            .filter(|span| pos >= span.begin && pos < span.end)
            .ok_or(MapError::TextOutOfBounds {
                pos,
                len: self.text.len(),
            })?;
        let offset = match span.direction {
            Strand::Forward => pos - span.begin,
            Strand::Reverse => span.end - 1 - pos,
        };
        Ok(SequenceLocation {
            name: span.name.clone(),
            offset,
            direction: span.direction,
        })
    }
}
