use crate::archive::Archive;
use crate::myers::{bpm_scan, BpmMatch};

/// One BPM kernel lane result: best end column and distance of a
/// candidate window, absent when the candidate blew its budget.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DeviceBpmHit {
    pub end: usize,
    pub distance: usize,
}

/// One search's verification workload packed for the BPM kernel: the
/// pattern PEQ table (six 64-bit words per pattern word, one per symbol
/// class) plus the banded text windows to scan.
#[derive(Debug, Clone)]
pub struct BpmDeviceBlock {
    pub peq: Vec<u64>,
    pub key_length: usize,
    pub max_error: usize,
    /// (window begin, window length); begins may be negative, the
    /// device clips against the text bounds.
    pub windows: Vec<(isize, usize)>,
}

/// The device seam of the search pipeline. Buffers are handed over with
/// explicit dispatch calls rather than implicit futures, so every
/// suspension point stays syntactically visible at the stage boundary.
pub trait SearchDevice {
    /// Translate suffix-array indices to text positions.
    fn decode(&self, sa_indices: &[usize]) -> Vec<usize>;
    /// Run the bit-parallel kernel over every window of a block.
    fn bpm(&self, block: &BpmDeviceBlock) -> Vec<Option<DeviceBpmHit>>;
}

/// In-process stand-in for a GPU: runs the same kernels synchronously
/// against the shared archive. The staging behavior of the pipeline is
/// identical either way.
pub struct CpuDevice<'a> {
    archive: &'a Archive,
}

impl<'a> CpuDevice<'a> {
    pub fn new(archive: &'a Archive) -> Self {
        Self { archive }
    }
}

impl SearchDevice for CpuDevice<'_> {
    fn decode(&self, sa_indices: &[usize]) -> Vec<usize> {
        sa_indices
            .iter()
            .map(|&sa_idx| self.archive.fm_index_lookup(sa_idx))
            .collect()
    }

    fn bpm(&self, block: &BpmDeviceBlock) -> Vec<Option<DeviceBpmHit>> {
        block
            .windows
            .iter()
            .map(|&(begin, len)| {
                let (window, _, _) = self.archive.text_slice(begin, len);
                bpm_scan(
                    &block.peq,
                    block.key_length,
                    window,
                    block.max_error,
                )
                .map(|hit| DeviceBpmHit {
                    end: hit.end,
                    distance: hit.distance,
                })
            })
            .collect()
    }
}

pub(crate) fn to_bpm_matches(
    hits: &[Option<DeviceBpmHit>],
) -> Vec<Option<BpmMatch>> {
    hits.iter()
        .map(|hit| {
            hit.map(|h| BpmMatch { end: h.end, distance: h.distance })
        })
        .collect()
}
