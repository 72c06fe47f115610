use log::debug;

use crate::archive::Archive;
use crate::archive_search::ArchiveSearch;
use crate::matches::MappedMatch;
use crate::params::{SearchParameters, SelectionParameters};
use crate::pipeline::device::{CpuDevice, SearchDevice};
use crate::pipeline::stage::{
    DecodeBuffer, ProfileBuffer, SearchStage, VerifyBuffer,
};

pub mod device;
mod stage;

/// The three-stage conveyor: Region-Profile, Decode-Candidates,
/// Verify-Candidates, each a ring of buffers dispatched through the
/// device seam. Searches flow strictly forward; back-pressure from a
/// full stage drains the downstream stages before the producer retries.
///
/// Per-read results land in batch order; across reads only the
/// within-buffer order is preserved, matching the inline path only at
/// the granularity of whole reads.
pub struct SearchPipeline<'a> {
    archive: &'a Archive,
    params: &'a SearchParameters,
    device: Box<dyn SearchDevice + 'a>,
    profile_stage: SearchStage<ProfileBuffer<'a>>,
    decode_stage: SearchStage<DecodeBuffer<'a>>,
    verify_stage: SearchStage<VerifyBuffer<'a>>,
}

impl<'a> SearchPipeline<'a> {
    pub fn new(archive: &'a Archive, params: &'a SearchParameters) -> Self {
        Self::with_device(
            archive,
            params,
            Box::new(CpuDevice::new(archive)),
        )
    }

    /// Same pipeline against a caller-provided device implementation.
    pub fn with_device(
        archive: &'a Archive,
        params: &'a SearchParameters,
        device: Box<dyn SearchDevice + 'a>,
    ) -> Self {
        let num_buffers = params.gpu_buffers_per_stage.max(2);
        let capacity = params.gpu_buffer_capacity.max(1);
        Self {
            archive,
            params,
            device,
            profile_stage: SearchStage::new(num_buffers, capacity),
            decode_stage: SearchStage::new(num_buffers, capacity),
            verify_stage: SearchStage::new(num_buffers, capacity),
        }
    }

    /// Run a batch of reads through the staged path. Preparation
    /// failures yield empty result rows, like the inline path.
    pub fn map_batch<R: AsRef<[u8]>>(
        &mut self,
        reads: &[R],
        selection: &SelectionParameters,
    ) -> Vec<Vec<MappedMatch>> {
        let mut results: Vec<Vec<MappedMatch>> =
            vec![Vec::new(); reads.len()];
        for (read_idx, read) in reads.iter().enumerate() {
            let mut search = ArchiveSearch::new(self.archive, self.params);
            search.set_tag(read_idx);
            if let Err(e) = search.prepare(read.as_ref()) {
                debug!("read {read_idx} unmapped at preparation: {e}");
            }
            let mut pending = Some(search);
            while let Some(search) = pending.take() {
                match self.profile_stage.send(search, self.device.as_ref())
                {
                    Ok(()) => {}
                    Err(rejected) => {
                        self.drain_profile_stage(selection, &mut results);
                        pending = Some(rejected);
                    }
                }
            }
        }
        self.drain_profile_stage(selection, &mut results);
        debug_assert!(self.profile_stage.retrieve_finished());
        debug_assert!(self.decode_stage.retrieve_finished());
        debug_assert!(self.verify_stage.retrieve_finished());
        results
    }

    fn drain_profile_stage(
        &mut self,
        selection: &SelectionParameters,
        results: &mut Vec<Vec<MappedMatch>>,
    ) {
        while let Some(search) =
            self.profile_stage.retrieve_next(self.device.as_ref())
        {
            let mut pending = Some(search);
            while let Some(search) = pending.take() {
                match self.decode_stage.send(search, self.device.as_ref())
                {
                    Ok(()) => {}
                    Err(rejected) => {
                        self.drain_decode_stage(selection, results);
                        pending = Some(rejected);
                    }
                }
            }
        }
        self.drain_decode_stage(selection, results);
    }

    fn drain_decode_stage(
        &mut self,
        selection: &SelectionParameters,
        results: &mut Vec<Vec<MappedMatch>>,
    ) {
        while let Some(search) =
            self.decode_stage.retrieve_next(self.device.as_ref())
        {
            let mut pending = Some(search);
            while let Some(search) = pending.take() {
                match self.verify_stage.send(search, self.device.as_ref())
                {
                    Ok(()) => {}
                    Err(rejected) => {
                        self.drain_verify_stage(selection, results);
                        pending = Some(rejected);
                    }
                }
            }
        }
        self.drain_verify_stage(selection, results);
    }

    fn drain_verify_stage(
        &mut self,
        selection: &SelectionParameters,
        results: &mut Vec<Vec<MappedMatch>>,
    ) {
        while let Some(mut search) =
            self.verify_stage.retrieve_next(self.device.as_ref())
        {
            search.stepwise_finish();
            let row = search.tag();
            results[row] = search.select_matches(selection);
        }
    }
}
