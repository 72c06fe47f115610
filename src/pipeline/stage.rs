use crate::archive_search::ArchiveSearch;
use crate::pipeline::device::{
    to_bpm_matches, BpmDeviceBlock, DeviceBpmHit, SearchDevice,
};

/// A stage buffer moves through two phases: filled while sending, fixed
/// while its searches are handed back out.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum StagePhase {
    Sending,
    Retrieving,
}

/// Storage behavior of one buffer in a stage ring: occupancy
/// accounting, the device copy on push, the kernel dispatch, and the
/// result application on take.
pub(crate) trait StageBuffer {
    type Search;
    fn new(capacity: usize) -> Self;
    fn clear(&mut self);
    fn is_empty(&self) -> bool;
    fn num_searches(&self) -> usize;
    fn used(&self) -> usize;
    fn capacity(&self) -> usize;
    fn occupancy_of(search: &Self::Search) -> usize;
    fn push(&mut self, search: Self::Search);
    fn dispatch(&mut self, device: &dyn SearchDevice);
    fn take(&mut self, idx: usize) -> Self::Search;
}

/// A ring of `B >= 2` buffers implementing the per-stage contract:
/// `send` enqueues into the current buffer or rotates forward,
/// returning the search when every buffer is full (the caller must then
/// drain); retrieval dispatches the in-flight buffer and yields
/// searches in FIFO order per buffer, buffer `i` completing before
/// `i + 1` is drained.
pub(crate) struct SearchStage<B> {
    buffers: Vec<B>,
    phase: StagePhase,
    current_buffer: usize,
    next_search: usize,
}

impl<B: StageBuffer> SearchStage<B> {
    pub(crate) fn new(num_buffers: usize, capacity: usize) -> Self {
        let num_buffers = num_buffers.max(2);
        Self {
            buffers: (0..num_buffers).map(|_| B::new(capacity)).collect(),
            phase: StagePhase::Sending,
            current_buffer: 0,
            next_search: 0,
        }
    }

    /// Enqueue a search, copying its stage inputs into the buffer. An
    /// oversized search is accepted by an empty buffer rather than
    /// rejected forever. `Err` hands the search back: flush by draining.
    pub(crate) fn send(
        &mut self,
        search: B::Search,
        device: &dyn SearchDevice,
    ) -> Result<(), B::Search> {
        debug_assert_eq!(self.phase, StagePhase::Sending);
        loop {
            let occupancy = B::occupancy_of(&search);
            let num_buffers = self.buffers.len();
            let buffer = &mut self.buffers[self.current_buffer];
            if buffer.is_empty()
                || buffer.used() + occupancy <= buffer.capacity()
            {
                buffer.push(search);
                return Ok(());
            }
            if self.current_buffer + 1 < num_buffers {
                buffer.dispatch(device);
                self.current_buffer += 1;
            } else {
                return Err(search);
            }
        }
    }

    fn retrieve_begin(&mut self, device: &dyn SearchDevice) {
        self.buffers[self.current_buffer].dispatch(device);
        self.phase = StagePhase::Retrieving;
        self.current_buffer = 0;
        self.next_search = 0;
    }

    /// Yield the next search in order; switches the stage into the
    /// retrieving phase on first call and resets to sending once every
    /// buffer is drained.
    pub(crate) fn retrieve_next(
        &mut self,
        device: &dyn SearchDevice,
    ) -> Option<B::Search> {
        if self.phase == StagePhase::Sending {
            self.retrieve_begin(device);
        }
        loop {
            let buffer = &mut self.buffers[self.current_buffer];
            if self.next_search < buffer.num_searches() {
                let search = buffer.take(self.next_search);
                self.next_search += 1;
                return Some(search);
            }
            if self.current_buffer + 1 == self.buffers.len() {
                self.reset();
                return None;
            }
            self.current_buffer += 1;
            self.next_search = 0;
        }
    }

    pub(crate) fn retrieve_finished(&self) -> bool {
        self.phase == StagePhase::Sending
    }

    fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
        self.phase = StagePhase::Sending;
        self.current_buffer = 0;
        self.next_search = 0;
    }
}

/// Stage 1: region profiles are generated at dispatch, one slot per
/// search.
pub(crate) struct ProfileBuffer<'a> {
    searches: Vec<Option<ArchiveSearch<'a>>>,
    capacity: usize,
}

impl<'a> StageBuffer for ProfileBuffer<'a> {
    type Search = ArchiveSearch<'a>;

    fn new(capacity: usize) -> Self {
        Self { searches: Vec::new(), capacity }
    }

    fn clear(&mut self) {
        self.searches.clear();
    }

    fn is_empty(&self) -> bool {
        self.searches.is_empty()
    }

    fn num_searches(&self) -> usize {
        self.searches.len()
    }

    fn used(&self) -> usize {
        self.searches.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn occupancy_of(_search: &ArchiveSearch<'a>) -> usize {
        1
    }

    fn push(&mut self, search: ArchiveSearch<'a>) {
        self.searches.push(Some(search));
    }

    fn dispatch(&mut self, _device: &dyn SearchDevice) {
        for slot in &mut self.searches {
            slot.as_mut()
                .expect("profile slots are filled until taken")
                .stepwise_region_profile();
        }
    }

    fn take(&mut self, idx: usize) -> ArchiveSearch<'a> {
        self.searches[idx].take().expect("search taken once")
    }
}

/// Stage 2: the encoded SA indices of every queued search, located in
/// one device batch.
pub(crate) struct DecodeBuffer<'a> {
    searches: Vec<Option<ArchiveSearch<'a>>>,
    spans: Vec<(usize, usize)>,
    sa_indices: Vec<usize>,
    positions: Vec<usize>,
    capacity: usize,
}

impl<'a> StageBuffer for DecodeBuffer<'a> {
    type Search = ArchiveSearch<'a>;

    fn new(capacity: usize) -> Self {
        Self {
            searches: Vec::new(),
            spans: Vec::new(),
            sa_indices: Vec::new(),
            positions: Vec::new(),
            capacity,
        }
    }

    fn clear(&mut self) {
        self.searches.clear();
        self.spans.clear();
        self.sa_indices.clear();
        self.positions.clear();
    }

    fn is_empty(&self) -> bool {
        self.searches.is_empty()
    }

    fn num_searches(&self) -> usize {
        self.searches.len()
    }

    fn used(&self) -> usize {
        self.sa_indices.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn occupancy_of(search: &ArchiveSearch<'a>) -> usize {
        search.num_decode_jobs()
    }

    fn push(&mut self, search: ArchiveSearch<'a>) {
        let offset = self.sa_indices.len();
        search.append_decode_indices(&mut self.sa_indices);
        self.spans.push((offset, self.sa_indices.len() - offset));
        self.searches.push(Some(search));
    }

    fn dispatch(&mut self, device: &dyn SearchDevice) {
        self.positions = device.decode(&self.sa_indices);
    }

    fn take(&mut self, idx: usize) -> ArchiveSearch<'a> {
        let (offset, len) = self.spans[idx];
        let mut search = self.searches[idx].take().expect("taken once");
        search.stepwise_decode_retrieve(
            &self.positions[offset..offset + len],
        );
        search
    }
}

/// Stage 3: per-search BPM blocks (pattern PEQ plus candidate windows),
/// verified in one device batch; traceback stays on the CPU side of the
/// retrieve.
pub(crate) struct VerifyBuffer<'a> {
    searches: Vec<Option<ArchiveSearch<'a>>>,
    blocks: Vec<(Option<BpmDeviceBlock>, Option<BpmDeviceBlock>)>,
    results: Vec<(Vec<Option<DeviceBpmHit>>, Vec<Option<DeviceBpmHit>>)>,
    used: usize,
    capacity: usize,
}

impl<'a> StageBuffer for VerifyBuffer<'a> {
    type Search = ArchiveSearch<'a>;

    fn new(capacity: usize) -> Self {
        Self {
            searches: Vec::new(),
            blocks: Vec::new(),
            results: Vec::new(),
            used: 0,
            capacity,
        }
    }

    fn clear(&mut self) {
        self.searches.clear();
        self.blocks.clear();
        self.results.clear();
        self.used = 0;
    }

    fn is_empty(&self) -> bool {
        self.searches.is_empty()
    }

    fn num_searches(&self) -> usize {
        self.searches.len()
    }

    fn used(&self) -> usize {
        self.used
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn occupancy_of(search: &ArchiveSearch<'a>) -> usize {
        search.num_verify_jobs()
    }

    fn push(&mut self, search: ArchiveSearch<'a>) {
        self.used += search.num_verify_jobs();
        self.blocks.push(search.bpm_blocks());
        self.searches.push(Some(search));
    }

    fn dispatch(&mut self, device: &dyn SearchDevice) {
        self.results = self
            .blocks
            .iter()
            .map(|(forward, reverse)| {
                (
                    forward
                        .as_ref()
                        .map(|block| device.bpm(block))
                        .unwrap_or_default(),
                    reverse
                        .as_ref()
                        .map(|block| device.bpm(block))
                        .unwrap_or_default(),
                )
            })
            .collect();
    }

    fn take(&mut self, idx: usize) -> ArchiveSearch<'a> {
        let mut search = self.searches[idx].take().expect("taken once");
        let (forward_hits, reverse_hits) = &self.results[idx];
        search.stepwise_verify_retrieve(
            &to_bpm_matches(forward_hits),
            &to_bpm_matches(reverse_hits),
        );
        search
    }
}
