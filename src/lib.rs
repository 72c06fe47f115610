//! Core engine of an FM-index based short-read approximate matcher:
//! region profiling, staged candidate filtering, banded bit-parallel
//! verification, and the two-strand archive search that drives them,
//! either inline or through the buffered (GPU-shaped) pipeline.

pub mod approximate_search;
pub mod archive;
pub mod archive_search;
pub mod errs;
pub mod filtering;
mod interval_set;
pub mod matches;
mod myers;
mod neighborhood;
pub mod params;
pub mod pattern;
pub mod pipeline;
pub mod region_profile;
mod util;

pub use approximate_search::{ApproximateSearch, SearchState};
pub use archive::{Archive, SaInterval, SequenceLocation};
pub use archive_search::{map_reads_parallel, ArchiveSearch};
pub use errs::{MapError, MapResult};
pub use matches::{cigar_string, CigarOp, MappedMatch, Matches};
pub use params::{
    ErrorLimit, LocalAlignmentPolicy, MappingMode, SearchParameters,
    SelectionParameters,
};
pub use pattern::Pattern;
pub use pipeline::SearchPipeline;
pub use util::Strand;
