use thiserror::Error;

pub type MapResult<T> = Result<T, MapError>;

/// Read-level failures surface as values; candidate-level failures are
/// swallowed into counters by the filtering layer (see
/// `FilteringCandidates`).
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum MapError {
    #[error("pattern too short, {got} < {min}")]
    PatternTooShort { got: usize, min: usize },
    #[error("pattern is entirely wildcards")]
    AllWildcards,
    #[error("region profile produced no usable regions")]
    NoRegions,
    #[error("empty archive text")]
    EmptyArchive,
    #[error("duplicated sequence name {0}")]
    DuplicateSequenceName(String),
    #[error("text position {pos} outside archive of length {len}")]
    TextOutOfBounds { pos: usize, len: usize },
}
