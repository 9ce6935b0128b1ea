#![forbid(unsafe_code)]

//! Error type shared by every history operation.

use crate::codec::CodecError;
use crate::hash::ChunkKey;

/// Errors produced by [`History`](crate::History) and its components.
///
/// `Clone` so a single commit failure can be delivered to every caller
/// waiting on the same coalesced push.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// A record references a chunk the store does not hold. The store is
    /// append-only, so this indicates corruption rather than a user error.
    #[error("chunk {key} is referenced but missing from the chunk store")]
    MissingChunk { key: ChunkKey },

    /// A debounced push was discarded before its window committed.
    /// Pushing again is safe.
    #[error("invalid push operation: pending push was discarded before commit")]
    InvalidPushOperation,

    /// A pick index does not address a child produced by the matched rule.
    #[error("pick index {index} out of range for {len} children")]
    InvalidPickIndex { index: usize, len: usize },

    /// A record names a rule that is not registered.
    #[error("record references unknown transform rule {index}")]
    UnknownRule { index: usize },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("invalid history configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),
}

pub type HistoryResult<T> = Result<T, HistoryError>;
