use std::sync::Arc;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the store, arena and heap operations.
///
/// IO errors are held behind an `Arc` so that `Error` is cheaply cloneable;
/// [`SpillHeap`](crate::SpillHeap) latches the first error it encounters and
/// hands out clones from later calls.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A zero-length key was passed to `get`, `set` or `del`.
    #[error("key is empty")]
    EmptyKey,

    /// The key exceeds the 25-bit encodable length.
    #[error("key length {len} exceeds maximum {max}")]
    KeyTooLarge { len: usize, max: usize },

    /// The value exceeds the 25-bit encodable length.
    #[error("value length {len} exceeds maximum {max}")]
    ValueTooLarge { len: usize, max: usize },

    /// A single appended item does not fit into one chunk.
    #[error("append of {len} bytes exceeds chunk size {chunk_size}")]
    AppendTooLarge { len: usize, chunk_size: usize },

    /// The truncation target lies inside a non-tail chunk and is not zero.
    #[error("truncate to {target} lands inside a sealed chunk")]
    TruncateUnsupported { target: u64 },

    /// A read range does not fall within the arena's chunks.
    #[error("read of {size} bytes at offset {offset} is out of range")]
    ReadOutOfRange { offset: u64, size: u64 },

    /// File creation, mapping, or removal failed.
    #[error("io failure: {0}")]
    Io(Arc<std::io::Error>),

    /// Creation of the next slot table during a grow failed; the previous
    /// table is still usable.
    #[error("slot table grow failed: {0}")]
    Grow(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl Error {
    pub(crate) fn grow(err: std::io::Error) -> Self {
        Error::Grow(Arc::new(err))
    }
}
