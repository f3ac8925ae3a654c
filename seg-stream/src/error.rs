//! Error types for stream operations

use std::io;
use thiserror::Error;

/// Result type for stream operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// IO error on the backing store
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Write would run past the end of the stream
    #[error("write of {len} bytes at offset {pos} runs past end of stream (size {size})")]
    WriteBeyondEnd { pos: u64, len: u64, size: u64 },

    /// Insertion point is past the end of the stream
    #[error("cannot insert at offset {pos}: past end of stream (size {size})")]
    InsertBeyondEnd { pos: u64, size: u64 },

    /// Removal range runs past the end of the stream
    #[error("cannot remove {len} bytes at offset {pos}: past end of stream (size {size})")]
    RemoveBeyondEnd { pos: u64, len: u64, size: u64 },

    /// String does not fit in its fixed-length field
    #[error("string of {len} bytes does not fit in a {max}-byte field")]
    StringTooLong { len: usize, max: usize },

    /// The stream cannot change length
    #[error("this stream does not support truncation")]
    TruncateUnsupported,

    /// A filter produced output of a different size than the window it
    /// writes back into
    #[error("filter output is {actual} bytes but the window holds {expected} bytes")]
    FilterSizeChanged { expected: u64, actual: u64 },
}
