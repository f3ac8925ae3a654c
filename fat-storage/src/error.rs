//! Error types for archive operations

use crate::registry::SuppItem;
use thiserror::Error;

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Failure in the underlying byte stream.  The archive may be partially
    /// mutated and should be discarded.
    #[error("stream error: {0}")]
    Stream(#[from] seg_stream::Error),

    /// Header or file table inconsistent at parse time
    #[error("archive corrupted: {0}")]
    FormatCorrupt(String),

    /// Filename exceeds the format's length limit
    #[error("maximum filename length is {max} chars")]
    NameTooLong { max: usize },

    /// Filename violates the format's character or structure rules
    #[error("invalid filename: {0}")]
    NameInvalid(String),

    /// The format's file table has a fixed capacity and it is full
    #[error("maximum number of files reached in this archive format")]
    FormatFull,

    /// The format cannot perform the requested operation
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// An entry names a filter that is not in the filter table
    #[error("no filter registered under \"{0}\"")]
    FilterMissing(String),

    /// The handle does not refer to a live entry of this archive
    #[error("invalid or removed file handle")]
    InvalidHandle,

    /// Attribute index out of range, or value of the wrong kind or range
    #[error("bad attribute value: {0}")]
    AttributeValue(String),

    /// A required supplementary file was not provided
    #[error("missing required supplementary file: {0:?}")]
    MissingSupp(SuppItem),
}
