//! Byte-stream plumbing for editing container files in place.
//!
//! This crate provides the stream layer used by the `fat-storage` archive
//! engine: a uniform random-access contract over memory and files, a
//! segmented stream that supports insertion and removal of arbitrary byte
//! ranges without rewriting the file until commit, bounded relocatable
//! sub-stream views, and pluggable byte-transform filters.

pub mod error;
pub mod ext;
pub mod filter;
pub mod seg;
pub mod store;
pub mod sub;

pub use error::{Error, Result};
pub use ext::StreamExt;
pub use filter::{Filter, FilterRegistry, FilteredStream};
pub use seg::SegStream;
pub use store::{FileStream, MemStream, Stream};
pub use sub::{SharedStream, SubStream, Window};
