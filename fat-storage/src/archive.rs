//! The public archive contract.

use crate::attribute::{AttrValue, Attribute};
use crate::entry::{Attributes, FileHandle};
use crate::error::Result;
use seg_stream::{FilteredStream, SubStream};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// An opened sub-file: either the raw payload window, or the payload seen
/// through the entry's filter.
///
/// Both variants stay valid while other entries are inserted, removed,
/// resized or moved; the archive slides the underlying window as the
/// bytes shift.  If the backing entry itself is removed the stream is
/// orphaned: reads return nothing and writes fail.
#[derive(Debug)]
pub enum FileStream {
    Raw(SubStream),
    Filtered(FilteredStream),
}

impl FileStream {
    /// Current offset of the payload window within the archive.
    pub fn offset(&self) -> u64 {
        match self {
            FileStream::Raw(s) => s.offset(),
            FileStream::Filtered(f) => f.inner().offset(),
        }
    }

    /// Readable length: stored size for raw streams, decoded size for
    /// filtered ones.
    pub fn len(&self) -> u64 {
        match self {
            FileStream::Raw(s) => s.len(),
            FileStream::Filtered(f) => f.decoded_len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_raw(&self) -> Option<&SubStream> {
        match self {
            FileStream::Raw(s) => Some(s),
            FileStream::Filtered(_) => None,
        }
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FileStream::Raw(s) => s.read(buf),
            FileStream::Filtered(f) => f.read(buf),
        }
    }
}

impl Write for FileStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileStream::Raw(s) => s.write(buf),
            FileStream::Filtered(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileStream::Raw(s) => s.flush(),
            FileStream::Filtered(f) => f.flush(),
        }
    }
}

impl Seek for FileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            FileStream::Raw(s) => s.seek(pos),
            FileStream::Filtered(f) => f.seek(pos),
        }
    }
}

/// A mutable FAT-style archive.
///
/// Edits take effect in memory immediately and reach the backing store at
/// [`Archive::flush`].  Recoverable errors (`NameTooLong`, `NameInvalid`,
/// `FormatFull`, `Unsupported`) leave the archive exactly as it was;
/// stream errors may leave it partially mutated and the instance should
/// then be discarded.
pub trait Archive: std::fmt::Debug {
    /// The current file list.  Order is unspecified; sort by
    /// [`crate::FileEntry::index`] to recover on-disk order.
    fn files(&self) -> &[FileHandle];

    /// Case-insensitive lookup of the first entry with this name.
    fn find(&self, name: &str) -> Option<FileHandle>;

    /// Does this handle refer to a live entry?
    fn is_valid(&self, handle: &FileHandle) -> bool;

    /// Open the entry's payload.  With `use_filter`, the entry's filter is
    /// looked up and applied; a missing filter is an error and changes
    /// nothing.
    fn open(&mut self, handle: &FileHandle, use_filter: bool) -> Result<FileStream>;

    /// Open a folder entry as a nested archive.
    fn open_folder(&mut self, handle: &FileHandle) -> Result<Box<dyn Archive>>;

    /// Create an entry of `stored_size` zero bytes before `before`, or at
    /// the end of the archive when `before` is `None` or invalid.
    fn insert(
        &mut self,
        before: Option<&FileHandle>,
        name: &str,
        stored_size: u64,
        file_type: &str,
        attrs: Attributes,
    ) -> Result<FileHandle>;

    /// Delete an entry and its bytes.  Streams opened on it are orphaned.
    fn remove(&mut self, handle: &FileHandle) -> Result<()>;

    fn rename(&mut self, handle: &FileHandle, new_name: &str) -> Result<()>;

    /// Reorder an entry to sit before `before` (or last).  The old handle
    /// becomes invalid; the replacement handle is returned.  Streams
    /// opened on the entry follow it to its new position.
    fn move_file(&mut self, before: Option<&FileHandle>, handle: &FileHandle)
        -> Result<FileHandle>;

    /// Change an entry's stored (on-disk) and real (decoded) sizes.
    /// Growth appears as zero bytes at the payload tail.
    fn resize(&mut self, handle: &FileHandle, new_stored_size: u64, new_real_size: u64)
        -> Result<()>;

    /// Write format fixups and commit all pending edits to the backing
    /// store.  Not atomic: a failure part-way leaves the store undefined.
    fn flush(&mut self) -> Result<()>;

    /// Archive-level metadata attributes.
    fn attributes(&self) -> &[Attribute];

    /// Change an attribute value; persisted at the next flush.
    fn set_attribute(&mut self, index: usize, value: AttrValue) -> Result<()>;

    /// Attribute flags entries of this archive may carry.
    fn supported_attrs(&self) -> Attributes;
}
