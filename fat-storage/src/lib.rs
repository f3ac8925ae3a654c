//! Editing engine for FAT-style game archives.
//!
//! DOS-era games bundle their assets into container files with a file
//! allocation table: a central or per-file region listing each sub-file's
//! name, offset and size.  This crate edits such containers in place —
//! enumerate, read, insert, remove, rename, reorder and resize sub-files —
//! while keeping the on-disk layout byte-exact and every open sub-file
//! handle valid across mutations.
//!
//! The generic machinery lives in [`fat`]: an archive core that owns the
//! file list and a segmented stream, and calls into a small set of
//! format-specific hooks for the on-disk table updates.  Each supported
//! game format is a leaf module under [`formats`] implementing those hooks
//! plus a sniffing plugin for the [`registry`].

pub mod archive;
pub mod attribute;
pub mod entry;
pub mod error;
pub mod fat;
pub mod filters;
pub mod formats;
pub mod registry;

pub use archive::{Archive, FileStream};
pub use attribute::{AttrValue, Attribute};
pub use entry::{Attributes, FileEntry, FileHandle, FILETYPE_GENERIC};
pub use error::{Error, Result};
pub use fat::{FatArchive, FatCore, FatFormat};
pub use filters::standard_filters;
pub use registry::{
    ArchiveType, Certainty, FormatRegistry, SuppData, SuppFilenames, SuppItem,
};
