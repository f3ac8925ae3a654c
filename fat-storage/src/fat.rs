//! The FAT archive core.
//!
//! [`FatCore`] owns what every FAT-style format has in common: the ordered
//! file list, the segmented stream holding the archive bytes, and the
//! registry of open sub-file windows.  [`FatFormat`] is the hook set a
//! concrete format supplies for its on-disk table; [`FatArchive`] glues the
//! two together and implements the public [`Archive`] contract.
//!
//! Mutations follow a fixed shape: the format hook edits its table, the
//! core splices bytes in the segmented stream, and [`FatCore::shift_files`]
//! walks every entry and live window whose offset moved, updating the
//! in-memory state and calling back into the format so the on-disk offset
//! fields follow.

use crate::archive::{Archive, FileStream};
use crate::attribute::{AttrValue, Attribute};
use crate::entry::{Attributes, FileEntry, FileHandle};
use crate::error::{Error, Result};
use seg_stream::{FilterRegistry, FilteredStream, SegStream, SharedStream, Stream, SubStream, Window};
use std::cell::RefCell;
use std::fmt;
use std::io::{self, Read, Write};
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// `len_max_filename` for 8.3 DOS names including the dot.
pub const STD_DOS_FILENAME_LEN: usize = 12;

struct OpenFile {
    window: Weak<RefCell<Window>>,
    entry: Weak<RefCell<FileEntry>>,
}

/// Shared state of a FAT archive: file list, byte stream, open handles,
/// archive attributes.
pub struct FatCore {
    content: SharedStream,
    entries: Vec<FileHandle>,
    off_first_file: u64,
    len_max_filename: Option<usize>,
    filters: Rc<FilterRegistry>,
    open_files: Vec<OpenFile>,
    attributes: Vec<Attribute>,
}

impl FatCore {
    /// Wrap a backing store for editing.
    ///
    /// `off_first_file` is where the first file's data goes in an empty
    /// archive; `len_max_filename` is the format's name length limit, or
    /// `None` for formats without filenames.
    pub fn new(
        store: Box<dyn Stream>,
        off_first_file: u64,
        len_max_filename: Option<usize>,
        filters: Rc<FilterRegistry>,
    ) -> Result<Self> {
        let content = Rc::new(RefCell::new(SegStream::new(store)?));
        Ok(Self {
            content,
            entries: Vec::new(),
            off_first_file,
            len_max_filename,
            filters,
            open_files: Vec::new(),
            attributes: Vec::new(),
        })
    }

    /// The archive's segmented stream.  Hooks splice and write it freely.
    pub fn content(&self) -> &SharedStream {
        &self.content
    }

    pub fn entries(&self) -> &[FileHandle] {
        &self.entries
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn off_first_file(&self) -> u64 {
        self.off_first_file
    }

    pub fn len_max_filename(&self) -> Option<usize> {
        self.len_max_filename
    }

    pub fn filters(&self) -> &Rc<FilterRegistry> {
        &self.filters
    }

    /// Last entry in on-disk order.
    pub fn last_entry(&self) -> Option<FileHandle> {
        self.entries
            .iter()
            .max_by_key(|e| e.borrow().index)
            .cloned()
    }

    /// Register an entry found while parsing the on-disk table.
    pub fn add_parsed_entry(&mut self, mut entry: FileEntry) -> FileHandle {
        entry.valid = true;
        let handle: FileHandle = Rc::new(RefCell::new(entry));
        self.entries.push(Rc::clone(&handle));
        handle
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut [Attribute] {
        &mut self.attributes
    }

    pub fn push_attribute(&mut self, attr: Attribute) {
        self.attributes.push(attr);
    }

    pub fn is_valid(&self, handle: &FileHandle) -> bool {
        handle.borrow().valid
    }

    /// Open a window over the entry's payload and track it for shifting.
    pub fn open_payload(&mut self, handle: &FileHandle) -> SubStream {
        let (off, len) = {
            let e = handle.borrow();
            (e.payload_offset(), e.stored_size)
        };
        let sub = SubStream::new(Rc::clone(&self.content), off, len);
        self.open_files.push(OpenFile {
            window: Rc::downgrade(&sub.window()),
            entry: Rc::downgrade(handle),
        });
        sub
    }

    /// Shift every entry and live window at or after `off_start`.
    ///
    /// The index delta is applied before `update_offset` runs, because
    /// hooks locate table slots by index and must target the slot the
    /// entry is about to occupy.  Expired window references are reaped
    /// whenever a shift encounters one.
    pub fn shift_files(
        &mut self,
        fmt: &mut dyn FatFormat,
        skip: Option<&FileHandle>,
        off_start: u64,
        delta_offset: i64,
        delta_index: i32,
    ) -> Result<()> {
        trace!(off_start, delta_offset, delta_index, "shifting entries");
        let entries: Vec<FileHandle> = self.entries.clone();
        for handle in &entries {
            if !entry_in_range(handle, off_start, skip) {
                continue;
            }
            {
                let mut e = handle.borrow_mut();
                e.offset = e.offset.wrapping_add_signed(delta_offset);
                e.index = e.index.wrapping_add_signed(delta_index);
            }
            fmt.update_offset(self, handle, delta_offset)?;
        }

        let mut expired = false;
        for open in &self.open_files {
            match open.window.upgrade() {
                Some(window) => {
                    let mut w = window.borrow_mut();
                    if !w.orphaned && w.offset >= off_start {
                        w.relocate(delta_offset);
                    }
                }
                None => expired = true,
            }
        }
        if expired {
            self.open_files.retain(|o| o.window.upgrade().is_some());
        }
        Ok(())
    }

    fn position_of(&self, handle: &FileHandle) -> Option<usize> {
        self.entries.iter().position(|h| Rc::ptr_eq(h, handle))
    }

    fn windows_of(&self, entry: &FileHandle) -> Vec<Rc<RefCell<Window>>> {
        self.open_files
            .iter()
            .filter(|o| {
                o.entry
                    .upgrade()
                    .is_some_and(|e| Rc::ptr_eq(&e, entry))
            })
            .filter_map(|o| o.window.upgrade())
            .collect()
    }

    fn orphan_windows_of(&mut self, entry: &FileHandle) {
        for w in self.windows_of(entry) {
            w.borrow_mut().orphaned = true;
        }
    }

    fn retarget_windows(&mut self, from: &FileHandle, to: &FileHandle) {
        for o in &mut self.open_files {
            if o.entry.upgrade().is_some_and(|e| Rc::ptr_eq(&e, from)) {
                o.entry = Rc::downgrade(to);
            }
        }
    }
}

/// Should `handle` be moved by a shift starting at `off_start`?
fn entry_in_range(handle: &FileHandle, off_start: u64, skip: Option<&FileHandle>) -> bool {
    let e = handle.borrow();
    if e.offset < off_start {
        return false;
    }
    if let Some(skip) = skip {
        let s = skip.borrow();
        if s.valid {
            if Rc::ptr_eq(handle, skip) {
                return false;
            }
            // A zero-length file sharing the skip entry's offset but coming
            // earlier in table order stays put.
            if e.stored_size == 0 && e.offset == s.offset && e.index < s.index {
                return false;
            }
        }
    }
    true
}

/// Format-specific hooks the core calls while editing.
///
/// Every method has a workable default, so a format only overrides the
/// parts its on-disk table actually stores.  Hooks get the [`FatCore`]
/// and may read entries, splice the content stream, or re-enter
/// [`FatCore::shift_files`] for table regions they resize themselves.
pub trait FatFormat {
    /// Allocate the entry that `insert` will fill in.
    fn create_new_entry(&self) -> FileEntry {
        FileEntry::new()
    }

    /// Add the new entry to the on-disk table.  `new_entry` is not yet in
    /// the file list; this hook must set `header_len` and account for any
    /// table bytes it inserts (shifting other entries and bumping
    /// `new_entry.offset` as needed).  Failing here must leave the archive
    /// untouched.
    fn pre_insert(
        &mut self,
        _core: &mut FatCore,
        _before: Option<&FileHandle>,
        _new_entry: &mut FileEntry,
    ) -> Result<()> {
        Ok(())
    }

    /// Called after the payload bytes exist; trailing table fields and
    /// file-count headers go here.
    fn post_insert(&mut self, _core: &mut FatCore, _new_entry: &FileHandle) -> Result<()> {
        Ok(())
    }

    /// Overwrite the name field in the on-disk table.
    fn update_name(&mut self, _core: &mut FatCore, _entry: &FileHandle, _name: &str) -> Result<()> {
        Err(Error::Unsupported("this file format does not store filenames"))
    }

    /// Overwrite the offset field in the on-disk table.  `entry` already
    /// carries the new offset.
    fn update_offset(&mut self, _core: &mut FatCore, _entry: &FileHandle, _delta: i64) -> Result<()> {
        Ok(())
    }

    /// Overwrite the size field in the on-disk table.  `entry` already
    /// carries the new sizes.
    fn update_size(&mut self, _core: &mut FatCore, _entry: &FileHandle, _delta: i64) -> Result<()> {
        Ok(())
    }

    /// Remove the entry from the on-disk table.
    fn pre_remove(&mut self, _core: &mut FatCore, _entry: &FileHandle) -> Result<()> {
        Ok(())
    }

    /// Called after the entry's bytes are gone.  The entry is no longer
    /// valid but its fields are still readable.
    fn post_remove(&mut self, _core: &mut FatCore, _entry: &FileHandle) -> Result<()> {
        Ok(())
    }

    /// Validate or react to an attribute change; returning an error rolls
    /// the attribute back.
    fn attribute_changed(&mut self, _core: &mut FatCore, _index: usize) -> Result<()> {
        Ok(())
    }

    /// Final on-disk fixups before the segmented stream commits.
    fn flush(&mut self, _core: &mut FatCore) -> Result<()> {
        Ok(())
    }

    /// Attribute flags entries of this format may carry.
    fn supported_attrs(&self, _core: &FatCore) -> Attributes {
        Attributes::NONE
    }

    /// Open a folder entry as a nested archive.
    fn open_folder(&mut self, _core: &mut FatCore, _entry: &FileHandle) -> Result<Box<dyn Archive>> {
        Err(Error::Unsupported("this archive format does not contain folders"))
    }
}

/// A concrete archive: the shared core plus one format's hook set.
pub struct FatArchive<F: FatFormat> {
    core: FatCore,
    format: F,
}

impl<F: FatFormat> fmt::Debug for FatArchive<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FatArchive").finish_non_exhaustive()
    }
}

impl<F: FatFormat> FatArchive<F> {
    pub fn new(core: FatCore, format: F) -> Self {
        Self { core, format }
    }

    pub fn core(&self) -> &FatCore {
        &self.core
    }

    pub fn format(&self) -> &F {
        &self.format
    }
}

fn io_err(e: io::Error) -> Error {
    Error::Stream(seg_stream::Error::Io(e))
}

impl<F: FatFormat> Archive for FatArchive<F> {
    fn files(&self) -> &[FileHandle] {
        self.core.entries()
    }

    fn find(&self, name: &str) -> Option<FileHandle> {
        self.core
            .entries()
            .iter()
            .find(|h| h.borrow().name.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn is_valid(&self, handle: &FileHandle) -> bool {
        self.core.is_valid(handle)
    }

    fn open(&mut self, handle: &FileHandle, use_filter: bool) -> Result<FileStream> {
        if !self.core.is_valid(handle) {
            return Err(Error::InvalidHandle);
        }
        let filter_name = handle.borrow().filter.clone();
        if use_filter && !filter_name.is_empty() {
            let codec = self
                .core
                .filters()
                .get(&filter_name)
                .ok_or(Error::FilterMissing(filter_name))?;
            let sub = self.core.open_payload(handle);
            Ok(FileStream::Filtered(FilteredStream::open(sub, codec)?))
        } else {
            Ok(FileStream::Raw(self.core.open_payload(handle)))
        }
    }

    fn open_folder(&mut self, handle: &FileHandle) -> Result<Box<dyn Archive>> {
        if !self.core.is_valid(handle) {
            return Err(Error::InvalidHandle);
        }
        if !handle.borrow().attrs.contains(Attributes::FOLDER) {
            return Err(Error::Unsupported("entry is not a folder"));
        }
        self.format.open_folder(&mut self.core, handle)
    }

    fn insert(
        &mut self,
        before: Option<&FileHandle>,
        name: &str,
        stored_size: u64,
        file_type: &str,
        attrs: Attributes,
    ) -> Result<FileHandle> {
        if let Some(max) = self.core.len_max_filename() {
            if name.len() > max {
                return Err(Error::NameTooLong { max });
            }
        }

        let mut new_entry = self.format.create_new_entry();
        new_entry.name = name.to_string();
        new_entry.stored_size = stored_size;
        new_entry.real_size = stored_size;
        new_entry.file_type = file_type.to_string();
        new_entry.attrs = attrs;
        new_entry.header_len = 0;
        new_entry.valid = false;

        let before = before.filter(|h| h.borrow().valid);
        if let Some(b) = before {
            let b = b.borrow();
            new_entry.offset = b.offset;
            new_entry.index = b.index;
        } else if let Some(last) = self.core.last_entry() {
            let l = last.borrow();
            new_entry.offset = l.end_offset();
            new_entry.index = l.index + 1;
        } else {
            new_entry.offset = self.core.off_first_file();
            new_entry.index = 0;
        }

        self.format.pre_insert(&mut self.core, before, &mut new_entry)?;

        let handle: FileHandle = Rc::new(RefCell::new(new_entry));
        handle.borrow_mut().valid = true;

        match before.and_then(|b| self.core.position_of(b)) {
            Some(pos) => self.core.entries.insert(pos, Rc::clone(&handle)),
            None => self.core.entries.push(Rc::clone(&handle)),
        }

        let (payload_off, stored) = {
            let e = handle.borrow();
            (e.payload_offset(), e.stored_size)
        };
        self.core
            .shift_files(&mut self.format, Some(&handle), payload_off, stored as i64, 1)?;
        self.core.content.borrow_mut().insert(payload_off, stored)?;
        self.format.post_insert(&mut self.core, &handle)?;

        debug!(name, stored_size, "inserted file");
        Ok(handle)
    }

    fn remove(&mut self, handle: &FileHandle) -> Result<()> {
        if !self.core.is_valid(handle) {
            return Err(Error::InvalidHandle);
        }
        self.format.pre_remove(&mut self.core, handle)?;

        let pos = self.core.position_of(handle).ok_or(Error::InvalidHandle)?;
        self.core.entries.remove(pos);
        self.core.orphan_windows_of(handle);

        let (off, stored, header) = {
            let e = handle.borrow();
            (e.offset, e.stored_size, e.header_len)
        };
        self.core.shift_files(
            &mut self.format,
            Some(handle),
            off,
            -((stored + header) as i64),
            -1,
        )?;
        self.core.content.borrow_mut().remove(off, stored + header)?;

        handle.borrow_mut().valid = false;
        self.format.post_remove(&mut self.core, handle)?;

        debug!(name = %handle.borrow().name, "removed file");
        Ok(())
    }

    fn rename(&mut self, handle: &FileHandle, new_name: &str) -> Result<()> {
        if !self.core.is_valid(handle) {
            return Err(Error::InvalidHandle);
        }
        if let Some(max) = self.core.len_max_filename() {
            if new_name.len() > max {
                return Err(Error::NameTooLong { max });
            }
        }
        self.format.update_name(&mut self.core, handle, new_name)?;
        handle.borrow_mut().name = new_name.to_string();
        Ok(())
    }

    fn move_file(
        &mut self,
        before: Option<&FileHandle>,
        handle: &FileHandle,
    ) -> Result<FileHandle> {
        if !self.core.is_valid(handle) {
            return Err(Error::InvalidHandle);
        }
        if let Some(b) = before {
            if Rc::ptr_eq(b, handle) {
                return Ok(Rc::clone(handle));
            }
        }

        // Handles the caller already holds into this entry must survive
        // the reshuffle and end up over the new payload region.
        let kept_windows = self.core.windows_of(handle);

        let (name, stored, real, file_type, attrs, filter) = {
            let e = handle.borrow();
            (
                e.name.clone(),
                e.stored_size,
                e.real_size,
                e.file_type.clone(),
                e.attrs,
                e.filter.clone(),
            )
        };

        let mut src = self.open(handle, false)?;
        let new = self.insert(before, &name, stored, &file_type, attrs)?;
        if new.borrow().filter != filter {
            self.remove(&new)?;
            return Err(Error::Unsupported(
                "cannot move file to this position (filter change)",
            ));
        }

        let mut dst = self.open(&new, false)?;
        let mut buf = [0u8; 8192];
        loop {
            let n = src.read(&mut buf).map_err(io_err)?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n]).map_err(io_err)?;
        }
        if !filter.is_empty() {
            self.resize(&new, stored, real)?;
        }

        drop(src);
        self.remove(handle)?;

        let (new_off, new_len) = {
            let e = new.borrow();
            (e.payload_offset(), e.stored_size)
        };
        for w in kept_windows {
            let mut w = w.borrow_mut();
            w.offset = new_off;
            w.len = new_len;
            w.orphaned = false;
        }
        self.core.retarget_windows(handle, &new);
        Ok(new)
    }

    fn resize(&mut self, handle: &FileHandle, new_stored_size: u64, new_real_size: u64) -> Result<()> {
        if !self.core.is_valid(handle) {
            return Err(Error::InvalidHandle);
        }
        let (old_stored, old_real, payload_off) = {
            let e = handle.borrow();
            (e.stored_size, e.real_size, e.payload_offset())
        };
        let delta = new_stored_size as i64 - old_stored as i64;
        if delta == 0 && new_real_size == old_real {
            return Ok(());
        }

        {
            let mut e = handle.borrow_mut();
            e.stored_size = new_stored_size;
            e.real_size = new_real_size;
        }
        if let Err(err) = self.format.update_size(&mut self.core, handle, delta) {
            let mut e = handle.borrow_mut();
            e.stored_size = old_stored;
            e.real_size = old_real;
            return Err(err);
        }

        let start;
        if delta > 0 {
            start = payload_off + old_stored;
            self.core.content.borrow_mut().insert(start, delta as u64)?;
        } else if delta < 0 {
            start = payload_off + new_stored_size;
            self.core.content.borrow_mut().remove(start, (-delta) as u64)?;
        } else {
            // Only the decoded size changed; no bytes move.
            return Ok(());
        }

        self.core
            .shift_files(&mut self.format, Some(handle), start, delta, 0)?;

        for w in self.core.windows_of(handle) {
            w.borrow_mut().set_size(new_stored_size);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.format.flush(&mut self.core)?;
        self.core.content.borrow_mut().commit()?;
        Ok(())
    }

    fn attributes(&self) -> &[Attribute] {
        self.core.attributes()
    }

    fn set_attribute(&mut self, index: usize, value: AttrValue) -> Result<()> {
        let old = self
            .core
            .attributes()
            .get(index)
            .cloned()
            .ok_or_else(|| Error::AttributeValue(format!("no attribute with index {index}")))?;
        self.core.attributes_mut()[index].update(value)?;
        if let Err(err) = self.format.attribute_changed(&mut self.core, index) {
            self.core.attributes_mut()[index] = old;
            return Err(err);
        }
        Ok(())
    }

    fn supported_attrs(&self) -> Attributes {
        self.format.supported_attrs(&self.core)
    }
}
