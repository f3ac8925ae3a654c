//! Stellar 7 .RES archives.
//!
//! No global header: a run of 8-byte embedded table entries (4-byte
//! null-padded name, u32le size with the top bit flagging a folder), each
//! followed by its payload.  Folder payloads are themselves RES archives
//! and open as nested archives.

use crate::archive::Archive;
use crate::entry::{Attributes, FileEntry, FileHandle};
use crate::error::Result;
use crate::fat::{FatArchive, FatCore, FatFormat};
use crate::registry::{ArchiveType, Certainty, SuppData};
use seg_stream::{FilterRegistry, Stream, StreamExt};
use std::rc::Rc;
use tracing::warn;

const FAT_ENTRY_LEN: u64 = 8;
const MAX_FILENAME_LEN: usize = 4;
const FIRST_FILE_OFFSET: u64 = 0;

const FOLDER_FLAG: u32 = 0x8000_0000;
const SIZE_MASK: u32 = 0x7fff_ffff;

const SAFETY_MAX_FILECOUNT: u32 = 8192;

pub struct Stellar7Type {
    filters: Rc<FilterRegistry>,
}

impl Stellar7Type {
    pub fn new(filters: Rc<FilterRegistry>) -> Self {
        Self { filters }
    }
}

impl ArchiveType for Stellar7Type {
    fn code(&self) -> &'static str {
        "res-stellar7"
    }

    fn friendly_name(&self) -> &'static str {
        "Stellar 7 Resource File"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["res"]
    }

    fn games(&self) -> &'static [&'static str] {
        &["Stellar 7"]
    }

    fn is_instance(&self, content: &mut dyn Stream) -> Result<Certainty> {
        let len = content.size()?;
        let mut pos = 0u64;
        let mut count = 0u32;
        while pos + FAT_ENTRY_LEN <= len && count < SAFETY_MAX_FILECOUNT {
            let name = content.read_bytes_at(pos, MAX_FILENAME_LEN)?;
            for &b in &name {
                if b == 0 {
                    break;
                }
                if b < 32 {
                    return Ok(Certainty::DefinitelyNo);
                }
            }
            let size = u64::from(content.read_u32le_at(pos + 4)? & SIZE_MASK);
            pos += FAT_ENTRY_LEN + size;
            if pos > len {
                return Ok(Certainty::DefinitelyNo);
            }
            count += 1;
        }
        if count == SAFETY_MAX_FILECOUNT {
            return Ok(Certainty::PossiblyYes);
        }
        if count == 0 {
            return Ok(Certainty::PossiblyYes);
        }
        Ok(Certainty::DefinitelyYes)
    }

    fn open(&self, content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        Ok(Box::new(open_res(content, Rc::clone(&self.filters))?))
    }

    fn create(&self, content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        self.open(content, SuppData::new())
    }
}

pub fn open_res(
    content: Box<dyn Stream>,
    filters: Rc<FilterRegistry>,
) -> Result<FatArchive<Stellar7Format>> {
    let mut core = FatCore::new(
        content,
        FIRST_FILE_OFFSET,
        Some(MAX_FILENAME_LEN),
        Rc::clone(&filters),
    )?;

    let mut entries = Vec::new();
    {
        let content = Rc::clone(core.content());
        let mut content = content.borrow_mut();
        let len = content.len();

        let mut pos = 0u64;
        let mut index = 0u32;
        while pos + FAT_ENTRY_LEN <= len && index < SAFETY_MAX_FILECOUNT {
            let mut f = FileEntry::new();
            f.index = index;
            f.offset = pos;
            f.header_len = FAT_ENTRY_LEN;
            f.name = content.read_string_at(pos, MAX_FILENAME_LEN)?;
            let raw = content.read_u32le_at(pos + 4)?;
            f.stored_size = u64::from(raw & SIZE_MASK);
            f.real_size = f.stored_size;
            if raw & FOLDER_FLAG != 0 {
                f.attrs.insert(Attributes::FOLDER);
            }

            pos += FAT_ENTRY_LEN + f.stored_size;
            if pos > len {
                warn!(
                    "RES archive truncated at entry {index}; dropping the partial entry"
                );
                break;
            }
            index += 1;
            entries.push(f);
        }
    }
    for f in entries {
        core.add_parsed_entry(f);
    }

    Ok(FatArchive::new(core, Stellar7Format { filters }))
}

pub struct Stellar7Format {
    filters: Rc<FilterRegistry>,
}

impl FatFormat for Stellar7Format {
    fn update_name(&mut self, core: &mut FatCore, entry: &FileHandle, name: &str) -> Result<()> {
        let offset = entry.borrow().offset;
        core.content()
            .borrow_mut()
            .write_string_at(offset, name, MAX_FILENAME_LEN)?;
        Ok(())
    }

    fn update_size(&mut self, core: &mut FatCore, entry: &FileHandle, _delta: i64) -> Result<()> {
        let (offset, stored, folder) = {
            let e = entry.borrow();
            (e.offset, e.stored_size, e.attrs.contains(Attributes::FOLDER))
        };
        let raw = (stored as u32 & SIZE_MASK) | if folder { FOLDER_FLAG } else { 0 };
        Ok(core.content()
            .borrow_mut()
            .write_u32le_at(offset + 4, raw)?)
    }

    fn pre_insert(
        &mut self,
        core: &mut FatCore,
        _before: Option<&FileHandle>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        new_entry.header_len = FAT_ENTRY_LEN;
        new_entry.name.make_ascii_uppercase();

        let raw = (new_entry.stored_size as u32 & SIZE_MASK)
            | if new_entry.attrs.contains(Attributes::FOLDER) {
                FOLDER_FLAG
            } else {
                0
            };
        {
            let content = Rc::clone(core.content());
            let mut content = content.borrow_mut();
            content.insert(new_entry.offset, FAT_ENTRY_LEN)?;
            content.write_string_at(new_entry.offset, &new_entry.name, MAX_FILENAME_LEN)?;
            content.write_u32le_at(new_entry.offset + 4, raw)?;
        }
        core.shift_files(self, None, new_entry.offset, FAT_ENTRY_LEN as i64, 0)?;
        Ok(())
    }

    fn open_folder(&mut self, core: &mut FatCore, entry: &FileHandle) -> Result<Box<dyn Archive>> {
        let sub = core.open_payload(entry);
        let nested = open_res(Box::new(sub), Rc::clone(&self.filters))?;
        Ok(Box::new(nested))
    }
}
