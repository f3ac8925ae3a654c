//! Terminal Velocity .POD archives.
//!
//! 84-byte header: u32le file count then an 80-byte null-padded description
//! (exposed as the "Description" attribute).  The table follows, one
//! 40-byte entry per file: 32-byte null-padded name, u32le size, u32le
//! offset.

use crate::archive::Archive;
use crate::attribute::Attribute;
use crate::entry::{FileEntry, FileHandle};
use crate::error::{Error, Result};
use crate::fat::{FatArchive, FatCore, FatFormat};
use crate::registry::{ArchiveType, Certainty, SuppData};
use seg_stream::{FilterRegistry, Stream, StreamExt};
use std::rc::Rc;

const DESCRIPTION_OFFSET: u64 = 4;
const DESCRIPTION_LEN: usize = 80;
const FAT_OFFSET: u64 = 84;
const FAT_ENTRY_LEN: u64 = 40;
const FILENAME_FIELD_LEN: usize = 32;
const MAX_FILENAME_LEN: usize = FILENAME_FIELD_LEN;
const FIRST_FILE_OFFSET: u64 = FAT_OFFSET;

pub struct PodType {
    filters: Rc<FilterRegistry>,
}

impl PodType {
    pub fn new(filters: Rc<FilterRegistry>) -> Self {
        Self { filters }
    }
}

impl ArchiveType for PodType {
    fn code(&self) -> &'static str {
        "pod-tv"
    }

    fn friendly_name(&self) -> &'static str {
        "Terminal Velocity POD File"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["pod"]
    }

    fn games(&self) -> &'static [&'static str] {
        &["Terminal Velocity"]
    }

    fn is_instance(&self, content: &mut dyn Stream) -> Result<Certainty> {
        let len = content.size()?;
        if len < FAT_OFFSET {
            return Ok(Certainty::DefinitelyNo);
        }
        let num_files = content.read_u32le_at(0)?;

        let desc = content.read_bytes_at(DESCRIPTION_OFFSET, DESCRIPTION_LEN)?;
        if desc.iter().any(|&b| b != 0 && b < 32) {
            return Ok(Certainty::DefinitelyNo);
        }

        if FAT_OFFSET + u64::from(num_files) * FAT_ENTRY_LEN > len {
            return Ok(Certainty::DefinitelyNo);
        }
        for i in 0..num_files {
            let pos = FAT_OFFSET + u64::from(i) * FAT_ENTRY_LEN;
            let name = content.read_bytes_at(pos, FILENAME_FIELD_LEN)?;
            for &b in &name {
                if b == 0 {
                    break;
                }
                if b < 32 {
                    return Ok(Certainty::DefinitelyNo);
                }
            }
            let size = u64::from(content.read_u32le_at(pos + 32)?);
            let offset = u64::from(content.read_u32le_at(pos + 36)?);
            if offset + size > len {
                return Ok(Certainty::DefinitelyNo);
            }
        }

        // Structure holds up, but the format has no signature to be sure.
        Ok(Certainty::PossiblyYes)
    }

    fn open(&self, content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        Ok(Box::new(open_pod(content, Rc::clone(&self.filters))?))
    }

    fn create(&self, mut content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        content.write_u32le_at(0, 0)?;
        content.write_string_at(DESCRIPTION_OFFSET, "Empty POD file", DESCRIPTION_LEN)?;
        self.open(content, SuppData::new())
    }
}

pub fn open_pod(
    content: Box<dyn Stream>,
    filters: Rc<FilterRegistry>,
) -> Result<FatArchive<PodFormat>> {
    let mut core = FatCore::new(content, FIRST_FILE_OFFSET, Some(MAX_FILENAME_LEN), filters)?;

    let mut entries = Vec::new();
    let description;
    {
        let content = Rc::clone(core.content());
        let mut content = content.borrow_mut();

        if content.len() < FAT_OFFSET {
            return Err(Error::FormatCorrupt("file too short".into()));
        }
        let num_files = content.read_u32le_at(0)?;
        if FAT_OFFSET + u64::from(num_files) * FAT_ENTRY_LEN > content.len() {
            return Err(Error::FormatCorrupt(
                "file table runs past the end of the archive".into(),
            ));
        }
        description = content.read_string_at(DESCRIPTION_OFFSET, DESCRIPTION_LEN)?;

        for i in 0..num_files {
            let pos = FAT_OFFSET + u64::from(i) * FAT_ENTRY_LEN;
            let mut f = FileEntry::new();
            f.index = i;
            f.name = content.read_string_at(pos, FILENAME_FIELD_LEN)?;
            f.stored_size = u64::from(content.read_u32le_at(pos + 32)?);
            f.offset = u64::from(content.read_u32le_at(pos + 36)?);
            f.real_size = f.stored_size;
            entries.push(f);
        }
    }
    for f in entries {
        core.add_parsed_entry(f);
    }

    core.push_attribute(Attribute::text(
        "Description",
        "Archive description shown by the game's tools",
        description,
        Some(DESCRIPTION_LEN),
    ));

    Ok(FatArchive::new(core, PodFormat))
}

pub struct PodFormat;

fn slot_pos(index: u32) -> u64 {
    FAT_OFFSET + u64::from(index) * FAT_ENTRY_LEN
}

impl PodFormat {
    fn update_count(&self, core: &mut FatCore, count: usize) -> Result<()> {
        Ok(core.content()
            .borrow_mut()
            .write_u32le_at(0, count as u32)?)
    }
}

impl FatFormat for PodFormat {
    fn update_name(&mut self, core: &mut FatCore, entry: &FileHandle, name: &str) -> Result<()> {
        let pos = slot_pos(entry.borrow().index);
        core.content()
            .borrow_mut()
            .write_string_at(pos, name, FILENAME_FIELD_LEN)?;
        Ok(())
    }

    fn update_offset(&mut self, core: &mut FatCore, entry: &FileHandle, _delta: i64) -> Result<()> {
        let (index, offset) = {
            let e = entry.borrow();
            (e.index, e.offset)
        };
        Ok(core.content()
            .borrow_mut()
            .write_u32le_at(slot_pos(index) + 36, offset as u32)?)
    }

    fn update_size(&mut self, core: &mut FatCore, entry: &FileHandle, _delta: i64) -> Result<()> {
        let (index, stored) = {
            let e = entry.borrow();
            (e.index, e.stored_size)
        };
        Ok(core.content()
            .borrow_mut()
            .write_u32le_at(slot_pos(index) + 32, stored as u32)?)
    }

    fn pre_insert(
        &mut self,
        core: &mut FatCore,
        _before: Option<&FileHandle>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        new_entry.header_len = 0;
        new_entry.name.make_ascii_uppercase();

        // The new slot pushes all file data forward; the entry is not in
        // the list yet so its offset is adjusted by hand, before the entry
        // is written out with the final value.
        new_entry.offset += FAT_ENTRY_LEN;

        let old_fat_end = FAT_OFFSET + core.entry_count() as u64 * FAT_ENTRY_LEN;
        {
            let content = Rc::clone(core.content());
            let mut content = content.borrow_mut();
            let pos = slot_pos(new_entry.index);
            content.insert(pos, FAT_ENTRY_LEN)?;
            content.write_string_at(pos, &new_entry.name, FILENAME_FIELD_LEN)?;
            content.write_u32le_at(pos + 32, new_entry.stored_size as u32)?;
            content.write_u32le_at(pos + 36, new_entry.offset as u32)?;
        }
        core.shift_files(self, None, old_fat_end, FAT_ENTRY_LEN as i64, 0)?;
        Ok(())
    }

    fn post_insert(&mut self, core: &mut FatCore, _new_entry: &FileHandle) -> Result<()> {
        let count = core.entry_count();
        self.update_count(core, count)
    }

    fn pre_remove(&mut self, core: &mut FatCore, entry: &FileHandle) -> Result<()> {
        // Shift before touching the table: offsets are rewritten through
        // the slot that is about to disappear.
        let fat_end = FAT_OFFSET + core.entry_count() as u64 * FAT_ENTRY_LEN;
        core.shift_files(self, None, fat_end, -(FAT_ENTRY_LEN as i64), 0)?;
        let pos = slot_pos(entry.borrow().index);
        core.content().borrow_mut().remove(pos, FAT_ENTRY_LEN)?;
        Ok(())
    }

    fn post_remove(&mut self, core: &mut FatCore, _entry: &FileHandle) -> Result<()> {
        let count = core.entry_count();
        self.update_count(core, count)
    }

    fn flush(&mut self, core: &mut FatCore) -> Result<()> {
        if core.attributes()[0].changed {
            let text = core.attributes()[0]
                .text_value()
                .unwrap_or_default()
                .to_string();
            core.content()
                .borrow_mut()
                .write_string_at(DESCRIPTION_OFFSET, &text, DESCRIPTION_LEN)?;
            core.attributes_mut()[0].changed = false;
        }
        Ok(())
    }
}
