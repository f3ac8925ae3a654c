//! Duke Nukem 3D .GRP archives.
//!
//! 16-byte header: the ASCII signature `"KenSilverman"` plus a u32le file
//! count.  The table follows immediately, one 16-byte entry per file
//! (12-byte null-padded name, u32le size); file data is packed after the
//! table in table order, so offsets are implicit.

use crate::archive::Archive;
use crate::entry::{FileEntry, FileHandle};
use crate::error::{Error, Result};
use crate::fat::{FatArchive, FatCore, FatFormat};
use crate::registry::{ArchiveType, Certainty, SuppData};
use seg_stream::{FilterRegistry, Stream, StreamExt};
use std::rc::Rc;

const SIGNATURE: &[u8; 12] = b"KenSilverman";
const HEADER_LEN: u64 = 16;
const FILECOUNT_OFFSET: u64 = 12;
const FAT_OFFSET: u64 = HEADER_LEN;
const FAT_ENTRY_LEN: u64 = 16;
const FILENAME_FIELD_LEN: usize = 12;
const MAX_FILENAME_LEN: usize = FILENAME_FIELD_LEN;
const FIRST_FILE_OFFSET: u64 = HEADER_LEN;

const SAFETY_MAX_FILECOUNT: u32 = 8192;

pub struct GrpType {
    filters: Rc<FilterRegistry>,
}

impl GrpType {
    pub fn new(filters: Rc<FilterRegistry>) -> Self {
        Self { filters }
    }
}

impl ArchiveType for GrpType {
    fn code(&self) -> &'static str {
        "grp-duke3d"
    }

    fn friendly_name(&self) -> &'static str {
        "Duke Nukem 3D Group File"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["grp"]
    }

    fn games(&self) -> &'static [&'static str] {
        &["Duke Nukem 3D", "Redneck Rampage", "Shadow Warrior"]
    }

    fn is_instance(&self, content: &mut dyn Stream) -> Result<Certainty> {
        if content.size()? < HEADER_LEN {
            return Ok(Certainty::DefinitelyNo);
        }
        if content.read_bytes_at(0, 12)? == SIGNATURE {
            return Ok(Certainty::DefinitelyYes);
        }
        Ok(Certainty::DefinitelyNo)
    }

    fn open(&self, content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        Ok(Box::new(open_grp(content, Rc::clone(&self.filters))?))
    }

    fn create(&self, mut content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        content.write_at(0, SIGNATURE)?;
        content.write_u32le_at(FILECOUNT_OFFSET, 0)?;
        self.open(content, SuppData::new())
    }
}

pub fn open_grp(
    content: Box<dyn Stream>,
    filters: Rc<FilterRegistry>,
) -> Result<FatArchive<GrpFormat>> {
    let mut core = FatCore::new(content, FIRST_FILE_OFFSET, Some(MAX_FILENAME_LEN), filters)?;

    let mut entries = Vec::new();
    {
        let content = Rc::clone(core.content());
        let mut content = content.borrow_mut();

        if content.len() < HEADER_LEN {
            return Err(Error::FormatCorrupt("file too short".into()));
        }
        let num_files = content.read_u32le_at(FILECOUNT_OFFSET)?;
        if num_files >= SAFETY_MAX_FILECOUNT {
            return Err(Error::FormatCorrupt(
                "too many files or corrupted archive".into(),
            ));
        }

        let mut off_next = HEADER_LEN + u64::from(num_files) * FAT_ENTRY_LEN;
        for i in 0..num_files {
            let pos = FAT_OFFSET + u64::from(i) * FAT_ENTRY_LEN;
            let mut f = FileEntry::new();
            f.index = i;
            f.offset = off_next;
            f.name = content.read_string_at(pos, FILENAME_FIELD_LEN)?;
            f.stored_size = u64::from(content.read_u32le_at(pos + FILENAME_FIELD_LEN as u64)?);
            f.real_size = f.stored_size;
            off_next += f.stored_size;
            entries.push(f);
        }
        if off_next > content.len() {
            return Err(Error::FormatCorrupt(
                "file data runs past the end of the archive".into(),
            ));
        }
    }
    for f in entries {
        core.add_parsed_entry(f);
    }

    Ok(FatArchive::new(core, GrpFormat))
}

pub struct GrpFormat;

fn slot_pos(index: u32) -> u64 {
    FAT_OFFSET + u64::from(index) * FAT_ENTRY_LEN
}

impl GrpFormat {
    fn update_count(&self, core: &mut FatCore, count: usize) -> Result<()> {
        Ok(core.content()
            .borrow_mut()
            .write_u32le_at(FILECOUNT_OFFSET, count as u32)?)
    }
}

impl FatFormat for GrpFormat {
    fn update_name(&mut self, core: &mut FatCore, entry: &FileHandle, name: &str) -> Result<()> {
        let pos = slot_pos(entry.borrow().index);
        core.content()
            .borrow_mut()
            .write_string_at(pos, name, FILENAME_FIELD_LEN)?;
        Ok(())
    }

    fn update_size(&mut self, core: &mut FatCore, entry: &FileHandle, _delta: i64) -> Result<()> {
        let (index, stored) = {
            let e = entry.borrow();
            (e.index, e.stored_size)
        };
        Ok(core.content()
            .borrow_mut()
            .write_u32le_at(slot_pos(index) + FILENAME_FIELD_LEN as u64, stored as u32)?)
    }

    fn pre_insert(
        &mut self,
        core: &mut FatCore,
        _before: Option<&FileHandle>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        new_entry.header_len = 0;
        new_entry.name.make_ascii_uppercase();

        // The table grows by one slot, pushing all file data along with it.
        // The new entry is not in the list yet, so its own offset is bumped
        // by hand.
        let old_fat_end = FAT_OFFSET + core.entry_count() as u64 * FAT_ENTRY_LEN;
        {
            let content = Rc::clone(core.content());
            let mut content = content.borrow_mut();
            let pos = slot_pos(new_entry.index);
            content.insert(pos, FAT_ENTRY_LEN)?;
            content.write_string_at(pos, &new_entry.name, FILENAME_FIELD_LEN)?;
            content.write_u32le_at(
                pos + FILENAME_FIELD_LEN as u64,
                new_entry.stored_size as u32,
            )?;
        }
        core.shift_files(self, None, old_fat_end, FAT_ENTRY_LEN as i64, 0)?;
        new_entry.offset += FAT_ENTRY_LEN;
        Ok(())
    }

    fn post_insert(&mut self, core: &mut FatCore, _new_entry: &FileHandle) -> Result<()> {
        let count = core.entry_count();
        self.update_count(core, count)
    }

    fn pre_remove(&mut self, core: &mut FatCore, entry: &FileHandle) -> Result<()> {
        // Shift first: it rewrites offsets through the table, including the
        // slot about to disappear.
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
}
