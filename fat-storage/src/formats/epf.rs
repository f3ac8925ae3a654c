//! East Point Software .EPF archives (The Lion King and others).
//!
//! 11-byte header: `"EPFS"`, u32le table offset, u8 unknown, u16le file
//! count.  File data is packed from offset 11; the table sits at the end,
//! one 22-byte entry per file: 13-byte null-padded name, u8 flags (bit 0 =
//! compressed with `lzw-epfs`), u32le stored size, u32le decompressed
//! size.  Any bytes between the last file and the table are a free-form
//! description, exposed as an attribute.

use crate::archive::Archive;
use crate::attribute::Attribute;
use crate::entry::{Attributes, FileEntry, FileHandle};
use crate::error::{Error, Result};
use crate::fat::{FatArchive, FatCore, FatFormat};
use crate::registry::{ArchiveType, Certainty, SuppData};
use seg_stream::{FilterRegistry, Stream, StreamExt};
use std::rc::Rc;

const HEADER_LEN: u64 = 11;
const FATOFFSET_OFFSET: u64 = 4;
const FILECOUNT_OFFSET: u64 = 9;
const FAT_ENTRY_LEN: u64 = 22;
const FILENAME_FIELD_LEN: usize = 13;
const MAX_FILENAME_LEN: usize = 12;
const FIRST_FILE_OFFSET: u64 = HEADER_LEN;

const FLAG_COMPRESSED: u8 = 1;
const COMPRESSION_FILTER: &str = "lzw-epfs";

pub struct EpfType {
    filters: Rc<FilterRegistry>,
}

impl EpfType {
    pub fn new(filters: Rc<FilterRegistry>) -> Self {
        Self { filters }
    }
}

impl ArchiveType for EpfType {
    fn code(&self) -> &'static str {
        "epf-lionking"
    }

    fn friendly_name(&self) -> &'static str {
        "East Point Software EPFS File"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["epf"]
    }

    fn games(&self) -> &'static [&'static str] {
        &[
            "Alien Breed Tower Assault",
            "Arcade Pool",
            "Jungle Book, The",
            "Lion King, The",
            "Overdrive",
            "Project X",
            "Sensible Golf",
            "Smurfs, The",
            "Universe",
        ]
    }

    fn is_instance(&self, content: &mut dyn Stream) -> Result<Certainty> {
        if content.size()? < HEADER_LEN {
            return Ok(Certainty::DefinitelyNo);
        }
        if content.read_bytes_at(0, 4)? == b"EPFS" {
            return Ok(Certainty::DefinitelyYes);
        }
        Ok(Certainty::DefinitelyNo)
    }

    fn open(&self, content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        Ok(Box::new(open_epf(content, Rc::clone(&self.filters))?))
    }

    fn create(&self, mut content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        content.write_at(0, b"EPFS")?;
        content.write_u32le_at(FATOFFSET_OFFSET, HEADER_LEN as u32)?;
        content.write_u8_at(8, 0)?;
        content.write_u16le_at(FILECOUNT_OFFSET, 0)?;
        self.open(content, SuppData::new())
    }
}

pub fn open_epf(
    content: Box<dyn Stream>,
    filters: Rc<FilterRegistry>,
) -> Result<FatArchive<EpfFormat>> {
    let mut core = FatCore::new(content, FIRST_FILE_OFFSET, Some(MAX_FILENAME_LEN), filters)?;

    let mut entries = Vec::new();
    let off_fat;
    let description;
    {
        let content = Rc::clone(core.content());
        let mut content = content.borrow_mut();
        let len = content.len();

        if len < HEADER_LEN {
            return Err(Error::FormatCorrupt("file too short".into()));
        }
        off_fat = u64::from(content.read_u32le_at(FATOFFSET_OFFSET)?);
        let num_files = content.read_u16le_at(FILECOUNT_OFFSET)?;

        if off_fat > len || off_fat + u64::from(num_files) * FAT_ENTRY_LEN > len {
            return Err(Error::FormatCorrupt(
                "header corrupted or file truncated".into(),
            ));
        }

        let mut off_next = FIRST_FILE_OFFSET;
        for i in 0..num_files {
            let pos = off_fat + u64::from(i) * FAT_ENTRY_LEN;
            let mut f = FileEntry::new();
            f.index = u32::from(i);
            f.offset = off_next;
            f.name = content.read_string_at(pos, FILENAME_FIELD_LEN)?;
            let flags = content.read_u8_at(pos + 13)?;
            f.stored_size = u64::from(content.read_u32le_at(pos + 14)?);
            f.real_size = u64::from(content.read_u32le_at(pos + 18)?);
            if flags & FLAG_COMPRESSED != 0 {
                f.attrs.insert(Attributes::COMPRESSED);
                f.filter = COMPRESSION_FILTER.to_string();
            }
            off_next += f.stored_size;
            entries.push(f);
        }

        let off_desc = off_next;
        description = if off_fat > off_desc {
            String::from_utf8_lossy(&content.read_bytes_at(off_desc, (off_fat - off_desc) as usize)?)
                .into_owned()
        } else {
            String::new()
        };
    }
    for f in entries {
        core.add_parsed_entry(f);
    }

    core.push_attribute(Attribute::text("Description", "Description", description, None));

    Ok(FatArchive::new(core, EpfFormat { off_fat }))
}

pub struct EpfFormat {
    off_fat: u64,
}

impl EpfFormat {
    fn slot_pos(&self, index: u32) -> u64 {
        self.off_fat + u64::from(index) * FAT_ENTRY_LEN
    }

    fn write_fat_offset(&self, core: &mut FatCore) -> Result<()> {
        Ok(core.content()
            .borrow_mut()
            .write_u32le_at(FATOFFSET_OFFSET, self.off_fat as u32)?)
    }

    fn write_count(&self, core: &mut FatCore, count: usize) -> Result<()> {
        Ok(core.content()
            .borrow_mut()
            .write_u16le_at(FILECOUNT_OFFSET, count as u16)?)
    }

    /// Where the description region starts: right after the last file.
    fn desc_offset(&self, core: &FatCore) -> u64 {
        core.last_entry()
            .map(|e| e.borrow().end_offset())
            .unwrap_or(FIRST_FILE_OFFSET)
    }
}

impl FatFormat for EpfFormat {
    fn update_name(&mut self, core: &mut FatCore, entry: &FileHandle, name: &str) -> Result<()> {
        let pos = self.slot_pos(entry.borrow().index);
        core.content()
            .borrow_mut()
            .write_string_at(pos, name, FILENAME_FIELD_LEN)?;
        Ok(())
    }

    fn update_size(&mut self, core: &mut FatCore, entry: &FileHandle, delta: i64) -> Result<()> {
        let (index, stored, real) = {
            let e = entry.borrow();
            (e.index, e.stored_size, e.real_size)
        };
        {
            let content = Rc::clone(core.content());
            let mut content = content.borrow_mut();
            let pos = self.slot_pos(index);
            content.write_u32le_at(pos + 14, stored as u32)?;
            content.write_u32le_at(pos + 18, real as u32)?;
        }
        // The table trails the payload about to be spliced.
        self.off_fat = self.off_fat.wrapping_add_signed(delta);
        self.write_fat_offset(core)
    }

    fn pre_insert(
        &mut self,
        _core: &mut FatCore,
        _before: Option<&FileHandle>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        new_entry.header_len = 0;
        new_entry.name.make_ascii_uppercase();
        if new_entry.attrs.contains(Attributes::COMPRESSED) {
            new_entry.filter = COMPRESSION_FILTER.to_string();
        }
        Ok(())
    }

    fn post_insert(&mut self, core: &mut FatCore, new_entry: &FileHandle) -> Result<()> {
        let (index, name, attrs, stored, real) = {
            let e = new_entry.borrow();
            (e.index, e.name.clone(), e.attrs, e.stored_size, e.real_size)
        };
        self.off_fat += stored;

        {
            let content = Rc::clone(core.content());
            let mut content = content.borrow_mut();
            let pos = self.slot_pos(index);
            content.insert(pos, FAT_ENTRY_LEN)?;
            content.write_string_at(pos, &name, FILENAME_FIELD_LEN)?;
            content.write_u8_at(
                pos + 13,
                if attrs.contains(Attributes::COMPRESSED) {
                    FLAG_COMPRESSED
                } else {
                    0
                },
            )?;
            content.write_u32le_at(pos + 14, stored as u32)?;
            content.write_u32le_at(pos + 18, real as u32)?;
        }

        self.write_fat_offset(core)?;
        let count = core.entry_count();
        self.write_count(core, count)
    }

    fn pre_remove(&mut self, core: &mut FatCore, entry: &FileHandle) -> Result<()> {
        let (index, stored) = {
            let e = entry.borrow();
            (e.index, e.stored_size)
        };
        core.content()
            .borrow_mut()
            .remove(self.slot_pos(index), FAT_ENTRY_LEN)?;

        self.off_fat -= stored;
        self.write_fat_offset(core)?;
        let count = core.entry_count() - 1;
        self.write_count(core, count)
    }

    fn supported_attrs(&self, _core: &FatCore) -> Attributes {
        Attributes::COMPRESSED
    }

    fn flush(&mut self, core: &mut FatCore) -> Result<()> {
        if core.attributes()[0].changed {
            let text = core.attributes()[0]
                .text_value()
                .unwrap_or_default()
                .to_string();
            let off_desc = self.desc_offset(core);
            let old_len = self.off_fat - off_desc;
            let delta = text.len() as i64 - old_len as i64;
            {
                let content = Rc::clone(core.content());
                let mut content = content.borrow_mut();
                if delta < 0 {
                    content.remove(off_desc, (-delta) as u64)?;
                } else if delta > 0 {
                    content.insert(off_desc, delta as u64)?;
                }
                content.write_at(off_desc, text.as_bytes())?;
            }
            self.off_fat = self.off_fat.wrapping_add_signed(delta);
            self.write_fat_offset(core)?;
            core.attributes_mut()[0].changed = false;
        }
        Ok(())
    }
}
