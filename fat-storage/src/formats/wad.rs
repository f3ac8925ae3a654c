//! Doom .WAD archives.
//!
//! 12-byte header: `"IWAD"` or `"PWAD"`, u32le file count, u32le table
//! offset.  The table sits after the file data and holds one 16-byte entry
//! per file: u32le offset, u32le size, 8-byte null-padded uppercase name.
//! The IWAD/PWAD distinction is exposed as the "Type" attribute.

use crate::archive::Archive;
use crate::attribute::Attribute;
use crate::entry::{FileEntry, FileHandle};
use crate::error::{Error, Result};
use crate::fat::{FatArchive, FatCore, FatFormat};
use crate::registry::{ArchiveType, Certainty, SuppData};
use seg_stream::{FilterRegistry, Stream, StreamExt};
use std::rc::Rc;

const HEADER_LEN: u64 = 12;
const FILECOUNT_OFFSET: u64 = 4;
const FATOFFSET_OFFSET: u64 = 8;
const FAT_ENTRY_LEN: u64 = 16;
const FILENAME_FIELD_LEN: usize = 8;
const MAX_FILENAME_LEN: usize = FILENAME_FIELD_LEN;
const FIRST_FILE_OFFSET: u64 = HEADER_LEN;

/// Refuse to parse counts beyond this; the header is corrupt.
const SAFETY_MAX_FILECOUNT: u32 = 8192;

pub struct WadType {
    filters: Rc<FilterRegistry>,
}

impl WadType {
    pub fn new(filters: Rc<FilterRegistry>) -> Self {
        Self { filters }
    }
}

impl ArchiveType for WadType {
    fn code(&self) -> &'static str {
        "wad-doom"
    }

    fn friendly_name(&self) -> &'static str {
        "Doom WAD File"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["wad", "rts"]
    }

    fn games(&self) -> &'static [&'static str] {
        &[
            "Doom",
            "Duke Nukem 3D",
            "Heretic",
            "Hexen",
            "Redneck Rampage",
            "Rise of the Triad",
            "Shadow Warrior",
        ]
    }

    fn is_instance(&self, content: &mut dyn Stream) -> Result<Certainty> {
        if content.size()? < HEADER_LEN {
            return Ok(Certainty::DefinitelyNo);
        }
        let sig = content.read_bytes_at(0, 4)?;
        if sig == b"IWAD" || sig == b"PWAD" {
            return Ok(Certainty::DefinitelyYes);
        }
        Ok(Certainty::DefinitelyNo)
    }

    fn open(&self, content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        Ok(Box::new(open_wad(content, Rc::clone(&self.filters))?))
    }

    fn create(&self, mut content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        content.write_at(0, b"IWAD\x00\x00\x00\x00\x0c\x00\x00\x00")?;
        self.open(content, SuppData::new())
    }
}

pub fn open_wad(
    content: Box<dyn Stream>,
    filters: Rc<FilterRegistry>,
) -> Result<FatArchive<WadFormat>> {
    let mut core = FatCore::new(content, FIRST_FILE_OFFSET, Some(MAX_FILENAME_LEN), filters)?;

    let mut entries = Vec::new();
    let (off_fat, wad_type) = {
        let content = Rc::clone(core.content());
        let mut content = content.borrow_mut();

        if content.len() < HEADER_LEN {
            return Err(Error::FormatCorrupt("file too short".into()));
        }
        let num_files = content.read_u32le_at(FILECOUNT_OFFSET)?;
        let off_fat = u64::from(content.read_u32le_at(FATOFFSET_OFFSET)?);
        if num_files >= SAFETY_MAX_FILECOUNT {
            return Err(Error::FormatCorrupt(
                "too many files or corrupted archive".into(),
            ));
        }
        if off_fat + u64::from(num_files) * FAT_ENTRY_LEN > content.len() {
            return Err(Error::FormatCorrupt(
                "file table runs past the end of the archive".into(),
            ));
        }

        for i in 0..num_files {
            let pos = off_fat + u64::from(i) * FAT_ENTRY_LEN;
            let mut f = FileEntry::new();
            f.index = i;
            f.offset = u64::from(content.read_u32le_at(pos)?);
            f.stored_size = u64::from(content.read_u32le_at(pos + 4)?);
            f.real_size = f.stored_size;
            f.name = content.read_string_at(pos + 8, FILENAME_FIELD_LEN)?;
            entries.push(f);
        }

        (off_fat, content.read_u8_at(0)?)
    };
    for f in entries {
        core.add_parsed_entry(f);
    }

    core.push_attribute(Attribute::enumeration(
        "Type",
        "Type of WAD file.  An IWAD contains the original game; a PWAD \
         contains a mod, overriding files from the IWAD where present.",
        vec!["IWAD".to_string(), "PWAD".to_string()],
        if wad_type == b'I' { 0 } else { 1 },
    ));

    Ok(FatArchive::new(core, WadFormat { off_fat }))
}

pub struct WadFormat {
    /// Where the file table currently sits; tracked because every payload
    /// edit moves it.
    off_fat: u64,
}

impl WadFormat {
    fn slot_pos(&self, index: u32) -> u64 {
        self.off_fat + u64::from(index) * FAT_ENTRY_LEN
    }

    fn write_head(&self, core: &mut FatCore, count: usize) -> Result<()> {
        let content = Rc::clone(core.content());
        let mut content = content.borrow_mut();
        content.write_u32le_at(FILECOUNT_OFFSET, count as u32)?;
        content.write_u32le_at(FATOFFSET_OFFSET, self.off_fat as u32)?;
        Ok(())
    }
}

impl FatFormat for WadFormat {
    fn update_name(&mut self, core: &mut FatCore, entry: &FileHandle, name: &str) -> Result<()> {
        let pos = self.slot_pos(entry.borrow().index);
        core.content()
            .borrow_mut()
            .write_string_at(pos + 8, name, FILENAME_FIELD_LEN)?;
        Ok(())
    }

    fn update_offset(&mut self, core: &mut FatCore, entry: &FileHandle, _delta: i64) -> Result<()> {
        let (index, offset) = {
            let e = entry.borrow();
            (e.index, e.offset)
        };
        core.content()
            .borrow_mut()
            .write_u32le_at(self.slot_pos(index), offset as u32)?;
        Ok(())
    }

    fn update_size(&mut self, core: &mut FatCore, entry: &FileHandle, delta: i64) -> Result<()> {
        let (index, stored) = {
            let e = entry.borrow();
            (e.index, e.stored_size)
        };
        core.content()
            .borrow_mut()
            .write_u32le_at(self.slot_pos(index) + 4, stored as u32)?;
        // The table itself moves with the payload edit about to happen.
        self.off_fat = self.off_fat.wrapping_add_signed(delta);
        core.content()
            .borrow_mut()
            .write_u32le_at(FATOFFSET_OFFSET, self.off_fat as u32)?;
        Ok(())
    }

    fn pre_insert(
        &mut self,
        core: &mut FatCore,
        _before: Option<&FileHandle>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        new_entry.header_len = 0;
        new_entry.name.make_ascii_uppercase();

        let pos = self.slot_pos(new_entry.index);
        let content = Rc::clone(core.content());
        let mut content = content.borrow_mut();
        content.insert(pos, FAT_ENTRY_LEN)?;
        content.write_u32le_at(pos, new_entry.offset as u32)?;
        content.write_u32le_at(pos + 4, new_entry.stored_size as u32)?;
        content.write_string_at(pos + 8, &new_entry.name, FILENAME_FIELD_LEN)?;
        Ok(())
    }

    fn post_insert(&mut self, core: &mut FatCore, new_entry: &FileHandle) -> Result<()> {
        self.off_fat += new_entry.borrow().stored_size;
        let count = core.entry_count();
        self.write_head(core, count)
    }

    fn pre_remove(&mut self, core: &mut FatCore, entry: &FileHandle) -> Result<()> {
        let pos = self.slot_pos(entry.borrow().index);
        core.content().borrow_mut().remove(pos, FAT_ENTRY_LEN)?;
        Ok(())
    }

    fn post_remove(&mut self, core: &mut FatCore, entry: &FileHandle) -> Result<()> {
        self.off_fat -= entry.borrow().stored_size;
        let count = core.entry_count();
        self.write_head(core, count)
    }

    fn flush(&mut self, core: &mut FatCore) -> Result<()> {
        if core.attributes()[0].changed {
            let byte = match core.attributes()[0].enum_value() {
                Some(0) => b'I',
                _ => b'P',
            };
            core.content().borrow_mut().write_u8_at(0, byte)?;
            core.attributes_mut()[0].changed = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seg_stream::MemStream;

    fn sniff(data: &[u8]) -> Certainty {
        let t = WadType::new(Rc::new(FilterRegistry::new()));
        let mut m = MemStream::from_vec(data.to_vec());
        t.is_instance(&mut m).unwrap()
    }

    #[test]
    fn sniffs_both_signatures() {
        assert_eq!(
            sniff(b"IWAD\x00\x00\x00\x00\x0c\x00\x00\x00"),
            Certainty::DefinitelyYes
        );
        assert_eq!(
            sniff(b"PWAD\x00\x00\x00\x00\x0c\x00\x00\x00"),
            Certainty::DefinitelyYes
        );
        assert_eq!(
            sniff(b"DWAD\x00\x00\x00\x00\x0c\x00\x00\x00"),
            Certainty::DefinitelyNo
        );
        assert_eq!(sniff(b"IWAD"), Certainty::DefinitelyNo);
    }

    #[test]
    fn rejects_silly_file_counts() {
        let mut data = b"IWAD".to_vec();
        data.extend_from_slice(&u32::MAX.to_le_bytes());
        data.extend_from_slice(&12u32.to_le_bytes());
        let err = open_wad(
            Box::new(MemStream::from_vec(data)),
            Rc::new(FilterRegistry::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::FormatCorrupt(_)));
    }

    #[test]
    fn parses_type_attribute() {
        let arch = open_wad(
            Box::new(MemStream::from_vec(
                b"PWAD\x00\x00\x00\x00\x0c\x00\x00\x00".to_vec(),
            )),
            Rc::new(FilterRegistry::new()),
        )
        .unwrap();
        assert_eq!(arch.attributes()[0].enum_value(), Some(1));
        assert!(arch.files().is_empty());
    }
}
