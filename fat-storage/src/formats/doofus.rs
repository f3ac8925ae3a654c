//! Doofus .G-D archives.
//!
//! The data file has no header and no names: it is a bare concatenation of
//! payloads.  The table lives inside the game executable (a required
//! sidecar), as a fixed run of 8-byte slots: u16le size, u16le type code,
//! 4 unused bytes.  A zero size marks a vacant slot; the table never grows
//! or shrinks, so the archive reports `FormatFull` once every slot is in
//! use.  Type codes are round-tripped through the entry's type tag.

use crate::archive::Archive;
use crate::entry::{FileEntry, FileHandle, FILETYPE_GENERIC};
use crate::error::{Error, Result};
use crate::fat::{FatArchive, FatCore, FatFormat};
use crate::registry::{ArchiveType, Certainty, SuppData, SuppFilenames, SuppItem};
use seg_stream::{FilterRegistry, SegStream, Stream, StreamExt, SubStream};
use std::cell::RefCell;
use std::rc::Rc;

const FAT_ENTRY_LEN: u64 = 8;
const FIRST_FILE_OFFSET: u64 = 0;

/// Known executable size and the table's position inside it.
const EXE_LEN: u64 = 580_994;
const EXE_FAT_OFFSET: u64 = 0x015372;
const FAT_LEN: u64 = 8 * 64;

const TYPE_MUSIC_TBSA: u16 = 0x59ee;
const KNOWN_UNKNOWN_TYPES: &[u16] = &[0x1636, 0x2376, 0x3276, 0x3f2e, 0x3f64, 0x48be, 0x43ee];

fn type_for_code(code: u16) -> String {
    if code == TYPE_MUSIC_TBSA {
        "music/tbsa".to_string()
    } else if KNOWN_UNKNOWN_TYPES.contains(&code) {
        format!("unknown/doofus-{code:04x}")
    } else {
        FILETYPE_GENERIC.to_string()
    }
}

fn code_for_type(file_type: &str) -> u16 {
    if file_type == "music/tbsa" {
        TYPE_MUSIC_TBSA
    } else if let Some(hex) = file_type.strip_prefix("unknown/doofus-") {
        u16::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        0
    }
}

pub struct DoofusType {
    filters: Rc<FilterRegistry>,
}

impl DoofusType {
    pub fn new(filters: Rc<FilterRegistry>) -> Self {
        Self { filters }
    }
}

impl ArchiveType for DoofusType {
    fn code(&self) -> &'static str {
        "gd-doofus"
    }

    fn friendly_name(&self) -> &'static str {
        "Doofus DAT File"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["g-d"]
    }

    fn games(&self) -> &'static [&'static str] {
        &["Doofus"]
    }

    fn is_instance(&self, _content: &mut dyn Stream) -> Result<Certainty> {
        // There is no identifying information in this format at all.
        Ok(Certainty::Unsure)
    }

    fn open(&self, content: Box<dyn Stream>, mut supps: SuppData) -> Result<Box<dyn Archive>> {
        let fat = supps
            .remove(&SuppItem::Fat)
            .ok_or(Error::MissingSupp(SuppItem::Fat))?;
        Ok(Box::new(open_doofus(content, fat, Rc::clone(&self.filters))?))
    }

    fn create(&self, _content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        // The table has to go inside one specific executable; there is no
        // way to conjure that from nothing.
        Err(Error::Unsupported(
            "cannot create archives from scratch in this format",
        ))
    }

    fn required_supps(
        &self,
        _content: &mut dyn Stream,
        _filename: &str,
    ) -> Result<SuppFilenames> {
        let mut supps = SuppFilenames::new();
        supps.insert(SuppItem::Fat, "doofus.exe".to_string());
        Ok(supps)
    }
}

pub fn open_doofus(
    content: Box<dyn Stream>,
    mut fat_supp: Box<dyn Stream>,
    filters: Rc<FilterRegistry>,
) -> Result<FatArchive<DoofusFormat>> {
    let off_fat = match fat_supp.size()? {
        EXE_LEN => EXE_FAT_OFFSET,
        FAT_LEN => 0,
        _ => return Err(Error::FormatCorrupt("unknown executable version".into())),
    };

    let exe = Rc::new(RefCell::new(SegStream::new(fat_supp)?));
    let window = SubStream::new(Rc::clone(&exe), off_fat, FAT_LEN);
    let mut fat = SegStream::new(Box::new(window))?;

    let mut core = FatCore::new(content, FIRST_FILE_OFFSET, None, filters)?;
    let archive_len = core.content().borrow_mut().len();

    let max_files = (FAT_LEN / FAT_ENTRY_LEN) as usize;
    let mut num_files = 0usize;
    let mut offset = 0u64;
    let mut entries = Vec::new();
    for slot in 0..max_files {
        let pos = slot as u64 * FAT_ENTRY_LEN;
        let stored = u64::from(fat.read_u16le_at(pos)?);
        if stored == 0 {
            continue;
        }
        let code = fat.read_u16le_at(pos + 2)?;

        let mut f = FileEntry::new();
        f.index = num_files as u32;
        f.offset = offset;
        f.stored_size = stored;
        f.real_size = stored;
        f.file_type = type_for_code(code);
        offset += stored;
        if offset > archive_len {
            return Err(Error::FormatCorrupt(
                "archive has been truncated or the table is corrupt".into(),
            ));
        }
        num_files += 1;
        entries.push(f);
    }
    for f in entries {
        core.add_parsed_entry(f);
    }

    Ok(FatArchive::new(
        core,
        DoofusFormat {
            fat,
            num_files,
            max_files,
        },
    ))
}

pub struct DoofusFormat {
    /// Segmented view of the table region inside the executable.
    fat: SegStream,
    num_files: usize,
    max_files: usize,
}

fn slot_pos(index: u32) -> u64 {
    u64::from(index) * FAT_ENTRY_LEN
}

impl FatFormat for DoofusFormat {
    fn update_size(&mut self, _core: &mut FatCore, entry: &FileHandle, _delta: i64) -> Result<()> {
        let (index, stored) = {
            let e = entry.borrow();
            (e.index, e.stored_size)
        };
        self.fat.write_u16le_at(slot_pos(index), stored as u16)?;
        Ok(())
    }

    fn pre_insert(
        &mut self,
        _core: &mut FatCore,
        _before: Option<&FileHandle>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        if self.num_files >= self.max_files {
            return Err(Error::FormatFull);
        }
        new_entry.header_len = 0;

        // Drop a vacant slot off the end so the table length stays fixed,
        // then make room for the new slot.
        let tail = self.fat.len() - FAT_ENTRY_LEN;
        self.fat.remove(tail, FAT_ENTRY_LEN)?;
        let pos = slot_pos(new_entry.index);
        self.fat.insert(pos, FAT_ENTRY_LEN)?;
        self.fat.write_u16le_at(pos, new_entry.stored_size as u16)?;
        self.fat
            .write_u16le_at(pos + 2, code_for_type(&new_entry.file_type))?;

        self.num_files += 1;
        Ok(())
    }

    fn pre_remove(&mut self, _core: &mut FatCore, entry: &FileHandle) -> Result<()> {
        self.fat
            .remove(slot_pos(entry.borrow().index), FAT_ENTRY_LEN)?;
        let end = self.fat.len();
        self.fat.insert(end, FAT_ENTRY_LEN)?;
        self.num_files -= 1;
        Ok(())
    }

    fn flush(&mut self, _core: &mut FatCore) -> Result<()> {
        // Sidecar first; the main stream commit follows.  A failure in
        // between leaves the pair inconsistent, which this format accepts.
        self.fat.commit()?;
        Ok(())
    }
}
