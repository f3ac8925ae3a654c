//! Blood .RFF archives (Monolith Resource File Format).
//!
//! 32-byte header: `"RFF\x1a"`, u16le version (0x200 or 0x301), u16le
//! unknown, u32le table offset, u32le file count, 16 reserved bytes.  The
//! table sits after the file data, one 48-byte entry per file; names are
//! stored as a 3-byte extension followed by an 8-byte base and presented
//! as `BASE.EXT`.  From version 0x301 the table is XOR-obfuscated with the
//! keystream seeded by `offFAT & 0xFF`, and individual files may be
//! encrypted with the same cipher (flag bit 4, filter `xor-blood`).
//!
//! The table is held decrypted in an in-memory segmented stream while the
//! archive is open; hooks edit that mirror and the whole table is written
//! back (re-encrypted if need be) on flush.

use crate::archive::Archive;
use crate::attribute::Attribute;
use crate::entry::{Attributes, FileEntry, FileHandle};
use crate::error::{Error, Result};
use crate::fat::{FatArchive, FatCore, FatFormat, STD_DOS_FILENAME_LEN};
use crate::filters::RffCrypt;
use crate::registry::{ArchiveType, Certainty, SuppData};
use seg_stream::{FilterRegistry, MemStream, SegStream, Stream, StreamExt};
use std::rc::Rc;

const HEADER_LEN: u64 = 32;
const VERSION_OFFSET: u64 = 4;
const FATOFFSET_OFFSET: u64 = 8;
const FILECOUNT_OFFSET: u64 = 12;
const FAT_ENTRY_LEN: u64 = 48;
const FIRST_FILE_OFFSET: u64 = HEADER_LEN;

const VERSION_V2: u16 = 0x200;
const VERSION_V3: u16 = 0x301;

const FLAG_ENCRYPTED: u8 = 0x10;
const CRYPT_FILTER: &str = "xor-blood";

const SAFETY_MAX_FILECOUNT: u32 = 8192;

pub struct RffType {
    filters: Rc<FilterRegistry>,
}

impl RffType {
    pub fn new(filters: Rc<FilterRegistry>) -> Self {
        Self { filters }
    }
}

impl ArchiveType for RffType {
    fn code(&self) -> &'static str {
        "rff-blood"
    }

    fn friendly_name(&self) -> &'static str {
        "Monolith Resource File Format"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["rff"]
    }

    fn games(&self) -> &'static [&'static str] {
        &["Blood"]
    }

    fn is_instance(&self, content: &mut dyn Stream) -> Result<Certainty> {
        if content.size()? < HEADER_LEN {
            return Ok(Certainty::DefinitelyNo);
        }
        if content.read_bytes_at(0, 4)? == b"RFF\x1a" {
            return Ok(Certainty::DefinitelyYes);
        }
        Ok(Certainty::DefinitelyNo)
    }

    fn open(&self, content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        Ok(Box::new(open_rff(content, Rc::clone(&self.filters))?))
    }

    fn create(&self, mut content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        content.write_at(0, b"RFF\x1a")?;
        content.write_u16le_at(VERSION_OFFSET, VERSION_V2)?;
        content.write_u16le_at(6, 0)?;
        content.write_u32le_at(FATOFFSET_OFFSET, HEADER_LEN as u32)?;
        content.write_u32le_at(FILECOUNT_OFFSET, 0)?;
        content.write_at(16, &[0u8; 16])?;
        self.open(content, SuppData::new())
    }
}

pub fn open_rff(
    content: Box<dyn Stream>,
    filters: Rc<FilterRegistry>,
) -> Result<FatArchive<RffFormat>> {
    let mut core = FatCore::new(
        content,
        FIRST_FILE_OFFSET,
        Some(STD_DOS_FILENAME_LEN),
        filters,
    )?;

    let version;
    let mut fat_bytes;
    {
        let content = Rc::clone(core.content());
        let mut content = content.borrow_mut();

        if content.len() < HEADER_LEN {
            return Err(Error::FormatCorrupt("file too short".into()));
        }
        version = content.read_u16le_at(VERSION_OFFSET)?;
        if version != VERSION_V2 && version != VERSION_V3 {
            return Err(Error::FormatCorrupt(format!(
                "unknown RFF version {version:#x}"
            )));
        }
        let off_fat = u64::from(content.read_u32le_at(FATOFFSET_OFFSET)?);
        let num_files = content.read_u32le_at(FILECOUNT_OFFSET)?;
        if num_files >= SAFETY_MAX_FILECOUNT {
            return Err(Error::FormatCorrupt(
                "too many files or corrupted archive".into(),
            ));
        }
        let fat_len = u64::from(num_files) * FAT_ENTRY_LEN;
        if off_fat + fat_len > content.len() {
            return Err(Error::FormatCorrupt(
                "file table runs past the end of the archive".into(),
            ));
        }

        fat_bytes = content.read_bytes_at(off_fat, fat_len as usize)?;
        if version >= VERSION_V3 {
            RffCrypt::apply((off_fat & 0xff) as u8, &mut fat_bytes);
        }
    }

    let num_files = fat_bytes.len() as u64 / FAT_ENTRY_LEN;
    let mut fat = SegStream::new(Box::new(MemStream::from_vec(fat_bytes)))?;

    let mut entries = Vec::new();
    for i in 0..num_files {
        let pos = i * FAT_ENTRY_LEN;
        let mut f = FileEntry::new();
        f.index = i as u32;
        f.offset = u64::from(fat.read_u32le_at(pos + 16)?);
        f.stored_size = u64::from(fat.read_u32le_at(pos + 20)?);
        f.real_size = f.stored_size;
        let flags = fat.read_u8_at(pos + 32)?;
        let ext = fat.read_string_at(pos + 33, 3)?;
        let base = fat.read_string_at(pos + 36, 8)?;
        f.name = if ext.is_empty() {
            base
        } else {
            format!("{base}.{ext}")
        };
        if flags & FLAG_ENCRYPTED != 0 {
            f.attrs.insert(Attributes::ENCRYPTED);
            f.filter = CRYPT_FILTER.to_string();
        }
        entries.push(f);
    }
    for f in entries {
        core.add_parsed_entry(f);
    }

    core.push_attribute(Attribute::enumeration(
        "Version",
        "File version",
        vec![
            "v2.0 - no encryption".to_string(),
            "v3.1 - selectable encryption".to_string(),
        ],
        if version == VERSION_V2 { 0 } else { 1 },
    ));

    Ok(FatArchive::new(
        core,
        RffFormat {
            fat,
            version,
            modified_fat: false,
        },
    ))
}

/// Split `NAME.EXT` into base and extension, enforcing 8.3.
fn split_filename(full: &str) -> Result<(String, String)> {
    let bad = || Error::NameInvalid(format!("\"{full}\" is not a valid 8.3 filename"));
    match full.rfind('.') {
        None => {
            if full.len() > 8 {
                return Err(bad());
            }
            Ok((full.to_string(), String::new()))
        }
        Some(dot) => {
            let (base, ext) = (&full[..dot], &full[dot + 1..]);
            if base.len() > 8 || ext.len() > 3 {
                return Err(bad());
            }
            Ok((base.to_string(), ext.to_string()))
        }
    }
}

pub struct RffFormat {
    /// Decrypted table mirror; rewritten into the archive on flush.
    fat: SegStream,
    version: u16,
    modified_fat: bool,
}

fn slot_pos(index: u32) -> u64 {
    u64::from(index) * FAT_ENTRY_LEN
}

impl FatFormat for RffFormat {
    fn update_name(&mut self, _core: &mut FatCore, entry: &FileHandle, name: &str) -> Result<()> {
        let (base, ext) = split_filename(name)?;
        let pos = slot_pos(entry.borrow().index);
        self.fat.write_string_at(pos + 33, &ext, 3)?;
        self.fat.write_string_at(pos + 36, &base, 8)?;
        self.modified_fat = true;
        Ok(())
    }

    fn update_offset(&mut self, _core: &mut FatCore, entry: &FileHandle, _delta: i64) -> Result<()> {
        let (index, offset) = {
            let e = entry.borrow();
            (e.index, e.offset)
        };
        self.fat.write_u32le_at(slot_pos(index) + 16, offset as u32)?;
        self.modified_fat = true;
        Ok(())
    }

    fn update_size(&mut self, _core: &mut FatCore, entry: &FileHandle, _delta: i64) -> Result<()> {
        let (index, stored) = {
            let e = entry.borrow();
            (e.index, e.stored_size)
        };
        self.fat.write_u32le_at(slot_pos(index) + 20, stored as u32)?;
        self.modified_fat = true;
        Ok(())
    }

    fn pre_insert(
        &mut self,
        _core: &mut FatCore,
        _before: Option<&FileHandle>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        new_entry.header_len = 0;

        let mut flags = 0u8;
        if new_entry.attrs.contains(Attributes::ENCRYPTED) {
            if self.version < VERSION_V3 {
                return Err(Error::Unsupported(
                    "this RFF version does not support encryption",
                ));
            }
            new_entry.filter = CRYPT_FILTER.to_string();
            flags |= FLAG_ENCRYPTED;
        }

        new_entry.name.make_ascii_uppercase();
        let (base, ext) = split_filename(&new_entry.name)?;

        // The slot must exist before the core renumbers the entries that
        // follow, or their offset updates land in the wrong rows.
        let pos = slot_pos(new_entry.index);
        self.fat.insert(pos, FAT_ENTRY_LEN)?;
        self.fat.write_u32le_at(pos + 16, new_entry.offset as u32)?;
        self.fat
            .write_u32le_at(pos + 20, new_entry.stored_size as u32)?;
        self.fat.write_u8_at(pos + 32, flags)?;
        self.fat.write_string_at(pos + 33, &ext, 3)?;
        self.fat.write_string_at(pos + 36, &base, 8)?;

        self.modified_fat = true;
        Ok(())
    }

    fn post_insert(&mut self, core: &mut FatCore, _new_entry: &FileHandle) -> Result<()> {
        let count = core.entry_count();
        Ok(core.content()
            .borrow_mut()
            .write_u32le_at(FILECOUNT_OFFSET, count as u32)?)
    }

    fn pre_remove(&mut self, _core: &mut FatCore, entry: &FileHandle) -> Result<()> {
        self.fat
            .remove(slot_pos(entry.borrow().index), FAT_ENTRY_LEN)?;
        self.modified_fat = true;
        Ok(())
    }

    fn post_remove(&mut self, core: &mut FatCore, _entry: &FileHandle) -> Result<()> {
        let count = core.entry_count();
        Ok(core.content()
            .borrow_mut()
            .write_u32le_at(FILECOUNT_OFFSET, count as u32)?)
    }

    fn attribute_changed(&mut self, core: &mut FatCore, index: usize) -> Result<()> {
        if index != 0 {
            return Ok(());
        }
        let target = match core.attributes()[0].enum_value() {
            Some(0) => VERSION_V2,
            _ => VERSION_V3,
        };
        if target < VERSION_V3 {
            let encrypted = core
                .entries()
                .iter()
                .any(|e| e.borrow().attrs.contains(Attributes::ENCRYPTED));
            if encrypted {
                return Err(Error::Unsupported(
                    "cannot change to this RFF version while the archive contains \
                     encrypted files",
                ));
            }
        }
        self.version = target;
        {
            let content = Rc::clone(core.content());
            let mut content = content.borrow_mut();
            content.write_u16le_at(VERSION_OFFSET, target)?;
            content.write_u16le_at(6, 0)?;
        }
        core.attributes_mut()[0].changed = false;
        Ok(())
    }

    fn supported_attrs(&self, _core: &FatCore) -> Attributes {
        if self.version >= VERSION_V3 {
            Attributes::ENCRYPTED
        } else {
            Attributes::NONE
        }
    }

    fn flush(&mut self, core: &mut FatCore) -> Result<()> {
        if !self.modified_fat {
            return Ok(());
        }

        let off_fat = core
            .last_entry()
            .map(|e| e.borrow().end_offset())
            .unwrap_or(FIRST_FILE_OFFSET);

        let fat_len = self.fat.len();
        let mut fat_bytes = vec![0u8; fat_len as usize];
        self.fat.read_exact_at(0, &mut fat_bytes)?;
        if self.version >= VERSION_V3 {
            RffCrypt::apply((off_fat & 0xff) as u8, &mut fat_bytes);
        }

        let content = Rc::clone(core.content());
        let mut content = content.borrow_mut();
        content.write_u32le_at(FATOFFSET_OFFSET, off_fat as u32)?;

        // Grow or shrink the tail so the archive ends right after the table.
        let end = off_fat + fat_len;
        let len = content.len();
        if end > len {
            content.insert(off_fat, end - len)?;
        } else if end < len {
            content.remove(off_fat, len - end)?;
        }
        content.write_at(off_fat, &fat_bytes)?;

        self.modified_fat = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seg_stream::MemStream;

    #[test]
    fn split_enforces_eight_three() {
        assert_eq!(
            split_filename("ONE.DAT").unwrap(),
            ("ONE".to_string(), "DAT".to_string())
        );
        assert_eq!(
            split_filename("NODOT").unwrap(),
            ("NODOT".to_string(), String::new())
        );
        assert!(split_filename("WAYTOOLONGBASE.DAT").is_err());
        assert!(split_filename("NAME.LONG").is_err());
        assert!(split_filename("NODOTBUTLONG").is_err());
    }

    #[test]
    fn sniffs_signature() {
        let t = RffType::new(Rc::new(FilterRegistry::new()));
        let mut header = b"RFF\x1a".to_vec();
        header.resize(HEADER_LEN as usize, 0);
        header[4] = 0x00;
        header[5] = 0x02;
        header[8] = 0x20;
        let mut m = MemStream::from_vec(header);
        assert_eq!(t.is_instance(&mut m).unwrap(), Certainty::DefinitelyYes);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut header = b"RFF\x1a".to_vec();
        header.resize(HEADER_LEN as usize, 0);
        header[4] = 0x05; // version 0x0005
        let err = open_rff(
            Box::new(MemStream::from_vec(header)),
            Rc::new(FilterRegistry::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::FormatCorrupt(_)));
    }
}
