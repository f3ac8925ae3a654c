//! Monster Bash .DAT archives.
//!
//! No global header: the archive is a run of 37-byte embedded table
//! entries, each followed directly by its payload.  Entry layout: u16le
//! type code, u16le stored size, 31-byte null-padded name, u16le
//! decompressed size (0 means uncompressed, anything else means the
//! payload is `lzw-bash`-compressed).  Type codes stand in for file
//! extensions; the native name is stored without one.

use crate::archive::Archive;
use crate::entry::{Attributes, FileEntry, FileHandle, FILETYPE_GENERIC};
use crate::error::{Error, Result};
use crate::fat::{FatArchive, FatCore, FatFormat};
use crate::registry::{ArchiveType, Certainty, SuppData};
use seg_stream::{FilterRegistry, Stream, StreamExt};
use std::rc::Rc;

const EFAT_ENTRY_LEN: u64 = 37;
const FILENAME_FIELD_LEN: usize = 31;
const MAX_FILENAME_LEN: usize = 30;
const FIRST_FILE_OFFSET: u64 = 0;

const TYPE_GENERIC: u16 = 32;
const COMPRESSION_FILTER: &str = "lzw-bash";

/// Type code to extension and media-type tag, one-to-one.
const TYPE_TABLE: &[(u16, &str, &str)] = &[
    (0, "mif", "map/bash-info"),
    (1, "mbg", "map/bash-bg"),
    (2, "mfg", "map/bash-fg"),
    (3, "tbg", "image/bash-tiles-bg"),
    (4, "tfg", "image/bash-tiles-fg"),
    (5, "tbn", "image/bash-tiles-bonus"),
    (6, "sgl", "image/bash-sgl"),
    (7, "msp", "map/bash-sprites"),
    (8, "snd", "sound/bash"),
    (12, "pbg", "image/bash-planar-bg"),
    (13, "pfg", "image/bash-planar-fg"),
    (14, "pal", "image/bash-palette"),
    (16, "pbn", "image/bash-planar-bonus"),
    (64, "spr", "image/bash-sprite"),
];

fn type_for_code(code: u16) -> Option<&'static (u16, &'static str, &'static str)> {
    TYPE_TABLE.iter().find(|(c, _, _)| *c == code)
}

/// Split a presented name into its type code and native (extensionless)
/// name.  Unrecognised extensions fall back to the generic code with the
/// name kept verbatim.
fn code_for_name(name: &str) -> (u16, String) {
    if let Some(dot) = name.rfind('.') {
        let ext = &name[dot + 1..];
        for (code, known_ext, _) in TYPE_TABLE {
            if ext.eq_ignore_ascii_case(known_ext) {
                return (*code, name[..dot].to_string());
            }
        }
    }
    (TYPE_GENERIC, name.to_string())
}

pub struct BashType {
    filters: Rc<FilterRegistry>,
}

impl BashType {
    pub fn new(filters: Rc<FilterRegistry>) -> Self {
        Self { filters }
    }
}

impl ArchiveType for BashType {
    fn code(&self) -> &'static str {
        "dat-bash"
    }

    fn friendly_name(&self) -> &'static str {
        "Monster Bash DAT File"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["dat"]
    }

    fn games(&self) -> &'static [&'static str] {
        &["Monster Bash"]
    }

    fn is_instance(&self, content: &mut dyn Stream) -> Result<Certainty> {
        let len = content.size()?;
        let mut pos = 0u64;
        while pos < len {
            if pos + EFAT_ENTRY_LEN > len {
                return Ok(Certainty::DefinitelyNo);
            }
            let stored = u64::from(content.read_u16le_at(pos + 2)?);
            let name = content.read_bytes_at(pos + 4, FILENAME_FIELD_LEN)?;
            for &b in &name {
                if b == 0 {
                    break;
                }
                if b < 32 {
                    return Ok(Certainty::DefinitelyNo);
                }
            }
            pos += EFAT_ENTRY_LEN + stored;
            if pos > len {
                return Ok(Certainty::DefinitelyNo);
            }
        }
        if len == 0 {
            // An empty stream is a valid empty archive, but so it is for
            // every headerless format.
            return Ok(Certainty::PossiblyYes);
        }
        Ok(Certainty::DefinitelyYes)
    }

    fn open(&self, content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        Ok(Box::new(open_bash(content, Rc::clone(&self.filters))?))
    }

    fn create(&self, content: Box<dyn Stream>, _supps: SuppData) -> Result<Box<dyn Archive>> {
        self.open(content, SuppData::new())
    }
}

pub fn open_bash(
    content: Box<dyn Stream>,
    filters: Rc<FilterRegistry>,
) -> Result<FatArchive<BashFormat>> {
    let mut core = FatCore::new(content, FIRST_FILE_OFFSET, Some(MAX_FILENAME_LEN), filters)?;

    let mut entries = Vec::new();
    {
        let content = Rc::clone(core.content());
        let mut content = content.borrow_mut();
        let len = content.len();

        let mut pos = 0u64;
        let mut index = 0u32;
        while pos < len {
            if pos + EFAT_ENTRY_LEN > len {
                return Err(Error::FormatCorrupt(
                    "truncated embedded table entry".into(),
                ));
            }
            let mut f = FileEntry::new();
            f.index = index;
            f.offset = pos;
            f.header_len = EFAT_ENTRY_LEN;
            let code = content.read_u16le_at(pos)?;
            f.stored_size = u64::from(content.read_u16le_at(pos + 2)?);
            f.name = content.read_string_at(pos + 4, FILENAME_FIELD_LEN)?;
            let real = u64::from(content.read_u16le_at(pos + 35)?);
            if real != 0 {
                f.attrs.insert(Attributes::COMPRESSED);
                f.filter = COMPRESSION_FILTER.to_string();
                f.real_size = real;
            } else {
                f.real_size = f.stored_size;
            }

            match type_for_code(code) {
                Some((_, ext, tag)) => {
                    if !f.name.to_ascii_lowercase().ends_with(&format!(".{ext}")) {
                        f.name = format!("{}.{}", f.name, ext);
                    }
                    f.file_type = tag.to_string();
                }
                None if code == TYPE_GENERIC => {
                    f.file_type = FILETYPE_GENERIC.to_string();
                }
                None => {
                    f.name = format!("{}.{}", f.name, code);
                    f.file_type = format!("unknown/bash-{code}");
                }
            }

            pos += EFAT_ENTRY_LEN + f.stored_size;
            if pos > len {
                return Err(Error::FormatCorrupt(
                    "file data runs past the end of the archive".into(),
                ));
            }
            index += 1;
            entries.push(f);
        }
    }
    for f in entries {
        core.add_parsed_entry(f);
    }

    Ok(FatArchive::new(core, BashFormat))
}

pub struct BashFormat;

impl FatFormat for BashFormat {
    fn update_name(&mut self, core: &mut FatCore, entry: &FileHandle, name: &str) -> Result<()> {
        let offset = entry.borrow().offset;
        let (code, native) = code_for_name(name);
        let content = Rc::clone(core.content());
        let mut content = content.borrow_mut();
        content.write_u16le_at(offset, code)?;
        content.write_string_at(offset + 4, &native, FILENAME_FIELD_LEN)?;
        Ok(())
    }

    fn update_size(&mut self, core: &mut FatCore, entry: &FileHandle, _delta: i64) -> Result<()> {
        let (offset, stored, real, compressed) = {
            let e = entry.borrow();
            (
                e.offset,
                e.stored_size,
                e.real_size,
                e.attrs.contains(Attributes::COMPRESSED),
            )
        };
        let content = Rc::clone(core.content());
        let mut content = content.borrow_mut();
        content.write_u16le_at(offset + 2, stored as u16)?;
        content.write_u16le_at(offset + 35, if compressed { real as u16 } else { 0 })?;
        Ok(())
    }

    fn pre_insert(
        &mut self,
        core: &mut FatCore,
        _before: Option<&FileHandle>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        new_entry.header_len = EFAT_ENTRY_LEN;
        new_entry.name.make_ascii_uppercase();
        if new_entry.attrs.contains(Attributes::COMPRESSED) {
            new_entry.filter = COMPRESSION_FILTER.to_string();
        }

        core.content()
            .borrow_mut()
            .insert(new_entry.offset, EFAT_ENTRY_LEN)?;
        // The embedded header displaced everything behind it; the header
        // fields themselves are written once the payload bytes exist.
        core.shift_files(self, None, new_entry.offset, EFAT_ENTRY_LEN as i64, 0)?;
        Ok(())
    }

    fn post_insert(&mut self, core: &mut FatCore, new_entry: &FileHandle) -> Result<()> {
        let (offset, name, stored, real, compressed) = {
            let e = new_entry.borrow();
            (
                e.offset,
                e.name.clone(),
                e.stored_size,
                e.real_size,
                e.attrs.contains(Attributes::COMPRESSED),
            )
        };
        let (code, native) = code_for_name(&name);
        let content = Rc::clone(core.content());
        let mut content = content.borrow_mut();
        content.write_u16le_at(offset, code)?;
        content.write_u16le_at(offset + 2, stored as u16)?;
        content.write_string_at(offset + 4, &native, FILENAME_FIELD_LEN)?;
        content.write_u16le_at(offset + 35, if compressed { real as u16 } else { 0 })?;
        Ok(())
    }

    fn supported_attrs(&self, _core: &FatCore) -> Attributes {
        Attributes::COMPRESSED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seg_stream::MemStream;

    pub(crate) fn entry(code: u16, name: &str, payload: &[u8], real: u16) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&code.to_le_bytes());
        data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        let mut n = name.as_bytes().to_vec();
        n.resize(FILENAME_FIELD_LEN, 0);
        data.extend_from_slice(&n);
        data.extend_from_slice(&real.to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn maps_type_codes_to_extensions() {
        let mut data = entry(0, "FOO", b"info", 0);
        data.extend_from_slice(&entry(64, "GUY", b"sprite!", 0));
        data.extend_from_slice(&entry(32, "RAW.TXT", b"txt", 0));

        let arch = open_bash(
            Box::new(MemStream::from_vec(data)),
            Rc::new(FilterRegistry::new()),
        )
        .unwrap();
        let files = arch.files();
        assert_eq!(files[0].borrow().name, "FOO.mif");
        assert_eq!(files[0].borrow().file_type, "map/bash-info");
        assert_eq!(files[1].borrow().name, "GUY.spr");
        assert_eq!(files[2].borrow().name, "RAW.TXT");
        assert_eq!(files[2].borrow().file_type, FILETYPE_GENERIC);
    }

    #[test]
    fn nonzero_real_size_means_compressed() {
        let data = entry(8, "BOOM.SND", b"\x12\x34", 100);
        let arch = open_bash(
            Box::new(MemStream::from_vec(data)),
            Rc::new(FilterRegistry::new()),
        )
        .unwrap();
        let f = &arch.files()[0];
        assert!(f.borrow().attrs.contains(Attributes::COMPRESSED));
        assert_eq!(f.borrow().filter, "lzw-bash");
        assert_eq!(f.borrow().stored_size, 2);
        assert_eq!(f.borrow().real_size, 100);
    }

    #[test]
    fn code_name_round_trip() {
        assert_eq!(code_for_name("LEVEL.MIF"), (0, "LEVEL".to_string()));
        assert_eq!(code_for_name("LEVEL.mif"), (0, "LEVEL".to_string()));
        assert_eq!(code_for_name("SPRITE.SPR"), (64, "SPRITE".to_string()));
        assert_eq!(code_for_name("PLAIN.TXT"), (32, "PLAIN.TXT".to_string()));
        assert_eq!(code_for_name("NOEXT"), (32, "NOEXT".to_string()));
    }

    #[test]
    fn sniff_walks_entries() {
        let t = BashType::new(Rc::new(FilterRegistry::new()));
        let mut good = MemStream::from_vec(entry(0, "FOO", b"payload", 0));
        assert_eq!(t.is_instance(&mut good).unwrap(), Certainty::DefinitelyYes);

        let mut bad_name = entry(0, "FOO", b"payload", 0);
        bad_name[5] = 0x07;
        let mut m = MemStream::from_vec(bad_name);
        assert_eq!(t.is_instance(&mut m).unwrap(), Certainty::DefinitelyNo);

        let mut truncated = entry(0, "FOO", b"payload", 0);
        truncated.truncate(truncated.len() - 2);
        let mut m = MemStream::from_vec(truncated);
        assert_eq!(t.is_instance(&mut m).unwrap(), Certainty::DefinitelyNo);
    }
}
