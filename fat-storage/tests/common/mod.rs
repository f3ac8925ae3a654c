//! Shared helpers for the integration suites.
#![allow(dead_code)]

use seg_stream::{Result, Stream};
use std::cell::RefCell;
use std::rc::Rc;

/// A byte store the test keeps a handle on while the archive owns a clone,
/// so committed bytes can be inspected afterwards.
#[derive(Clone, Default)]
pub struct SharedMem(Rc<RefCell<Vec<u8>>>);

impl SharedMem {
    pub fn new(data: &[u8]) -> Self {
        Self(Rc::new(RefCell::new(data.to_vec())))
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }
}

impl Stream for SharedMem {
    fn size(&mut self) -> Result<u64> {
        Ok(self.0.borrow().len() as u64)
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.0.borrow();
        let len = data.len() as u64;
        if pos >= len {
            return Ok(0);
        }
        let n = buf.len().min((len - pos) as usize);
        let pos = pos as usize;
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        Ok(n)
    }

    fn write_at(&mut self, pos: u64, buf: &[u8]) -> Result<()> {
        let mut data = self.0.borrow_mut();
        let end = pos as usize + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[pos as usize..end].copy_from_slice(buf);
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.0.borrow_mut().resize(len as usize, 0);
        Ok(())
    }
}

/// Build a WAD image: header, packed file data, table at the end.
pub fn wad_image(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut payload = Vec::new();
    let mut fat = Vec::new();
    let mut off = 12u32;
    for (name, data) in files {
        fat.extend_from_slice(&off.to_le_bytes());
        fat.extend_from_slice(&(data.len() as u32).to_le_bytes());
        let mut n = name.as_bytes().to_vec();
        n.resize(8, 0);
        fat.extend_from_slice(&n);
        payload.extend_from_slice(data);
        off += data.len() as u32;
    }
    let mut out = b"IWAD".to_vec();
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    out.extend_from_slice(&off.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&fat);
    out
}

/// Build a GRP image: signature header, table, packed file data.
pub fn grp_image(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = b"KenSilverman".to_vec();
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    for (name, data) in files {
        let mut n = name.as_bytes().to_vec();
        n.resize(12, 0);
        out.extend_from_slice(&n);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    }
    for (_, data) in files {
        out.extend_from_slice(data);
    }
    out
}

/// Build an EPF image: header, packed data, description, table at the end.
pub fn epf_image(files: &[(&str, &[u8])], desc: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    let mut fat = Vec::new();
    for (name, data) in files {
        let mut n = name.as_bytes().to_vec();
        n.resize(13, 0);
        fat.extend_from_slice(&n);
        fat.push(0);
        fat.extend_from_slice(&(data.len() as u32).to_le_bytes());
        fat.extend_from_slice(&(data.len() as u32).to_le_bytes());
        payload.extend_from_slice(data);
    }
    let off_fat = 11 + payload.len() as u32 + desc.len() as u32;
    let mut out = b"EPFS".to_vec();
    out.extend_from_slice(&off_fat.to_le_bytes());
    out.push(0);
    out.extend_from_slice(&(files.len() as u16).to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(desc.as_bytes());
    out.extend_from_slice(&fat);
    out
}

/// Build a Monster Bash DAT image of embedded-header entries.
/// Each file: (type code, native name, payload, decompressed size).
pub fn bash_image(files: &[(u16, &str, &[u8], u16)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (code, name, data, real) in files {
        out.extend_from_slice(&code.to_le_bytes());
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        let mut n = name.as_bytes().to_vec();
        n.resize(31, 0);
        out.extend_from_slice(&n);
        out.extend_from_slice(&real.to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}

/// Build an encrypted (v0x301) RFF image.  Payloads are given in
/// plaintext; encrypted entries are stored through the xor-blood cipher
/// and the whole table is obfuscated with the table-offset key.
pub fn rff_v301_image(files: &[(&str, &[u8], bool)]) -> Vec<u8> {
    use fat_storage::filters::RffCrypt;

    let mut payload = Vec::new();
    let mut fat = Vec::new();
    let mut off = 32u32;
    for (name, data, encrypted) in files {
        let mut stored = data.to_vec();
        if *encrypted {
            RffCrypt::apply(0, &mut stored);
        }

        let (base, ext) = match name.rfind('.') {
            Some(dot) => (&name[..dot], &name[dot + 1..]),
            None => (*name, ""),
        };
        fat.extend_from_slice(&[0u8; 16]);
        fat.extend_from_slice(&off.to_le_bytes());
        fat.extend_from_slice(&(stored.len() as u32).to_le_bytes());
        fat.extend_from_slice(&[0u8; 8]);
        fat.push(if *encrypted { 0x10 } else { 0 });
        let mut e = ext.as_bytes().to_vec();
        e.resize(3, 0);
        fat.extend_from_slice(&e);
        let mut b = base.as_bytes().to_vec();
        b.resize(8, 0);
        fat.extend_from_slice(&b);
        fat.extend_from_slice(&[0u8; 4]);

        off += stored.len() as u32;
        payload.extend_from_slice(&stored);
    }

    let off_fat = off;
    RffCrypt::apply((off_fat & 0xff) as u8, &mut fat);

    let mut out = b"RFF\x1a".to_vec();
    out.extend_from_slice(&0x0301u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&off_fat.to_le_bytes());
    out.extend_from_slice(&(files.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(&payload);
    out.extend_from_slice(&fat);
    out
}
