//! Little-endian field helpers for positioned streams.
//!
//! The DOS-era archive layouts this crate serves are built from exactly two
//! kinds of field: little-endian integers and fixed-length NUL-padded
//! strings.  These helpers read and write both at absolute positions.

use crate::error::{Error, Result};
use crate::store::Stream;
use byteorder::{ByteOrder, LittleEndian};

pub trait StreamExt: Stream {
    fn read_u8_at(&mut self, pos: u64) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact_at(pos, &mut b)?;
        Ok(b[0])
    }

    fn read_u16le_at(&mut self, pos: u64) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact_at(pos, &mut b)?;
        Ok(LittleEndian::read_u16(&b))
    }

    fn read_u32le_at(&mut self, pos: u64) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact_at(pos, &mut b)?;
        Ok(LittleEndian::read_u32(&b))
    }

    fn read_u64le_at(&mut self, pos: u64) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact_at(pos, &mut b)?;
        Ok(LittleEndian::read_u64(&b))
    }

    fn write_u8_at(&mut self, pos: u64, v: u8) -> Result<()> {
        self.write_at(pos, &[v])
    }

    fn write_u16le_at(&mut self, pos: u64, v: u16) -> Result<()> {
        let mut b = [0u8; 2];
        LittleEndian::write_u16(&mut b, v);
        self.write_at(pos, &b)
    }

    fn write_u32le_at(&mut self, pos: u64, v: u32) -> Result<()> {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, v);
        self.write_at(pos, &b)
    }

    fn write_u64le_at(&mut self, pos: u64, v: u64) -> Result<()> {
        let mut b = [0u8; 8];
        LittleEndian::write_u64(&mut b, v);
        self.write_at(pos, &b)
    }

    /// Read a `len`-byte field, returning the bytes before the first NUL.
    fn read_string_at(&mut self, pos: u64, len: usize) -> Result<String> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(pos, &mut buf)?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(len);
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }

    /// Write `s` NUL-padded to exactly `len` bytes.  Fails if `s` does not
    /// fit; a string of exactly `len` bytes is written without padding.
    fn write_string_at(&mut self, pos: u64, s: &str, len: usize) -> Result<()> {
        if s.len() > len {
            return Err(Error::StringTooLong {
                len: s.len(),
                max: len,
            });
        }
        let mut buf = vec![0u8; len];
        buf[..s.len()].copy_from_slice(s.as_bytes());
        self.write_at(pos, &buf)
    }

    fn read_bytes_at(&mut self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(pos, &mut buf)?;
        Ok(buf)
    }
}

impl<S: Stream + ?Sized> StreamExt for S {}
