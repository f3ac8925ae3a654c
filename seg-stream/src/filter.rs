//! Pluggable byte-stream transforms.
//!
//! A filter is a pair of whole-buffer transforms keyed by name: `decode`
//! turns stored bytes into their presented form, `encode` is the inverse.
//! Archives record a filter name on each entry; the table mapping names to
//! implementations is supplied by the caller, not process-wide state.

use crate::error::{Error, Result};
use crate::store::Stream;
use crate::sub::SubStream;
use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::rc::Rc;
use tracing::warn;

pub trait Filter {
    /// Decode stored bytes into their presented form.
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Encode presented bytes into their stored form.
    fn encode(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Name-to-filter table, injected into archive constructors.
#[derive(Default, Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, Rc<dyn Filter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, filter: Rc<dyn Filter>) {
        self.filters.insert(name.to_string(), filter);
    }

    pub fn get(&self, name: &str) -> Option<Rc<dyn Filter>> {
        self.filters.get(name).cloned()
    }
}

/// A sub-stream seen through a filter.
///
/// The stored bytes are decoded into memory when the stream is opened;
/// edits accumulate in the decoded buffer and are encoded back through the
/// window on [`FilteredStream::flush_encoded`].  The window is fixed size,
/// so an encode that changes length fails with
/// [`Error::FilterSizeChanged`]; the owner resizes the entry first.
pub struct FilteredStream {
    inner: SubStream,
    codec: Rc<dyn Filter>,
    buf: Vec<u8>,
    pos: u64,
    dirty: bool,
}

impl std::fmt::Debug for FilteredStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilteredStream")
            .field("inner", &self.inner)
            .field("pos", &self.pos)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl FilteredStream {
    pub fn open(mut inner: SubStream, codec: Rc<dyn Filter>) -> Result<Self> {
        let len = inner.size()? as usize;
        let mut raw = vec![0u8; len];
        inner.read_exact_at(0, &mut raw)?;
        let buf = codec.decode(&raw)?;
        Ok(Self {
            inner,
            codec,
            buf,
            pos: 0,
            dirty: false,
        })
    }

    /// Encode the buffered content and write it back through the window.
    pub fn flush_encoded(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let encoded = self.codec.encode(&self.buf)?;
        let expected = self.inner.size()?;
        if encoded.len() as u64 != expected {
            return Err(Error::FilterSizeChanged {
                expected,
                actual: encoded.len() as u64,
            });
        }
        self.inner.write_at(0, &encoded)?;
        self.dirty = false;
        Ok(())
    }

    /// Length of the decoded content.
    pub fn decoded_len(&self) -> u64 {
        self.buf.len() as u64
    }

    /// The sub-stream this filter writes through.
    pub fn inner(&self) -> &SubStream {
        &self.inner
    }
}

impl Read for FilteredStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.buf.len() as u64 {
            return Ok(0);
        }
        let pos = self.pos as usize;
        let n = buf.len().min(self.buf.len() - pos);
        buf[..n].copy_from_slice(&self.buf[pos..pos + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for FilteredStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let end = self.pos as usize + buf.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos as usize..end].copy_from_slice(buf);
        self.pos = end as u64;
        self.dirty = true;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_encoded().map_err(|e| match e {
            Error::Io(e) => e,
            other => io::Error::other(other),
        })
    }
}

impl Seek for FilteredStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => (self.buf.len() as u64).checked_add_signed(d),
        };
        match target {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of filtered stream",
            )),
        }
    }
}

impl Drop for FilteredStream {
    fn drop(&mut self) {
        if self.dirty {
            warn!("filtered stream dropped with unflushed changes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seg::SegStream;
    use crate::store::MemStream;
    use crate::sub::SharedStream;
    use std::cell::RefCell;

    struct Rot1;

    impl Filter for Rot1 {
        fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
            Ok(data.iter().map(|b| b.wrapping_add(1)).collect())
        }

        fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
            Ok(data.iter().map(|b| b.wrapping_sub(1)).collect())
        }
    }

    fn shared(data: &[u8]) -> SharedStream {
        Rc::new(RefCell::new(
            SegStream::new(Box::new(MemStream::from_vec(data.to_vec()))).unwrap(),
        ))
    }

    #[test]
    fn decode_on_open() {
        let parent = shared(b"``OSDE``");
        let sub = SubStream::new(parent, 2, 4);
        let mut f = FilteredStream::open(sub, Rc::new(Rot1)).unwrap();
        let mut s = String::new();
        f.read_to_string(&mut s).unwrap();
        assert_eq!(s, "PTEF");
    }

    #[test]
    fn encode_on_flush() {
        let parent = shared(b"\0\0\0\0");
        let sub = SubStream::new(Rc::clone(&parent), 0, 4);
        let mut f = FilteredStream::open(sub, Rc::new(Rot1)).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        f.write_all(b"ABCD").unwrap();
        f.flush_encoded().unwrap();

        let mut raw = [0u8; 4];
        parent.borrow_mut().read_at(0, &mut raw).unwrap();
        assert_eq!(&raw, b"@ABC");
    }

    #[test]
    fn size_change_is_rejected() {
        let parent = shared(b"1234");
        let sub = SubStream::new(parent, 0, 4);
        let mut f = FilteredStream::open(sub, Rc::new(Rot1)).unwrap();
        f.seek(SeekFrom::End(0)).unwrap();
        f.write_all(b"x").unwrap();
        assert!(matches!(
            f.flush_encoded(),
            Err(Error::FilterSizeChanged {
                expected: 4,
                actual: 5
            })
        ));
        // Quieten the drop warning.
        f.buf.truncate(4);
        f.flush_encoded().unwrap();
    }

    #[test]
    fn registry_lookup() {
        let mut reg = FilterRegistry::new();
        reg.register("rot1", Rc::new(Rot1));
        assert!(reg.get("rot1").is_some());
        assert!(reg.get("lzw-epfs").is_none());
    }
}
