//! Bounded, relocatable views into a shared segmented stream.
//!
//! A [`SubStream`] exposes one window of a parent stream as an independent
//! read/write handle.  The window itself is shared (`Rc<RefCell<Window>>`)
//! with whoever owns the parent stream, so the owner can slide or resize
//! the window underneath a live handle: this is how an archive keeps every
//! open sub-file valid while bytes shift around it.

use crate::error::{Error, Result};
use crate::seg::SegStream;
use crate::store::Stream;
use std::cell::RefCell;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::rc::Rc;

/// Shared handle to a segmented stream.
pub type SharedStream = Rc<RefCell<SegStream>>;

/// The region of the parent stream a [`SubStream`] exposes.
#[derive(Debug)]
pub struct Window {
    pub offset: u64,
    pub len: u64,
    /// Set when the backing entry is gone; reads return nothing and writes
    /// fail, but the handle itself stays safe to use.
    pub orphaned: bool,
}

impl Window {
    /// Slide the window by `delta` bytes.
    pub fn relocate(&mut self, delta: i64) {
        self.offset = self.offset.wrapping_add_signed(delta);
    }

    /// Change the window length.
    pub fn set_size(&mut self, len: u64) {
        self.len = len;
    }
}

pub struct SubStream {
    parent: SharedStream,
    window: Rc<RefCell<Window>>,
    pos: u64,
}

impl std::fmt::Debug for SubStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubStream")
            .field("window", &self.window)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

impl SubStream {
    pub fn new(parent: SharedStream, offset: u64, len: u64) -> Self {
        Self {
            parent,
            window: Rc::new(RefCell::new(Window {
                offset,
                len,
                orphaned: false,
            })),
            pos: 0,
        }
    }

    /// The shared window, for the owner coordinating relocations.
    pub fn window(&self) -> Rc<RefCell<Window>> {
        Rc::clone(&self.window)
    }

    /// Current offset of the window within the parent stream.
    pub fn offset(&self) -> u64 {
        self.window.borrow().offset
    }

    pub fn len(&self) -> u64 {
        self.window.borrow().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_orphaned(&self) -> bool {
        self.window.borrow().orphaned
    }
}

fn to_io(e: Error) -> io::Error {
    match e {
        Error::Io(e) => e,
        other => io::Error::other(other),
    }
}

impl Read for SubStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (offset, len, orphaned) = {
            let w = self.window.borrow();
            (w.offset, w.len, w.orphaned)
        };
        if orphaned || self.pos >= len {
            return Ok(0);
        }
        let n = buf.len().min((len - self.pos) as usize);
        let read = self
            .parent
            .borrow_mut()
            .read_at(offset + self.pos, &mut buf[..n])
            .map_err(to_io)?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Write for SubStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (offset, len, orphaned) = {
            let w = self.window.borrow();
            (w.offset, w.len, w.orphaned)
        };
        if orphaned || self.pos + buf.len() as u64 > len {
            return Err(io::Error::other(Error::WriteBeyondEnd {
                pos: self.pos,
                len: buf.len() as u64,
                size: len,
            }));
        }
        self.parent
            .borrow_mut()
            .write_at(offset + self.pos, buf)
            .map_err(to_io)?;
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for SubStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.len();
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => len.checked_add_signed(d),
        };
        match target {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of sub-stream",
            )),
        }
    }
}

impl Stream for SubStream {
    fn size(&mut self) -> Result<u64> {
        Ok(self.window.borrow().len)
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let (offset, len, orphaned) = {
            let w = self.window.borrow();
            (w.offset, w.len, w.orphaned)
        };
        if orphaned || pos >= len {
            return Ok(0);
        }
        let n = buf.len().min((len - pos) as usize);
        self.parent.borrow_mut().read_at(offset + pos, &mut buf[..n])
    }

    fn write_at(&mut self, pos: u64, buf: &[u8]) -> Result<()> {
        let (offset, len, orphaned) = {
            let w = self.window.borrow();
            (w.offset, w.len, w.orphaned)
        };
        if orphaned || pos + buf.len() as u64 > len {
            return Err(Error::WriteBeyondEnd {
                pos,
                len: buf.len() as u64,
                size: len,
            });
        }
        self.parent.borrow_mut().write_at(offset + pos, buf)
    }

    fn truncate(&mut self, _len: u64) -> Result<()> {
        Err(Error::TruncateUnsupported)
    }
}
