//! Segmented stream: mid-stream insertion and removal without rewriting.
//!
//! A [`SegStream`] wraps a backing [`Stream`] and tracks the logical
//! content as a list of segments, each either a range of the backing store
//! (still sitting at its original position) or a buffer held in memory.
//! Inserting or removing a byte range only splits the segment list, so a
//! sequence of edits costs nothing until [`SegStream::commit`] materialises
//! the result back into the store.
//!
//! Writes into a backing-range segment go straight through to the store at
//! the range's *source* position; the bytes are carried to their final
//! position by the commit.  Writes into a memory segment stay in memory.

use crate::error::{Error, Result};
use crate::store::Stream;
use tracing::{debug, trace};

const COPY_CHUNK: usize = 64 * 1024;

enum Segment {
    /// A range of the backing store, not yet moved from `src`.
    Backing { src: u64, len: u64 },
    /// Bytes held in memory until the next commit.
    Memory(Vec<u8>),
}

impl Segment {
    fn len(&self) -> u64 {
        match self {
            Segment::Backing { len, .. } => *len,
            Segment::Memory(bytes) => bytes.len() as u64,
        }
    }
}

pub struct SegStream {
    store: Box<dyn Stream>,
    segments: Vec<Segment>,
}

impl SegStream {
    pub fn new(mut store: Box<dyn Stream>) -> Result<Self> {
        let size = store.size()?;
        Ok(Self {
            store,
            segments: vec![Segment::Backing { src: 0, len: size }],
        })
    }

    /// Logical length of the stream, including uncommitted edits.
    pub fn len(&self) -> u64 {
        self.segments.iter().map(Segment::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split segments so that a boundary falls exactly at `pos`, returning
    /// the index of the first segment starting at `pos`.
    fn split_at(&mut self, pos: u64) -> usize {
        let mut start = 0u64;
        for i in 0..self.segments.len() {
            if pos == start {
                return i;
            }
            let len = self.segments[i].len();
            if pos < start + len {
                let head = pos - start;
                let tail = match &mut self.segments[i] {
                    Segment::Backing { src, len } => {
                        let t = Segment::Backing {
                            src: *src + head,
                            len: *len - head,
                        };
                        *len = head;
                        t
                    }
                    Segment::Memory(bytes) => Segment::Memory(bytes.split_off(head as usize)),
                };
                self.segments.insert(i + 1, tail);
                return i + 1;
            }
            start += len;
        }
        self.segments.len()
    }

    /// Open a gap of `len` zero bytes at `pos`.  Everything at or after
    /// `pos` shifts forward; nothing is rewritten until commit.
    pub fn insert(&mut self, pos: u64, len: u64) -> Result<()> {
        let size = self.len();
        if pos > size {
            return Err(Error::InsertBeyondEnd { pos, size });
        }
        if len == 0 {
            return Ok(());
        }
        let i = self.split_at(pos);
        self.segments.insert(i, Segment::Memory(vec![0; len as usize]));
        trace!(pos, len, "inserted gap");
        Ok(())
    }

    /// Drop `len` bytes at `pos`.  Everything after the range shifts back;
    /// nothing is rewritten until commit.
    pub fn remove(&mut self, pos: u64, len: u64) -> Result<()> {
        let size = self.len();
        if pos.checked_add(len).is_none_or(|end| end > size) {
            return Err(Error::RemoveBeyondEnd { pos, len, size });
        }
        if len == 0 {
            return Ok(());
        }
        let first = self.split_at(pos);
        let last = self.split_at(pos + len);
        self.segments.drain(first..last);
        trace!(pos, len, "removed range");
        Ok(())
    }

    /// Materialise the logical content into the backing store and collapse
    /// the segment list back to a single reference.
    ///
    /// Backing ranges never reorder relative to each other, so both their
    /// source and target offsets are monotonically increasing.  Ranges
    /// moving backward are shifted first, in ascending order with each one
    /// copied front-to-back; ranges moving forward follow in descending
    /// order, copied back-to-front; only then are the in-memory segments
    /// written over whatever their target ranges used to hold.  A partial
    /// failure leaves the store in an undefined state.
    pub fn commit(&mut self) -> Result<()> {
        let total = self.len();

        let mut offsets = Vec::with_capacity(self.segments.len());
        let mut dst = 0u64;
        for seg in &self.segments {
            offsets.push(dst);
            dst += seg.len();
        }

        for i in 0..self.segments.len() {
            if let Segment::Backing { src, len } = &self.segments[i] {
                let (src, len, dst) = (*src, *len, offsets[i]);
                if dst < src {
                    self.shift_range(src, dst, len, false)?;
                }
            }
        }
        for i in (0..self.segments.len()).rev() {
            if let Segment::Backing { src, len } = &self.segments[i] {
                let (src, len, dst) = (*src, *len, offsets[i]);
                if dst > src {
                    self.shift_range(src, dst, len, true)?;
                }
            }
        }
        for i in 0..self.segments.len() {
            if let Segment::Memory(bytes) = &self.segments[i] {
                self.store.write_at(offsets[i], bytes)?;
            }
        }

        if self.store.size()? != total {
            self.store.truncate(total)?;
        }
        self.segments = vec![Segment::Backing { src: 0, len: total }];
        debug!(size = total, "committed segmented stream");
        Ok(())
    }

    /// Move `len` bytes from `src` to `dst` within the store.  `reverse`
    /// selects back-to-front chunk order, required when the ranges overlap
    /// and the data moves forward.
    fn shift_range(&mut self, src: u64, dst: u64, len: u64, reverse: bool) -> Result<()> {
        let mut buf = vec![0u8; COPY_CHUNK.min(len as usize)];
        if reverse {
            let mut left = len;
            while left > 0 {
                let n = (COPY_CHUNK as u64).min(left);
                left -= n;
                self.store.read_exact_at(src + left, &mut buf[..n as usize])?;
                self.store.write_at(dst + left, &buf[..n as usize])?;
            }
        } else {
            let mut done = 0u64;
            while done < len {
                let n = (COPY_CHUNK as u64).min(len - done);
                self.store.read_exact_at(src + done, &mut buf[..n as usize])?;
                self.store.write_at(dst + done, &buf[..n as usize])?;
                done += n;
            }
        }
        Ok(())
    }
}

impl Stream for SegStream {
    fn size(&mut self) -> Result<u64> {
        Ok(self.len())
    }

    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let total = self.len();
        if pos >= total {
            return Ok(0);
        }
        let want = buf.len().min((total - pos) as usize);
        let mut done = 0usize;
        let mut start = 0u64;
        for i in 0..self.segments.len() {
            let len = self.segments[i].len();
            let p = pos + done as u64;
            if p < start + len && done < want {
                let within = p - start;
                let n = ((len - within) as usize).min(want - done);
                match &self.segments[i] {
                    Segment::Backing { src, .. } => {
                        let src = *src + within;
                        self.store.read_exact_at(src, &mut buf[done..done + n])?;
                    }
                    Segment::Memory(bytes) => {
                        let within = within as usize;
                        buf[done..done + n].copy_from_slice(&bytes[within..within + n]);
                    }
                }
                done += n;
            }
            if done >= want {
                break;
            }
            start += len;
        }
        Ok(done)
    }

    fn write_at(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        let total = self.len();
        if pos + data.len() as u64 > total {
            return Err(Error::WriteBeyondEnd {
                pos,
                len: data.len() as u64,
                size: total,
            });
        }
        let mut done = 0usize;
        let mut start = 0u64;
        for i in 0..self.segments.len() {
            let len = self.segments[i].len();
            let p = pos + done as u64;
            if p < start + len && done < data.len() {
                let within = p - start;
                let n = ((len - within) as usize).min(data.len() - done);
                match &mut self.segments[i] {
                    Segment::Backing { src, .. } => {
                        let src = *src + within;
                        self.store.write_at(src, &data[done..done + n])?;
                    }
                    Segment::Memory(bytes) => {
                        let within = within as usize;
                        bytes[within..within + n].copy_from_slice(&data[done..done + n]);
                    }
                }
                done += n;
            }
            if done >= data.len() {
                break;
            }
            start += len;
        }
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        let size = self.len();
        if len < size {
            self.remove(len, size - len)
        } else if len > size {
            self.segments
                .push(Segment::Memory(vec![0; (len - size) as usize]));
            Ok(())
        } else {
            Ok(())
        }
    }
}
