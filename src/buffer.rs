//! Bounded byte buffer with zero-copy views.
//!
//! `FlowBuffer` is a fixed-capacity region with a write cursor and a read
//! cursor. Producers write into [`FlowBuffer::incoming_view`] and commit with
//! [`FlowBuffer::incoming_provided`]; consumers read from
//! [`FlowBuffer::outgoing_view`] and release with
//! [`FlowBuffer::outgoing_consumed`].
//!
//! The buffer carries no watermark policy. Callers compare
//! [`FlowBuffer::used_space`] against their own thresholds to decide when to
//! stop or resume readiness interest.

use std::io::{self, Read, Write};

use crate::error::{Error, Result};

/// Fixed-capacity buffer; `0 <= read <= write <= capacity` always holds.
pub struct FlowBuffer {
    data: Box<[u8]>,
    read: usize,
    write: usize,
}

impl std::fmt::Debug for FlowBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowBuffer")
            .field("capacity", &self.data.len())
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}

impl FlowBuffer {
    /// Allocate a buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes written but not yet consumed.
    pub fn used_space(&self) -> usize {
        self.write - self.read
    }

    /// Contiguous free space at the tail.
    pub fn free_space(&self) -> usize {
        self.data.len() - self.write
    }

    pub fn is_full(&self) -> bool {
        self.write == self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// Free space at the tail, for a producer to fill in place.
    pub fn incoming_view(&mut self) -> &mut [u8] {
        &mut self.data[self.write..]
    }

    /// Commit `n` bytes written into the incoming view.
    pub fn incoming_provided(&mut self, n: usize) -> Result<()> {
        let available = self.free_space();
        if n > available {
            return Err(Error::BufferOverflow {
                requested: n,
                available,
            });
        }
        self.write += n;
        Ok(())
    }

    /// Unread data, for a consumer to read in place.
    pub fn outgoing_view(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    /// Release `n` bytes from the front of the outgoing view.
    ///
    /// Both cursors return to 0 once everything written has been consumed.
    pub fn outgoing_consumed(&mut self, n: usize) -> Result<()> {
        let available = self.used_space();
        if n > available {
            return Err(Error::BufferUnderflow {
                requested: n,
                available,
            });
        }
        self.advance_read(n);
        Ok(())
    }

    // Callers guarantee n <= used_space.
    fn advance_read(&mut self, n: usize) {
        self.read += n;
        if self.read == self.write {
            self.read = 0;
            self.write = 0;
        }
    }

    /// Copy as much of `src` as fits. Returns the number of bytes copied.
    pub fn incoming_mem(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.free_space());
        self.data[self.write..self.write + n].copy_from_slice(&src[..n]);
        self.write += n;
        n
    }

    /// Copy up to `dst.len()` unread bytes out. Returns the number copied.
    pub fn outgoing_mem(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.used_space());
        dst[..n].copy_from_slice(&self.data[self.read..self.read + n]);
        self.advance_read(n);
        n
    }

    /// Fill free space with one `read` call on `src`.
    ///
    /// Returns `Ok(0)` both on end-of-stream and when the buffer is full;
    /// callers check [`FlowBuffer::is_full`] first.
    pub fn read_from<R: Read + ?Sized>(&mut self, src: &mut R) -> io::Result<usize> {
        if self.is_full() {
            return Ok(0);
        }
        let n = src.read(self.incoming_view())?;
        self.write += n;
        Ok(n)
    }

    /// Drain unread data with one `write` call on `dst`.
    pub fn write_to<W: Write + ?Sized>(&mut self, dst: &mut W) -> io::Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        let n = dst.write(self.outgoing_view())?;
        self.advance_read(n.min(self.used_space()));
        Ok(n)
    }
}
