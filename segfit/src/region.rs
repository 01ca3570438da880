//! Host memory that a heap grows into.

use super::block::ALIGNMENT;
use super::AllocErr;
use core::marker::PhantomData;
use core::ptr::NonNull;
use memory_units::Bytes;

/// A contiguous range of host memory with a movable break, in the manner of
/// `sbrk`.
///
/// # Safety
///
/// Implementations must hand out memory contiguously: every successful
/// `sbrk` returns the break left by the previous one, and the very first
/// break is `ALIGNMENT`-aligned. Memory handed out must stay valid and
/// unaliased for as long as the region lives.
pub unsafe trait Region {
    /// Move the break up by `increment` bytes, returning the old break.
    fn sbrk(&mut self, increment: Bytes) -> Result<NonNull<u8>, AllocErr>;

    /// The number of bytes handed out so far.
    fn heap_size(&self) -> Bytes;
}

/// A region carved out of a caller-provided buffer.
///
/// The start of the buffer is skipped up to the first `ALIGNMENT` boundary.
#[derive(Debug)]
pub struct SliceRegion<'a> {
    start: *mut u8,
    len: usize,
    brk: usize,
    _buffer: PhantomData<&'a mut [u8]>,
}

impl<'a> SliceRegion<'a> {
    /// Grow a heap inside `buffer`.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        let pad = buffer.as_ptr().align_offset(ALIGNMENT).min(buffer.len());
        let len = buffer.len() - pad;
        let start = buffer[pad..].as_mut_ptr();
        SliceRegion {
            start,
            len,
            brk: 0,
            _buffer: PhantomData,
        }
    }

    /// The number of bytes still available to `sbrk`.
    pub fn remaining(&self) -> Bytes {
        Bytes(self.len - self.brk)
    }
}

unsafe impl<'a> Send for SliceRegion<'a> {}

unsafe impl<'a> Region for SliceRegion<'a> {
    fn sbrk(&mut self, increment: Bytes) -> Result<NonNull<u8>, AllocErr> {
        let end = self.brk.checked_add(increment.0).ok_or(AllocErr)?;
        if end > self.len {
            return Err(AllocErr);
        }
        let old = unsafe { self.start.add(self.brk) };
        self.brk = end;
        NonNull::new(old).ok_or(AllocErr)
    }

    fn heap_size(&self) -> Bytes {
        Bytes(self.brk)
    }
}
