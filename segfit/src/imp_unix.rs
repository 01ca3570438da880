use super::const_init::ConstInit;
use super::region::Region;
use super::{AllocErr, DEFAULT_MAX_HEAP};
use core::ptr::{self, NonNull};
use memory_units::{Bytes, Pages, RoundUpTo};

/// A region backed by one anonymous `mmap` reservation.
///
/// Nothing is mapped until the first `sbrk`, which reserves `max` bytes
/// (rounded up to whole pages) in one go. The break then moves inside that
/// reservation and `sbrk` fails once it is exhausted. The mapping is released
/// when the region is dropped.
#[derive(Debug)]
pub struct MmapRegion {
    base: *mut u8,
    reserved: Bytes,
    max: Bytes,
    brk: Bytes,
}

impl MmapRegion {
    /// A region that may grow up to `max` bytes.
    pub const fn new(max: Bytes) -> Self {
        MmapRegion {
            base: ptr::null_mut(),
            reserved: Bytes(0),
            max,
            brk: Bytes(0),
        }
    }

    /// The most this region will ever hand out.
    pub fn max_size(&self) -> Bytes {
        self.max
    }

    fn reserve(&mut self) -> Result<(), AllocErr> {
        let pages: Pages = self.max.round_up_to();
        let bytes: Bytes = pages.into();
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                bytes.0,
                libc::PROT_WRITE | libc::PROT_READ,
                libc::MAP_ANON | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            log::warn!("mmap of {} bytes failed", bytes.0);
            return Err(AllocErr);
        }
        log::debug!("reserved {} bytes at {:p}", bytes.0, addr);
        self.base = addr as *mut u8;
        self.reserved = bytes;
        Ok(())
    }
}

impl ConstInit for MmapRegion {
    const INIT: Self = MmapRegion::new(DEFAULT_MAX_HEAP);
}

impl Default for MmapRegion {
    fn default() -> Self {
        MmapRegion::INIT
    }
}

unsafe impl Send for MmapRegion {}

unsafe impl Region for MmapRegion {
    fn sbrk(&mut self, increment: Bytes) -> Result<NonNull<u8>, AllocErr> {
        if self.base.is_null() {
            self.reserve()?;
        }
        let end = self.brk.0.checked_add(increment.0).ok_or(AllocErr)?;
        if end > self.max.0 {
            return Err(AllocErr);
        }
        let old = unsafe { self.base.add(self.brk.0) };
        self.brk = Bytes(end);
        NonNull::new(old).ok_or(AllocErr)
    }

    fn heap_size(&self) -> Bytes {
        self.brk
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        if !self.base.is_null() {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.reserved.0);
            }
        }
    }
}
