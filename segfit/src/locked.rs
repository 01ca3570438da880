use super::block::ALIGNMENT;
use super::const_init::ConstInit;
use super::heap::{Heap, HeapConfig};
use super::region::Region;
use core::alloc::{GlobalAlloc, Layout};
use core::cmp;
use core::ptr::{self, NonNull};

/// A `Heap` behind a spin lock, usable as the `#[global_allocator]`.
///
/// Every operation holds the lock for its whole duration. The lock is not
/// reentrant, so a logger installed while this is the global allocator must
/// not allocate from inside `log` calls.
pub struct LockedHeap<R>(spin::Mutex<Heap<R>>);

impl<R> LockedHeap<R> {
    /// Wrap a heap with the default configuration over `region`.
    pub const fn new(region: R) -> Self {
        LockedHeap(spin::Mutex::new(Heap::new(region)))
    }

    /// Wrap a heap with the given configuration over `region`.
    pub const fn with_config(region: R, config: HeapConfig) -> Self {
        LockedHeap(spin::Mutex::new(Heap::with_config(region, config)))
    }

    /// Take exclusive access to the heap.
    pub fn lock(&self) -> spin::MutexGuard<'_, Heap<R>> {
        self.0.lock()
    }
}

impl<R: ConstInit> ConstInit for LockedHeap<R> {
    const INIT: Self = LockedHeap::new(R::INIT);
}

#[cfg(unix)]
impl LockedHeap<super::MmapRegion> {
    /// A lazily mapped heap of at most
    /// [`DEFAULT_MAX_HEAP`](crate::DEFAULT_MAX_HEAP) bytes, for `static`s
    /// that get set as the global allocator.
    pub const INIT: Self = <Self as ConstInit>::INIT;
}

unsafe impl<R: Region + Send> GlobalAlloc for LockedHeap<R> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.lock()
            .allocate_aligned(layout.size(), layout.align())
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.lock().free(NonNull::new(ptr));
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let mut heap = self.lock();
        if layout.align() <= ALIGNMENT {
            return heap
                .reallocate(NonNull::new(ptr), new_size)
                .map_or(ptr::null_mut(), NonNull::as_ptr);
        }

        // Moving blocks only keeps the base alignment, so over-aligned
        // blocks always move to a fresh aligned allocation.
        let new = match heap.allocate_aligned(new_size, layout.align()) {
            Some(new) => new,
            None => return ptr::null_mut(),
        };
        ptr::copy_nonoverlapping(ptr, new.as_ptr(), cmp::min(layout.size(), new_size));
        heap.free(NonNull::new(ptr));
        new.as_ptr()
    }
}
