use super::arena::{Arena, BlockPtr};
use super::block::{self, ALIGNMENT, DOUBLE_WORD_SIZE, MIN_BLOCK_SIZE};
use super::coalesce::coalesce;
use super::const_init::ConstInit;
use super::region::Region;
use super::size_classes::SizeClasses;
use super::validate::{self, Violation};
use super::AllocErr;
use alloc::vec::Vec;
use core::cmp;
use core::ptr::NonNull;
use memory_units::Bytes;

/// The default minimum amount the arena grows by.
pub const DEFAULT_CHUNK_SIZE: Bytes = Bytes(1 << 12);

/// The default number of free-list buckets.
pub const DEFAULT_SIZE_CLASSES: usize = 16;

/// How `Heap::reallocate` moves a block to its new size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReallocPolicy {
    /// Always allocate a new block, copy into it and free the old one.
    Copy,

    /// Shrink in place, grow into a free successor or fresh arena space when
    /// possible, and copy only as a last resort. Free space left over by in
    /// place growth is tagged so that unrelated allocations pass it over
    /// until the arena can no longer grow.
    InPlace,
}

/// Tunables of a `Heap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// The arena never grows by less than this.
    pub chunk_size: Bytes,
    /// The number of free-list buckets, between 1 and
    /// [`MAX_SIZE_CLASSES`](crate::MAX_SIZE_CLASSES).
    pub size_classes: usize,
    /// The reallocation strategy.
    pub realloc: ReallocPolicy,
}

impl HeapConfig {
    /// 4 KiB chunks, 16 buckets, copying reallocation.
    pub const DEFAULT: HeapConfig = HeapConfig {
        chunk_size: DEFAULT_CHUNK_SIZE,
        size_classes: DEFAULT_SIZE_CLASSES,
        realloc: ReallocPolicy::Copy,
    };

    /// Use a different minimum growth.
    pub const fn with_chunk_size(mut self, chunk_size: Bytes) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Use a different number of buckets.
    pub const fn with_size_classes(mut self, size_classes: usize) -> Self {
        self.size_classes = size_classes;
        self
    }

    /// Use a different reallocation strategy.
    pub const fn with_realloc(mut self, realloc: ReallocPolicy) -> Self {
        self.realloc = realloc;
        self
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig::DEFAULT
    }
}

/// A boundary-tag allocator over one growable region.
///
/// Nothing is taken from the region until the first allocation (or an
/// explicit `init`). Every block carries a one-word header and a one-word
/// footer; free blocks additionally thread two link words through their
/// payload to sit in a size-segregated free list.
///
/// A `Heap` is single threaded. Wrap it in a [`LockedHeap`](crate::LockedHeap)
/// to share it.
pub struct Heap<R> {
    arena: Arena<R>,
    classes: SizeClasses,
    config: HeapConfig,
}

impl<R: ConstInit> ConstInit for Heap<R> {
    const INIT: Self = Heap::new(R::INIT);
}

impl<R> Heap<R> {
    /// A heap with the default configuration.
    pub const fn new(region: R) -> Self {
        Heap::with_config(region, HeapConfig::DEFAULT)
    }

    /// A heap with the given configuration.
    pub const fn with_config(region: R, config: HeapConfig) -> Self {
        Heap {
            arena: Arena::new(region),
            classes: SizeClasses::new(config.size_classes),
            config,
        }
    }

    /// The configuration this heap was built with.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// The region backing this heap.
    pub fn region(&self) -> &R {
        self.arena.region()
    }

    /// The current size of the arena, sentinels included.
    pub fn heap_size(&self) -> Bytes {
        self.arena.heap_size()
    }

    /// Walk the whole arena and every free list, reporting each broken
    /// invariant. With `verbose`, every block and list node is logged at
    /// debug level.
    ///
    /// The report is built with `alloc`, so this must not be called on the
    /// heap behind the global allocator while holding its lock.
    pub fn validate(&self, verbose: bool) -> Vec<Violation> {
        validate::validate(&self.arena, &self.classes, verbose)
    }

    /// The number of payload bytes the block at `ptr` can hold.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        let b = self.arena.block_of(ptr);
        self.arena.size(b) - DOUBLE_WORD_SIZE
    }

    #[cfg(feature = "extra_assertions")]
    fn assert_consistent(&self) {
        validate::assert_consistent(&self.arena, &self.classes);
    }

    #[cfg(not(feature = "extra_assertions"))]
    #[inline(always)]
    fn assert_consistent(&self) {}

    #[cfg(test)]
    pub(crate) fn parts_mut(&mut self) -> (&mut Arena<R>, &mut SizeClasses) {
        (&mut self.arena, &mut self.classes)
    }
}

impl<R: Region> Heap<R> {
    /// Lay down the arena sentinels now rather than on the first allocation.
    /// Calling this again does nothing.
    pub fn init(&mut self) -> Result<(), AllocErr> {
        self.arena.init()
    }

    /// Allocate `size` bytes, aligned to `ALIGNMENT`.
    ///
    /// Returns `None` for a zero-sized request or when the region cannot
    /// grow any further.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let result = self.allocate_block(size).map(|b| self.arena.payload(b));
        log::trace!("allocate({}) -> {:?}", size, result);
        self.assert_consistent();
        result
    }

    /// Allocate `size` bytes at an address that is a multiple of `align`.
    ///
    /// `align` must be a power of two; anything else yields `None`.
    pub fn allocate_aligned(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        if !align.is_power_of_two() {
            return None;
        }
        if align <= ALIGNMENT {
            return self.allocate(size);
        }

        let result = self.allocate_aligned_block(size, align).map(|b| self.arena.payload(b));
        log::trace!("allocate_aligned({}, {}) -> {:?}", size, align, result);
        self.assert_consistent();
        result
    }

    /// Return an allocation to the heap. `None` is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this heap. Freeing twice, or
    /// freeing anything else, corrupts the heap.
    pub unsafe fn free(&mut self, ptr: Option<NonNull<u8>>) {
        let ptr = match ptr {
            Some(ptr) if self.arena.is_initialized() => ptr,
            _ => return,
        };
        let b = self.arena.block_of(ptr);
        self.release(b, false);
        log::trace!("free({:p})", ptr);
        self.assert_consistent();
    }

    /// Resize an allocation, preserving the first `min(old, new)` bytes.
    ///
    /// A `None` pointer allocates, and a zero size frees and returns `None`.
    /// When no block of the new size can be had, `None` is returned and the
    /// old allocation is left untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be `None` or a live allocation of this heap. On success
    /// it must no longer be used.
    pub unsafe fn reallocate(
        &mut self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Option<NonNull<u8>> {
        let ptr = match ptr {
            None => return self.allocate(size),
            Some(ptr) => ptr,
        };
        if size == 0 {
            self.free(Some(ptr));
            return None;
        }

        let old = self.arena.block_of(ptr);
        let block = match self.config.realloc {
            ReallocPolicy::Copy => self.reallocate_by_copy(old, size, false),
            ReallocPolicy::InPlace => self
                .reallocate_in_place(old, size)
                .or_else(|| self.reallocate_by_copy(old, size, true)),
        };
        let result = block.map(|b| self.arena.payload(b));
        log::trace!("reallocate({:p}, {}) -> {:?}", ptr, size, result);
        if result.is_none() {
            log::warn!("reallocate({:p}, {}) failed, the old block is kept", ptr, size);
        }
        self.assert_consistent();
        result
    }

    fn allocate_block(&mut self, size: usize) -> Option<BlockPtr> {
        if size == 0 {
            return None;
        }
        if self.arena.init().is_err() {
            log::warn!("could not lay down the arena for allocate({})", size);
            return None;
        }
        let asize = match block::adjusted_size(size) {
            Some(asize) => asize,
            None => {
                log::warn!("allocate({}) is too large for any block", size);
                return None;
            }
        };

        if let Some(b) = self.classes.find_fit(&self.arena, asize, true) {
            self.classes.remove(&mut self.arena, b);
            self.place(b, asize);
            return Some(b);
        }

        match self.extend(asize) {
            Ok(b) => {
                self.place(b, asize);
                Some(b)
            }
            Err(AllocErr) => {
                // Space kept back for in-place reallocation is only handed
                // out once the arena cannot grow. Only `InPlace` tags blocks.
                let b = match self.config.realloc {
                    ReallocPolicy::InPlace => self.classes.find_fit(&self.arena, asize, false),
                    ReallocPolicy::Copy => None,
                };
                if b.is_none() {
                    log::warn!("out of memory for allocate({})", size);
                }
                let b = b?;
                self.classes.remove(&mut self.arena, b);
                self.place(b, asize);
                Some(b)
            }
        }
    }

    fn allocate_aligned_block(&mut self, size: usize, align: usize) -> Option<BlockPtr> {
        if size == 0 {
            return None;
        }
        let asize = block::adjusted_size(size)?;

        // Leave room for a leading gap that is either empty or big enough to
        // stand on its own as a free block.
        let padded = size.checked_add(align)?.checked_add(MIN_BLOCK_SIZE)?;
        let b = self.allocate_block(padded)?;

        let addr = self.arena.payload(b).as_ptr() as usize;
        let b = if addr % align == 0 {
            b
        } else {
            let aligned_addr = (addr + MIN_BLOCK_SIZE + align - 1) & !(align - 1);
            let gap = aligned_addr - addr;
            let total = self.arena.size(b);
            let aligned = BlockPtr(b.0 + gap);
            self.arena.write_tags(b, gap, true, false);
            self.arena.write_tags(aligned, total - gap, true, false);
            self.release(b, false);
            aligned
        };

        self.split(b, asize, false);
        Some(b)
    }

    /// Grow the arena for a block of `asize` bytes and merge the new space
    /// with a free block just before it. The result is free and unindexed.
    fn extend(&mut self, asize: usize) -> Result<BlockPtr, AllocErr> {
        let b = self.arena.grow(asize, self.config.chunk_size.0)?;
        Ok(coalesce(&mut self.arena, &mut self.classes, b))
    }

    /// Turn the free, unindexed block `b` into an allocation of `asize`
    /// bytes.
    fn place(&mut self, b: BlockPtr, asize: usize) {
        let size = self.arena.size(b);
        extra_assert!(size >= asize);
        self.arena.write_tags(b, size, true, false);
        self.split(b, asize, false);
    }

    /// Trim the allocated block `b` down to `asize` bytes when the rest can
    /// stand as a free block of its own.
    fn split(&mut self, b: BlockPtr, asize: usize, tag_rest: bool) {
        extra_assert!(self.arena.is_allocated(b));
        let size = self.arena.size(b);
        if size - asize < MIN_BLOCK_SIZE {
            return;
        }

        self.arena.write_tags(b, asize, true, false);
        let rest = self.arena.next_block(b);
        self.arena.write_tags(rest, size - asize, false, false);
        let rest = coalesce(&mut self.arena, &mut self.classes, rest);
        if tag_rest {
            let rest_size = self.arena.size(rest);
            self.arena.write_tags(rest, rest_size, false, true);
        }
        self.classes.insert(&mut self.arena, rest);
    }

    /// Free the allocated block `b`. With `tag`, a block that did not merge
    /// with any neighbor keeps the reallocation tag.
    fn release(&mut self, b: BlockPtr, tag: bool) {
        extra_assert!(self.arena.is_allocated(b), "{:?} is already free", b);
        let size = self.arena.size(b);
        self.arena.write_tags(b, size, false, false);
        let merged = coalesce(&mut self.arena, &mut self.classes, b);
        if tag && merged == b && self.arena.size(b) == size {
            self.arena.write_tags(b, size, false, true);
        }
        self.classes.insert(&mut self.arena, merged);
    }

    fn reallocate_by_copy(&mut self, old: BlockPtr, size: usize, tag: bool) -> Option<BlockPtr> {
        let new = self.allocate_block(size)?;
        let old_payload = self.arena.size(old) - DOUBLE_WORD_SIZE;
        self.arena.copy_payload(old, new, cmp::min(size, old_payload));
        self.release(old, tag);
        Some(new)
    }

    /// Resize `old` without moving it, or return `None` having changed
    /// nothing.
    fn reallocate_in_place(&mut self, old: BlockPtr, size: usize) -> Option<BlockPtr> {
        let asize = block::adjusted_size(size)?;
        let size_now = self.arena.size(old);
        if asize <= size_now {
            self.split(old, asize, false);
            return Some(old);
        }

        let next = self.arena.next_block(old);
        let next_free = !self.arena.is_allocated(next);
        let next_size = if next_free { self.arena.size(next) } else { 0 };
        let after = if next_free {
            self.arena.next_block(next)
        } else {
            next
        };

        let shortfall = asize.saturating_sub(size_now + next_size);
        if shortfall > 0 && after != self.arena.epilogue() {
            return None;
        }
        let grown = if shortfall > 0 {
            let grown = self.arena.grow(shortfall, self.config.chunk_size.0).ok()?;
            self.arena.size(grown)
        } else {
            0
        };
        if next_free {
            self.classes.remove(&mut self.arena, next);
        }

        self.arena
            .write_tags(old, size_now + next_size + grown, true, false);
        self.split(old, asize, true);
        Some(old)
    }
}
