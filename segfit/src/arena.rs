//! The heap arena: one contiguous run of blocks between two sentinels.
//!
//! ```text
//! offset 0      4          8          12                          brk-4     brk
//! +-------------+----------+----------+-------+-------+-----+----------+
//! | pad         | pro hdr  | pro ftr  | block | block | ... | epi hdr  |
//! +-------------+----------+----------+-------+-------+-----+----------+
//!                           ^ prologue payload                          ^ epilogue
//! ```
//!
//! Blocks are named by the offset of their payload from the arena base. The
//! header word sits just before the payload and the footer word is the last
//! word of the block. All raw memory access of the allocator happens in this
//! module.

use super::block::{self, Word, DOUBLE_WORD_SIZE, MAX_ARENA_SIZE, WORD_SIZE};
use super::const_init::ConstInit;
use super::region::Region;
use super::AllocErr;
use core::cmp;
use core::fmt;
use core::ptr::{self, NonNull};
use memory_units::Bytes;

/// A block, identified by the arena offset of its payload.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct BlockPtr(pub(crate) usize);

impl fmt::Debug for BlockPtr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "@{:#x}", self.0)
    }
}

impl BlockPtr {
    pub(crate) fn from_link(word: Word) -> Option<BlockPtr> {
        if word == 0 {
            None
        } else {
            Some(BlockPtr(word as usize))
        }
    }

    fn into_link(block: Option<BlockPtr>) -> Word {
        block.map_or(0, |b| b.0 as Word)
    }
}

pub(crate) struct Arena<R> {
    region: R,
    base: *mut u8,
    brk: usize,
}

// The arena owns everything between `base` and the break.
unsafe impl<R: Send> Send for Arena<R> {}

impl<R: ConstInit> ConstInit for Arena<R> {
    const INIT: Self = Arena::new(R::INIT);
}

impl<R> Arena<R> {
    pub(crate) const fn new(region: R) -> Self {
        Arena {
            region,
            base: ptr::null_mut(),
            brk: 0,
        }
    }

    pub(crate) fn region(&self) -> &R {
        &self.region
    }

    pub(crate) fn is_initialized(&self) -> bool {
        !self.base.is_null()
    }

    /// Bytes between the arena base and the break, sentinels included.
    pub(crate) fn heap_size(&self) -> Bytes {
        Bytes(self.brk)
    }

    /// The permanently allocated block every walk starts from.
    pub(crate) fn prologue(&self) -> BlockPtr {
        BlockPtr(DOUBLE_WORD_SIZE)
    }

    /// The zero-sized allocated block that terminates every walk.
    pub(crate) fn epilogue(&self) -> BlockPtr {
        BlockPtr(self.brk)
    }

    /// Whether `offset` could name a block strictly between the sentinels.
    pub(crate) fn contains(&self, offset: usize) -> bool {
        offset > self.prologue().0 && offset < self.brk && offset % block::ALIGNMENT == 0
    }

    #[inline]
    fn word(&self, offset: usize) -> Word {
        extra_assert!(self.is_initialized());
        extra_assert!(offset + WORD_SIZE <= self.brk, "read of {:#x} past the break", offset);
        unsafe { ptr::read(self.base.add(offset) as *const Word) }
    }

    #[inline]
    fn set_word(&mut self, offset: usize, word: Word) {
        extra_assert!(self.is_initialized());
        extra_assert!(offset + WORD_SIZE <= self.brk, "write of {:#x} past the break", offset);
        unsafe { ptr::write(self.base.add(offset) as *mut Word, word) }
    }

    /// Read a word without trusting `offset`, for the validator.
    pub(crate) fn word_checked(&self, offset: usize) -> Option<Word> {
        if !self.is_initialized() || offset % block::WORD_SIZE != 0 {
            return None;
        }
        match offset.checked_add(WORD_SIZE) {
            Some(end) if end <= self.brk => Some(self.word(offset)),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn header(&self, b: BlockPtr) -> Word {
        self.word(b.0 - WORD_SIZE)
    }

    #[cfg(test)]
    pub(crate) fn footer(&self, b: BlockPtr) -> Word {
        self.word(b.0 + self.size(b) - DOUBLE_WORD_SIZE)
    }

    #[inline]
    pub(crate) fn size(&self, b: BlockPtr) -> usize {
        block::size(self.header(b))
    }

    #[inline]
    pub(crate) fn is_allocated(&self, b: BlockPtr) -> bool {
        block::is_allocated(self.header(b))
    }

    #[inline]
    pub(crate) fn is_tagged(&self, b: BlockPtr) -> bool {
        block::is_tagged(self.header(b))
    }

    /// Rewrite both boundary tags of `b`.
    #[inline]
    pub(crate) fn write_tags(&mut self, b: BlockPtr, size: usize, allocated: bool, tag: bool) {
        extra_assert_aligned!(b.0);
        let word = block::pack(size, allocated, tag);
        self.set_word(b.0 - WORD_SIZE, word);
        self.set_word(b.0 + size - DOUBLE_WORD_SIZE, word);
    }

    /// Rewrite only the header word of `b`.
    #[inline]
    pub(crate) fn set_header(&mut self, b: BlockPtr, word: Word) {
        self.set_word(b.0 - WORD_SIZE, word);
    }

    /// Rewrite only the footer word of a block whose header is already right.
    #[cfg(test)]
    pub(crate) fn set_footer(&mut self, b: BlockPtr, word: Word) {
        let offset = b.0 + self.size(b) - DOUBLE_WORD_SIZE;
        self.set_word(offset, word);
    }

    /// The block physically after `b`.
    #[inline]
    pub(crate) fn next_block(&self, b: BlockPtr) -> BlockPtr {
        BlockPtr(b.0 + self.size(b))
    }

    /// The block physically before `b`, found through its footer.
    #[inline]
    pub(crate) fn prev_block(&self, b: BlockPtr) -> BlockPtr {
        BlockPtr(b.0 - block::size(self.word(b.0 - DOUBLE_WORD_SIZE)))
    }

    /// The previous free block in `b`'s bucket.
    #[inline]
    pub(crate) fn pred(&self, b: BlockPtr) -> Option<BlockPtr> {
        BlockPtr::from_link(self.word(b.0))
    }

    /// The next free block in `b`'s bucket.
    #[inline]
    pub(crate) fn succ(&self, b: BlockPtr) -> Option<BlockPtr> {
        BlockPtr::from_link(self.word(b.0 + WORD_SIZE))
    }

    #[inline]
    pub(crate) fn set_pred(&mut self, b: BlockPtr, pred: Option<BlockPtr>) {
        self.set_word(b.0, BlockPtr::into_link(pred));
    }

    #[inline]
    pub(crate) fn set_succ(&mut self, b: BlockPtr, succ: Option<BlockPtr>) {
        self.set_word(b.0 + WORD_SIZE, BlockPtr::into_link(succ));
    }

    /// The address handed to the user for `b`.
    #[inline]
    pub(crate) fn payload(&self, b: BlockPtr) -> NonNull<u8> {
        extra_assert!(self.contains(b.0));
        unsafe { NonNull::new_unchecked(self.base.add(b.0)) }
    }

    /// The block whose payload starts at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `payload` of this arena.
    #[inline]
    pub(crate) unsafe fn block_of(&self, ptr: NonNull<u8>) -> BlockPtr {
        let offset = ptr.as_ptr() as usize - self.base as usize;
        extra_assert!(self.contains(offset), "{:p} is not a block of this heap", ptr);
        BlockPtr(offset)
    }

    /// Copy `n` payload bytes between two distinct blocks.
    pub(crate) fn copy_payload(&mut self, from: BlockPtr, to: BlockPtr, n: usize) {
        extra_assert!(n <= self.size(from) - DOUBLE_WORD_SIZE);
        extra_assert!(n <= self.size(to) - DOUBLE_WORD_SIZE);
        extra_assert!(from.0 + n <= to.0 || to.0 + n <= from.0);
        unsafe {
            ptr::copy_nonoverlapping(self.base.add(from.0), self.base.add(to.0), n);
        }
    }
}

impl<R: Region> Arena<R> {
    /// Lay down the alignment pad and both sentinels. Does nothing when the
    /// arena already exists.
    pub(crate) fn init(&mut self) -> Result<(), AllocErr> {
        if self.is_initialized() {
            return Ok(());
        }

        let start = self.region.sbrk(Bytes(2 * DOUBLE_WORD_SIZE))?;
        extra_assert_aligned!(start.as_ptr() as usize);
        self.base = start.as_ptr();
        self.brk = 2 * DOUBLE_WORD_SIZE;

        self.set_word(0, 0);
        let prologue = self.prologue();
        self.write_tags(prologue, DOUBLE_WORD_SIZE, true, false);
        let epilogue = self.epilogue();
        self.set_header(epilogue, block::pack(0, true, false));

        log::debug!("initialized arena at {:p}", self.base);
        Ok(())
    }

    /// Extend the arena by at least `min` bytes, and by no less than
    /// `chunk` bytes, returning the new space as one free block.
    ///
    /// The block is neither coalesced nor indexed. On failure the arena is
    /// left exactly as it was.
    pub(crate) fn grow(&mut self, min: usize, chunk: usize) -> Result<BlockPtr, AllocErr> {
        extra_assert!(self.is_initialized());

        let min = block::align_up(min).ok_or(AllocErr)?;
        let chunk = block::align_up(chunk).ok_or(AllocErr)?;
        let size = cmp::max(min, chunk);
        let end = self.brk.checked_add(size).ok_or(AllocErr)?;
        if end > MAX_ARENA_SIZE {
            log::warn!("arena cannot describe {} bytes", end);
            return Err(AllocErr);
        }

        let old_brk = self.region.sbrk(Bytes(size)).map_err(|e| {
            log::warn!("host refused to grow the arena by {} bytes", size);
            e
        })?;
        extra_assert_eq!(
            old_brk.as_ptr() as usize,
            self.base as usize + self.brk,
            "region handed out non-contiguous memory"
        );

        // The old epilogue header becomes the new block's header.
        let b = self.epilogue();
        self.brk = end;
        self.write_tags(b, size, false, false);
        let epilogue = self.epilogue();
        self.set_header(epilogue, block::pack(0, true, false));

        log::debug!("grew arena by {} bytes to {} bytes", size, self.brk);
        Ok(b)
    }
}
