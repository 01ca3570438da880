//! Boundary tag encoding.
//!
//! Every block starts with a header word and ends with a footer word. Both
//! hold the block size with its low three bits reused as flags:
//!
//! ```text
//!  31                                  3   2   1   0
//! +--------------------------------------+---+---+---+
//! | size (multiple of ALIGNMENT)         | 0 | T | A |
//! +--------------------------------------+---+---+---+
//! ```
//!
//! `A` is set for allocated blocks, `T` marks free blocks left behind by an
//! in-place reallocation.

/// A header, footer, or free-list link word.
pub type Word = u32;

/// Size of a header, footer, or link word, in bytes.
pub const WORD_SIZE: usize = 4;

/// Size of a header plus a footer, in bytes.
pub const DOUBLE_WORD_SIZE: usize = 2 * WORD_SIZE;

/// Alignment of every payload address and every block size, in bytes.
pub const ALIGNMENT: usize = 8;

/// The smallest block that can hold its boundary tags and, once freed, both
/// free-list links.
pub const MIN_BLOCK_SIZE: usize = 2 * DOUBLE_WORD_SIZE;

/// The largest arena, and so the largest block, that boundary tag and link
/// words can describe.
pub const MAX_ARENA_SIZE: usize = SIZE_MASK as usize;

const ALLOCATED: Word = 0b001;
const TAGGED: Word = 0b010;
const SIZE_MASK: Word = !0b111;

/// Pack a size and its flags into a boundary tag word.
#[inline]
pub fn pack(size: usize, allocated: bool, tag: bool) -> Word {
    extra_assert_aligned!(size);
    extra_assert!(size <= SIZE_MASK as usize);
    let mut word = size as Word;
    if allocated {
        word |= ALLOCATED;
    }
    if tag {
        word |= TAGGED;
    }
    word
}

/// The block size recorded in a boundary tag.
#[inline]
pub fn size(word: Word) -> usize {
    (word & SIZE_MASK) as usize
}

/// Whether a boundary tag describes an allocated block.
#[inline]
pub fn is_allocated(word: Word) -> bool {
    word & ALLOCATED != 0
}

/// Whether a boundary tag carries the reallocation tag.
#[inline]
pub fn is_tagged(word: Word) -> bool {
    word & TAGGED != 0
}

/// Round a request of `n` payload bytes up to a block size that includes the
/// boundary tags and the alignment padding.
///
/// Returns `None` when the block would not fit in a boundary tag word.
#[inline]
pub fn adjusted_size(n: usize) -> Option<usize> {
    let asize = if n <= DOUBLE_WORD_SIZE {
        MIN_BLOCK_SIZE
    } else {
        align_up(n.checked_add(DOUBLE_WORD_SIZE)?)?
    };
    if asize > MAX_ARENA_SIZE {
        None
    } else {
        Some(asize)
    }
}

/// Round `n` up to the next multiple of `ALIGNMENT`.
#[inline]
pub fn align_up(n: usize) -> Option<usize> {
    Some(n.checked_add(ALIGNMENT - 1)? & !(ALIGNMENT - 1))
}
