//! Heap consistency checking.
//!
//! The validator never trusts what it reads: every word goes through a
//! bounds-checked accessor, so it can be pointed at a corrupted heap and
//! report what is wrong instead of faulting.

use super::arena::{Arena, BlockPtr};
use super::block::{self, ALIGNMENT, DOUBLE_WORD_SIZE, MIN_BLOCK_SIZE, WORD_SIZE};
use super::size_classes::SizeClasses;
use alloc::vec;
use alloc::vec::Vec;

/// One broken heap invariant, as reported by
/// [`Heap::validate`](crate::Heap::validate).
///
/// Blocks are named by the arena offset of their payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    /// The prologue is not an allocated double-word block.
    #[error("bad prologue: header {header:#x}, footer {footer:#x}")]
    BadPrologue {
        /// The prologue header word.
        header: u32,
        /// The prologue footer word.
        footer: u32,
    },

    /// The walk did not end on a zero-sized allocated epilogue.
    #[error("bad epilogue header {header:#x}")]
    BadEpilogue {
        /// The epilogue header word.
        header: u32,
    },

    /// A bucket node is not on the payload alignment.
    #[error("block {block:#x} is misaligned")]
    Misaligned {
        /// The offending block.
        block: usize,
    },

    /// A block is smaller than the minimum block size.
    #[error("block {block:#x} has bad size {size}")]
    BadSize {
        /// The offending block.
        block: usize,
        /// Its recorded size.
        size: usize,
    },

    /// A block reaches past the end of the arena.
    #[error("block {block:#x} runs past the end of the arena")]
    OutOfBounds {
        /// The offending block.
        block: usize,
    },

    /// A block's footer does not repeat its header.
    #[error("block {block:#x}: header {header:#x} does not match footer {footer:#x}")]
    HeaderFooterMismatch {
        /// The offending block.
        block: usize,
        /// Its header word.
        header: u32,
        /// Its footer word.
        footer: u32,
    },

    /// A free block directly follows another free block.
    #[error("free block {block:#x} was not coalesced with its predecessor")]
    UncoalescedFree {
        /// The second of the two free blocks.
        block: usize,
    },

    /// An allocated block carries the reallocation tag.
    #[error("allocated block {block:#x} is tagged")]
    TaggedAllocated {
        /// The offending block.
        block: usize,
    },

    /// A free block is in no bucket.
    #[error("free block {block:#x} is not in any bucket")]
    NotIndexed {
        /// The offending block.
        block: usize,
    },

    /// A bucket node is not a free block of the arena.
    #[error("bucket {class} holds {block:#x}, which is not a free block")]
    IndexedNotFree {
        /// The bucket.
        class: usize,
        /// The offending node.
        block: usize,
    },

    /// A free block is in more than one bucket.
    #[error("bucket {class} holds {block:#x}, which another bucket holds too")]
    DuplicateIndexEntry {
        /// The second bucket the block was found in.
        class: usize,
        /// The offending node.
        block: usize,
    },

    /// A bucket node's size is outside the bucket's range.
    #[error("bucket {class} holds {block:#x} of size {size}")]
    WrongClass {
        /// The bucket.
        class: usize,
        /// The offending node.
        block: usize,
        /// Its size.
        size: usize,
    },

    /// A bucket node is smaller than the node before it.
    #[error("bucket {class} is out of order at {block:#x}")]
    OutOfOrder {
        /// The bucket.
        class: usize,
        /// The offending node.
        block: usize,
    },

    /// A node's predecessor link does not point back at the node before it.
    #[error("bucket {class} has a broken link at {block:#x}")]
    BrokenLink {
        /// The bucket.
        class: usize,
        /// The offending node.
        block: usize,
    },

    /// A bucket revisits one of its own nodes.
    #[error("bucket {class} loops back to {block:#x}")]
    Cycle {
        /// The bucket.
        class: usize,
        /// The node visited twice.
        block: usize,
    },
}

pub(crate) fn validate<R>(arena: &Arena<R>, classes: &SizeClasses, verbose: bool) -> Vec<Violation> {
    let mut violations = Vec::new();
    if !arena.is_initialized() {
        return violations;
    }

    let mut free: Vec<usize> = Vec::new();
    walk_blocks(arena, verbose, &mut |v| violations.push(v), &mut |b| free.push(b));
    walk_buckets(arena, classes, &free, verbose, &mut violations);

    if !violations.is_empty() {
        log::debug!("heap has {} violations", violations.len());
    }
    violations
}

/// Panic on the first broken invariant, without allocating.
///
/// Bucket nodes are only checked to look like free blocks rather than being
/// matched against the arena walk, and the two are compared by count.
#[cfg(feature = "extra_assertions")]
pub(crate) fn assert_consistent<R>(arena: &Arena<R>, classes: &SizeClasses) {
    if !arena.is_initialized() {
        return;
    }

    let mut report = |v: Violation| {
        panic!("heap is inconsistent: {}", v);
    };
    let mut free_blocks = 0;
    walk_blocks(arena, false, &mut report, &mut |_| free_blocks += 1);
    let indexed = walk_buckets_shallow(arena, classes, free_blocks, &mut report);
    assert_eq!(
        indexed, free_blocks,
        "buckets hold {} blocks but the arena has {} free blocks",
        indexed, free_blocks
    );
}

/// Walk the arena from the prologue to the epilogue, handing the offset of
/// every free block to `on_free` in address order.
fn walk_blocks<R>(
    arena: &Arena<R>,
    verbose: bool,
    report: &mut impl FnMut(Violation),
    on_free: &mut impl FnMut(usize),
) {
    let brk = arena.heap_size().0;

    let prologue = arena.prologue().0;
    let header = arena.word_checked(prologue - WORD_SIZE).unwrap_or(0);
    let footer = arena.word_checked(prologue).unwrap_or(0);
    let sentinel = block::pack(DOUBLE_WORD_SIZE, true, false);
    if header != sentinel || footer != sentinel {
        report(Violation::BadPrologue { header, footer });
    }

    let mut b = prologue + DOUBLE_WORD_SIZE;
    let mut prev_free = false;
    loop {
        let header = match arena.word_checked(b - WORD_SIZE) {
            Some(header) => header,
            None => return report(Violation::OutOfBounds { block: b }),
        };

        if b == brk {
            if header != block::pack(0, true, false) {
                report(Violation::BadEpilogue { header });
            }
            if verbose {
                log::debug!("{:?}: epilogue", BlockPtr(b));
            }
            return;
        }

        // Sizes are multiples of `ALIGNMENT`, so `b` stays aligned.
        let size = block::size(header);
        if size < MIN_BLOCK_SIZE {
            return report(Violation::BadSize { block: b, size });
        }
        let footer = match footer_of(arena, b, size) {
            Some(footer) => footer,
            None => return report(Violation::OutOfBounds { block: b }),
        };

        if verbose {
            log::debug!(
                "{:?}: size {}, {}{}, footer {:#x}",
                BlockPtr(b),
                size,
                if block::is_allocated(header) { "allocated" } else { "free" },
                if block::is_tagged(header) { ", tagged" } else { "" },
                footer
            );
        }

        if header != footer {
            report(Violation::HeaderFooterMismatch {
                block: b,
                header,
                footer,
            });
        }

        let is_free = !block::is_allocated(header);
        if is_free {
            if prev_free {
                report(Violation::UncoalescedFree { block: b });
            }
            on_free(b);
        } else if block::is_tagged(header) {
            report(Violation::TaggedAllocated { block: b });
        }
        prev_free = is_free;
        b += size;
    }
}

/// The footer word of a block of `size` bytes at `b`, if the block ends
/// inside the arena.
fn footer_of<R>(arena: &Arena<R>, b: usize, size: usize) -> Option<u32> {
    b.checked_add(size)
        .filter(|&end| end <= arena.heap_size().0)
        .and_then(|end| arena.word_checked(end - DOUBLE_WORD_SIZE))
}

/// The position of one node within its bucket.
struct Cursor {
    class: usize,
    min: usize,
    max: usize,
    prev: Option<BlockPtr>,
    prev_size: usize,
}

impl Cursor {
    fn new(classes: &SizeClasses, class: usize) -> Self {
        let (min, max) = classes.bounds(class);
        Cursor {
            class,
            min,
            max,
            prev: None,
            prev_size: 0,
        }
    }

    /// Check the links, size class, and order of the free block `n`, then
    /// step past it.
    fn visit<R>(
        &mut self,
        arena: &Arena<R>,
        n: BlockPtr,
        verbose: bool,
        report: &mut impl FnMut(Violation),
    ) -> Option<BlockPtr> {
        let class = self.class;
        let size = arena.size(n);
        if verbose {
            log::debug!(
                "bucket {}: {:?} size {}, pred {:?}, succ {:?}",
                class,
                n,
                size,
                arena.pred(n),
                arena.succ(n)
            );
        }
        if arena.pred(n) != self.prev {
            report(Violation::BrokenLink { class, block: n.0 });
        }
        if size < self.min || size > self.max {
            report(Violation::WrongClass {
                class,
                block: n.0,
                size,
            });
        }
        if size < self.prev_size {
            report(Violation::OutOfOrder { class, block: n.0 });
        }

        self.prev = Some(n);
        self.prev_size = size;
        arena.succ(n)
    }
}

/// Walk every bucket, matching each node against the free blocks found by
/// the arena walk.
fn walk_buckets<R>(
    arena: &Arena<R>,
    classes: &SizeClasses,
    free: &[usize],
    verbose: bool,
    violations: &mut Vec<Violation>,
) {
    // The bucket each free block was found in.
    let mut found_in: Vec<Option<usize>> = vec![None; free.len()];
    let mut report = |v: Violation| violations.push(v);

    for class in 0..classes.len() {
        let mut cursor = Cursor::new(classes, class);
        let mut node = classes.head(class);

        while let Some(n) = node {
            if n.0 % ALIGNMENT != 0 {
                report(Violation::Misaligned { block: n.0 });
                break;
            }
            let i = match free.binary_search(&n.0) {
                Ok(i) => i,
                Err(_) => {
                    report(Violation::IndexedNotFree { class, block: n.0 });
                    break;
                }
            };
            match found_in[i] {
                Some(c) if c == class => {
                    report(Violation::Cycle { class, block: n.0 });
                    break;
                }
                Some(_) => {
                    report(Violation::DuplicateIndexEntry { class, block: n.0 });
                    break;
                }
                None => found_in[i] = Some(class),
            }

            node = cursor.visit(arena, n, verbose, &mut report);
        }
    }

    for (&b, found) in free.iter().zip(&found_in) {
        if found.is_none() {
            report(Violation::NotIndexed { block: b });
        }
    }
}

/// Walk every bucket, checking only that each node looks like a free block.
/// Returns the number of nodes.
#[cfg(feature = "extra_assertions")]
fn walk_buckets_shallow<R>(
    arena: &Arena<R>,
    classes: &SizeClasses,
    free_blocks: usize,
    report: &mut impl FnMut(Violation),
) -> usize {
    let mut indexed = 0;

    for class in 0..classes.len() {
        let mut cursor = Cursor::new(classes, class);
        let mut node = classes.head(class);
        let mut steps = 0;

        while let Some(n) = node {
            if n.0 % ALIGNMENT != 0 {
                report(Violation::Misaligned { block: n.0 });
                break;
            }
            let looks_free = arena.contains(n.0)
                && arena.word_checked(n.0 - WORD_SIZE).map_or(false, |header| {
                    let size = block::size(header);
                    !block::is_allocated(header)
                        && size >= MIN_BLOCK_SIZE
                        && footer_of(arena, n.0, size) == Some(header)
                });
            if !looks_free {
                report(Violation::IndexedNotFree { class, block: n.0 });
                break;
            }
            steps += 1;
            if steps > free_blocks {
                report(Violation::Cycle { class, block: n.0 });
                break;
            }

            indexed += 1;
            node = cursor.visit(arena, n, false, &mut *report);
        }
    }
    indexed
}
