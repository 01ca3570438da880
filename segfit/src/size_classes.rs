use super::arena::{Arena, BlockPtr};
use core::cmp;

/// The most buckets a heap can be configured with.
pub const MAX_SIZE_CLASSES: usize = 32;

/// Segregated free lists.
///
/// Bucket `i` holds the free blocks whose size is in `[2^i, 2^(i+1))`, and
/// the last bucket also takes everything larger. Each bucket is a doubly
/// linked list threaded through the payloads of its blocks, kept in
/// ascending size order so the first block that fits is also the best fit
/// within its class.
pub(crate) struct SizeClasses {
    heads: [Option<BlockPtr>; MAX_SIZE_CLASSES],
    classes: usize,
}

impl SizeClasses {
    pub(crate) const fn new(classes: usize) -> Self {
        let classes = if classes == 0 {
            1
        } else if classes > MAX_SIZE_CLASSES {
            MAX_SIZE_CLASSES
        } else {
            classes
        };
        SizeClasses {
            heads: [None; MAX_SIZE_CLASSES],
            classes,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.classes
    }

    pub(crate) fn head(&self, class: usize) -> Option<BlockPtr> {
        self.heads[class]
    }

    /// The bucket for blocks of `size` bytes.
    pub(crate) fn class_of(&self, size: usize) -> usize {
        let log2 = (usize::BITS - 1 - cmp::max(size, 1).leading_zeros()) as usize;
        cmp::min(log2, self.classes - 1)
    }

    /// The sizes a bucket may hold, as `(min, max)` with `max` inclusive.
    pub(crate) fn bounds(&self, class: usize) -> (usize, usize) {
        let min = 1usize << class;
        if class + 1 == self.classes {
            (min, usize::MAX)
        } else {
            (min, (min << 1) - 1)
        }
    }

    /// Splice the free block `b` into its bucket, before the first block that
    /// is at least as large.
    pub(crate) fn insert<R>(&mut self, arena: &mut Arena<R>, b: BlockPtr) {
        extra_assert!(!arena.is_allocated(b));
        let size = arena.size(b);
        let class = self.class_of(size);

        let mut prev = None;
        let mut next = self.heads[class];
        while let Some(node) = next {
            if arena.size(node) >= size {
                break;
            }
            prev = next;
            next = arena.succ(node);
        }

        arena.set_pred(b, prev);
        arena.set_succ(b, next);
        match prev {
            Some(p) => arena.set_succ(p, Some(b)),
            None => self.heads[class] = Some(b),
        }
        if let Some(n) = next {
            arena.set_pred(n, Some(b));
        }
    }

    /// Unsplice `b` from its bucket. Its size must be the one it was inserted
    /// with.
    pub(crate) fn remove<R>(&mut self, arena: &mut Arena<R>, b: BlockPtr) {
        let class = self.class_of(arena.size(b));
        let prev = arena.pred(b);
        let next = arena.succ(b);

        match prev {
            Some(p) => arena.set_succ(p, next),
            None => {
                extra_assert_eq!(self.heads[class], Some(b), "{:?} is not in bucket {}", b, class);
                self.heads[class] = next;
            }
        }
        if let Some(n) = next {
            arena.set_pred(n, prev);
        }
    }

    /// Find a free block of at least `size` bytes, searching `size`'s own
    /// class first and then every larger one.
    pub(crate) fn find_fit<R>(
        &self,
        arena: &Arena<R>,
        size: usize,
        skip_tagged: bool,
    ) -> Option<BlockPtr> {
        (self.class_of(size)..self.classes).find_map(|class| {
            self.iter(arena, class)
                .find(|&node| arena.size(node) >= size && !(skip_tagged && arena.is_tagged(node)))
        })
    }

    #[cfg(test)]
    pub(crate) fn set_head_unchecked(&mut self, class: usize, head: Option<BlockPtr>) {
        self.heads[class] = head;
    }

    /// Walk one bucket from its head.
    pub(crate) fn iter<'a, R>(&self, arena: &'a Arena<R>, class: usize) -> Bucket<'a, R> {
        Bucket {
            arena,
            next: self.heads[class],
        }
    }
}

pub(crate) struct Bucket<'a, R> {
    arena: &'a Arena<R>,
    next: Option<BlockPtr>,
}

impl<'a, R> Iterator for Bucket<'a, R> {
    type Item = BlockPtr;

    fn next(&mut self) -> Option<BlockPtr> {
        let node = self.next?;
        self.next = self.arena.succ(node);
        Some(node)
    }
}
