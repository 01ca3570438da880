use super::arena::{Arena, BlockPtr};
use super::size_classes::SizeClasses;

/// Merge the free, unindexed block `b` with whichever of its physical
/// neighbors are free.
///
/// Absorbed neighbors are unlinked from their buckets first. The merged
/// block is written untagged and is *not* put back in a bucket; the caller
/// either indexes it or places an allocation in it.
pub(crate) fn coalesce<R>(arena: &mut Arena<R>, classes: &mut SizeClasses, b: BlockPtr) -> BlockPtr {
    extra_assert!(!arena.is_allocated(b));

    let prev = arena.prev_block(b);
    let next = arena.next_block(b);
    let prev_allocated = arena.is_allocated(prev);
    let next_allocated = arena.is_allocated(next);
    let mut size = arena.size(b);

    let merged = match (prev_allocated, next_allocated) {
        (true, true) => b,
        (true, false) => {
            classes.remove(arena, next);
            size += arena.size(next);
            b
        }
        (false, true) => {
            classes.remove(arena, prev);
            size += arena.size(prev);
            prev
        }
        (false, false) => {
            classes.remove(arena, prev);
            classes.remove(arena, next);
            size += arena.size(prev) + arena.size(next);
            prev
        }
    };

    arena.write_tags(merged, size, false, false);
    log::trace!("coalesced {:?} into {:?} ({} bytes)", b, merged, size);
    merged
}
