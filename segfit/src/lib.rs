/*!

`segfit`: a boundary-tag allocator with segregated free lists.

- **Boundary tags:** every block carries its size and allocation state in a
  one-word header and a matching one-word footer, so both physical
  neighbors of a block are found in *O(1)* and adjacent free blocks are
  always merged immediately.

- **Segregated fits:** free blocks live in power-of-two size classes, each a
  doubly linked list kept in ascending size order. Allocation searches the
  request's own class and then the larger ones, which makes the first fit in
  a class its best fit.

- **`#![no_std]`:** the allocator only needs a contiguous region it can grow
  with an `sbrk`-style break. On unix the default region is one lazily
  reserved anonymous `mmap`; any caller-provided buffer works as well.

- [Using `segfit` as the Global Allocator](#using-segfit-as-the-global-allocator)
- [Using a `Heap` Directly](#using-a-heap-directly)
- [`cargo` Features](#cargo-features)
- [Implementation Notes and Constraints](#implementation-notes-and-constraints)
- [License](#license)

## Using `segfit` as the Global Allocator

```no_run
use segfit::{LockedHeap, MmapRegion};

#[global_allocator]
static ALLOC: LockedHeap<MmapRegion> = LockedHeap::INIT;

fn main() {
    let v: Vec<u64> = (0..1000).collect();
    assert_eq!(v.len(), 1000);
}
```

The heap reserves at most `DEFAULT_MAX_HEAP` bytes, 20 MiB unless the
`SEGFIT_MAX_HEAP_BYTES` environment variable says otherwise at build time.

## Using a `Heap` Directly

```
use segfit::{Heap, HeapConfig, ReallocPolicy, SliceRegion};

let mut buffer = vec![0u8; 1 << 16];
let config = HeapConfig::DEFAULT.with_realloc(ReallocPolicy::InPlace);
let mut heap = Heap::with_config(SliceRegion::new(&mut buffer), config);

let p = heap.allocate(100).unwrap();
let p = unsafe { heap.reallocate(Some(p), 1000) }.unwrap();
unsafe { heap.free(Some(p)) };
assert!(heap.validate(false).is_empty());
```

## `cargo` Features

- **extra_assertions**: Enable various extra, expensive integrity assertions.
  Every public heap operation ends by validating the whole heap and panics
  on the first inconsistency. This incurs a large runtime overhead. It is
  useful when debugging a heap corruption or `segfit` itself.

## Implementation Notes and Constraints

- Each allocation carries two words (8 bytes) of overhead, and the smallest
  block is 16 bytes.

- Payloads are 8-byte aligned. Larger alignments go through
  `Heap::allocate_aligned`, which over-allocates and gives the unused lead
  and tail back to the free lists.

- Deallocation is *O(1)* apart from the sorted insert into a size class.

- The arena only ever grows. Freed space stays in the free lists for future
  allocations and is never handed back to the host.

- Block sizes and free-list links are 32-bit, so an arena is limited to just
  under 4 GiB.

```text
+------------------------------------------------------------------------------+
| Host (mmap / caller buffer)                                                  |
+------------------------------------------------------------------------------+
                   |
                   | sbrk(max(request, chunk))
                   V
+------------------------------------------------------------------------------+
| Arena                                                                        |
|                                                                              |
| [pad][prologue][ hdr | payload | ftr ][ hdr | payload | ftr ] ... [epilogue] |
|                                                                              |
+------------------------------------------------------------------------------+
          |                 ^                       |                ^
          | free blocks     | coalesced             | best fit       |
          V                 | neighbors             V                |
+---------------------------------------------+     +--------------------------+
| Size Classes                                |     | User Application         |
|                                             |     |                          |
| [16, 32)    --> blk <-> blk <-> ...         |     |  allocate / free /       |
| [32, 64)    --> blk <-> blk <-> ...         | --> |  reallocate              |
| ...                                         |     |                          |
| [2^15, inf) --> blk <-> ...                 |     |                          |
+---------------------------------------------+     +--------------------------+
```

## License

Licensed under the [Mozilla Public License 2.0](https://www.mozilla.org/en-US/MPL/2.0/).

 */

#![deny(missing_docs)]
#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

#[macro_use]
mod extra_assert;

mod arena;
pub mod block;
mod coalesce;
mod const_init;
mod heap;
mod locked;
mod region;
mod size_classes;
mod validate;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod imp_unix;
        pub use imp_unix::MmapRegion;
    }
}

pub use const_init::ConstInit;
pub use heap::{Heap, HeapConfig, ReallocPolicy, DEFAULT_CHUNK_SIZE, DEFAULT_SIZE_CLASSES};
pub use locked::LockedHeap;
pub use region::{Region, SliceRegion};
pub use size_classes::MAX_SIZE_CLASSES;
pub use validate::Violation;

use memory_units::Bytes;

/// The most an `MmapRegion` built with `MmapRegion::INIT` hands out.
pub const DEFAULT_MAX_HEAP: Bytes = Bytes(include!(concat!(
    env!("OUT_DIR"),
    "/segfit_max_heap_bytes.txt"
)));

/// The host region could not provide the requested memory, or a request was
/// too large for the arena to describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("out of memory")]
pub struct AllocErr;
