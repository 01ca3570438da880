/// Anything that can be initialized with a `const` value.
///
/// Lets a whole `LockedHeap` be built in a `static` without running any
/// code before the first allocation.
pub trait ConstInit {
    /// The `const` default initializer value for `Self`.
    const INIT: Self;
}
