//! Assertions that only run with the "extra_assertions" feature.
//!
//! Each macro expands to an `if` on a constant, so the checked expressions
//! are type checked in every build and compiled out when the feature is off.

macro_rules! extra_assert {
    ( $($assertion:tt)+ ) => {
        if cfg!(feature = "extra_assertions") {
            assert!($($assertion)+);
        }
    };
}

macro_rules! extra_assert_eq {
    ( $($assertion:tt)+ ) => {
        if cfg!(feature = "extra_assertions") {
            assert_eq!($($assertion)+);
        }
    };
}

/// Block offsets, block sizes and payload addresses are all multiples of
/// the payload alignment.
macro_rules! extra_assert_aligned {
    ( $value:expr ) => {
        extra_assert_eq!(
            ($value) % $crate::block::ALIGNMENT,
            0,
            "{:#x} is not {}-byte aligned",
            $value,
            $crate::block::ALIGNMENT
        )
    };
}
