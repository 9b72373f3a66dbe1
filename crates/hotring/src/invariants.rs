//! Debug assertion macros for byte-ring cursor invariants.
//!
//! Runtime checks for the position protocol `read ≤ commit ≤ write`. Only
//! active in debug builds (`debug_assert!`), so there is zero overhead in
//! release builds.

/// Assert that the committed high-water mark never trails the read cursor.
///
/// **Invariant**: `read ≤ commit`
macro_rules! debug_assert_read_le_commit {
    ($read:expr, $commit:expr) => {
        debug_assert!(
            $read <= $commit,
            "cursor invariant violated: read {} ahead of commit {}",
            $read,
            $commit
        )
    };
}

/// Assert that the commit mark never passes the reserved write position.
///
/// **Invariant**: `commit ≤ write`
macro_rules! debug_assert_commit_le_write {
    ($commit:expr, $write:expr) => {
        debug_assert!(
            $commit <= $write,
            "cursor invariant violated: commit {} ahead of write {}",
            $commit,
            $write
        )
    };
}

/// Assert that a cursor only moves forward.
///
/// **Invariant**: `new_value ≥ old_value`
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "cursor invariant violated: {} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that the occupied span never exceeds capacity.
///
/// **Invariant**: `commit − read ≤ capacity`
macro_rules! debug_assert_bounded_span {
    ($span:expr, $capacity:expr) => {
        debug_assert!(
            $span <= $capacity,
            "cursor invariant violated: occupied span {} exceeds capacity {}",
            $span,
            $capacity
        )
    };
}

pub(crate) use debug_assert_bounded_span;
pub(crate) use debug_assert_commit_le_write;
pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_read_le_commit;
