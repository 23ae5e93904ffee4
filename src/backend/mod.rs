// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The allocator family: a small trait unifying heap `realloc`, anonymous
//! `mmap`/`mremap`, and file-backed `mmap`/`mremap`/`ftruncate` growth behind
//! one contract, plus the capacity-growth policy shared by all three.
//!
//! Dispatch is static: [Vector](crate::vector::Vector) and
//! [ConcurrentVector](crate::concurrent::ConcurrentVector) are generic over
//! `B: Backend<T>`, so `grow_to` and friends are monomorphized rather than
//! going through a vtable, the same tradeoff `datadog_alloc::VirtualVec`
//! makes by being generic over a fixed allocator rather than boxing one.

mod anon;
mod heap;

#[cfg(feature = "std")]
mod file;

pub use anon::AnonMapBackend;
pub use heap::HeapBackend;

#[cfg(feature = "std")]
pub use file::{FileBackend, FileMapArgs, OpenFlags};

use crate::error::Error;
use core::ptr::NonNull;

/// A polymorphic capability exposing one contiguous buffer of `T` of some
/// capacity, plus the operations needed to grow it and to learn how many
/// elements were durably present when it was opened.
///
/// Implementations own their buffer exclusively: there is no way to obtain
/// two live `Backend`s over the same memory. `grow_to` may move the buffer;
/// callers must re-fetch [Backend::ptr] after a successful call.
pub trait Backend<T>: Sized {
    /// Backend-specific construction arguments (e.g. nothing for `Heap`, a
    /// path and open flags for `FileMap`).
    type Args;

    /// Constructs the backend, acquiring its initial buffer.
    fn new(args: Self::Args) -> Result<Self, Error>;

    /// A pointer to the start of the contiguous buffer. Valid for
    /// `[ptr, ptr + capacity())` as long as no intervening `grow_to` call
    /// has happened.
    fn ptr(&self) -> NonNull<T>;

    /// The number of elements the current buffer can hold.
    fn capacity(&self) -> usize;

    /// The number of elements already durably present in a prior
    /// incarnation of this backend (nonzero only for `FileMap`, and only
    /// until the first [Backend::sync] call updates it).
    fn backing_size(&self) -> usize {
        0
    }

    /// Guarantees that `capacity() >= n` on return, preserving the bytes of
    /// the first `min(old_capacity, n)` elements. A no-op if `n <=
    /// capacity()`.
    fn grow_to(&mut self, n: usize) -> Result<(), Error>;

    /// Called by the owning container on drop with the final element
    /// count. The default is a no-op; `FileMap` uses it to record how many
    /// elements should be considered persisted.
    fn sync(&mut self, used: usize) {
        let _ = used;
    }
}

/// The capacity-growth policy used by [crate::vector::Vector] and
/// [crate::concurrent::ConcurrentVector] when they ask a backend to grow:
/// given a request for capacity `>= needed`, start at 16 unless the current
/// capacity is already above 8 (in which case start from there), then
/// double until the target is reached. This is deliberately shared by all
/// three backends rather than being part of the `Backend` trait, since it
/// is a policy the *container* applies, not a property of the storage
/// itself.
pub(crate) fn next_capacity(current: usize, needed: usize) -> usize {
    debug_assert!(needed > current);
    let mut cap = if current <= 8 { 16 } else { current };
    while cap < needed {
        cap = match cap.checked_mul(2) {
            Some(doubled) => doubled,
            None => return needed,
        };
    }
    cap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_sixteen_from_empty() {
        assert_eq!(16, next_capacity(0, 1));
        assert_eq!(16, next_capacity(0, 16));
    }

    #[test]
    fn doubles_from_above_the_floor() {
        assert_eq!(32, next_capacity(20, 21));
        assert_eq!(40, next_capacity(20, 40));
        assert_eq!(80, next_capacity(20, 41));
    }

    #[test]
    fn never_below_needed() {
        for current in [0usize, 1, 8, 9, 100, 1000] {
            for needed in [current + 1, current + 2, current * 3 + 7] {
                assert!(next_capacity(current, needed) >= needed);
            }
        }
    }
}
