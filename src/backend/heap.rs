// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::Backend;
use crate::error::Error;
use alloc::alloc::{alloc, dealloc, realloc, Layout};
use core::mem;
use core::ptr::NonNull;

/// Minimum initial capacity for the heap backend.
const INITIAL_CAPACITY: usize = 16;

/// Heap-backed storage: a single `realloc`-grown allocation from the global
/// allocator. This is the plain-vanilla backend — no mapping, no file, just
/// `alloc`/`realloc`/`dealloc`, the same primitives
/// [crate::backend::AnonMapBackend] falls back to when `mremap` isn't
/// available, but used directly here rather than as a fallback.
pub struct HeapBackend<T> {
    ptr: NonNull<T>,
    capacity: usize,
}

unsafe impl<T: Send> Send for HeapBackend<T> {}

impl<T> HeapBackend<T> {
    fn layout_for(capacity: usize) -> Result<Layout, Error> {
        Layout::array::<T>(capacity).map_err(|_| Error::AllocationFailure)
    }
}

impl<T> Backend<T> for HeapBackend<T> {
    type Args = ();

    fn new(_args: ()) -> Result<Self, Error> {
        let layout = Self::layout_for(INITIAL_CAPACITY)?;
        // SAFETY: layout has nonzero size for any T with size_of::<T>() > 0;
        // zero-sized T is rejected by Vector at construction (see vector.rs).
        let raw = unsafe { alloc(layout) };
        let ptr = NonNull::new(raw.cast::<T>()).ok_or(Error::AllocationFailure)?;
        Ok(Self {
            ptr,
            capacity: INITIAL_CAPACITY,
        })
    }

    fn ptr(&self) -> NonNull<T> {
        self.ptr
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn grow_to(&mut self, n: usize) -> Result<(), Error> {
        if n <= self.capacity {
            return Ok(());
        }
        let old_layout = Self::layout_for(self.capacity)?;
        let new_layout = Self::layout_for(n)?;
        // SAFETY: `self.ptr` was allocated with `old_layout` (either here or
        // in a prior `grow_to`/`new` call), and `new_layout.size()` is
        // nonzero since n > capacity >= 0 and size_of::<T>() > 0.
        let raw = unsafe { realloc(self.ptr.as_ptr().cast(), old_layout, new_layout.size()) };
        let ptr = NonNull::new(raw.cast::<T>()).ok_or(Error::AllocationFailure)?;
        self.ptr = ptr;
        self.capacity = n;
        Ok(())
    }
}

impl<T> Drop for HeapBackend<T> {
    fn drop(&mut self) {
        if self.capacity > 0 && mem::size_of::<T>() > 0 {
            if let Ok(layout) = Self::layout_for(self.capacity) {
                // SAFETY: `self.ptr` was allocated with this exact layout.
                unsafe { dealloc(self.ptr.as_ptr().cast(), layout) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_minimum_capacity() {
        let backend = HeapBackend::<u32>::new(()).unwrap();
        assert_eq!(INITIAL_CAPACITY, backend.capacity());
    }

    #[test]
    fn grow_preserves_prefix() {
        let mut backend = HeapBackend::<u32>::new(()).unwrap();
        for i in 0..INITIAL_CAPACITY as u32 {
            // SAFETY: i is within the initial capacity.
            unsafe { backend.ptr().as_ptr().add(i as usize).write(i) };
        }
        backend.grow_to(100).unwrap();
        assert!(backend.capacity() >= 100);
        for i in 0..INITIAL_CAPACITY as u32 {
            // SAFETY: the prefix survived the grow.
            let value = unsafe { backend.ptr().as_ptr().add(i as usize).read() };
            assert_eq!(i, value);
        }
    }

    #[test]
    fn grow_to_smaller_is_noop() {
        let mut backend = HeapBackend::<u32>::new(()).unwrap();
        let cap_before = backend.capacity();
        backend.grow_to(1).unwrap();
        assert_eq!(cap_before, backend.capacity());
    }
}
