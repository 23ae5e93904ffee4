// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The lock-free many-writer append mode. A single `grow_lock` mutex
//! serializes the (rare) backend-growth path; every other writer proceeds
//! without ever blocking on another writer's element write.

use crate::backend::{self, Backend};
use crate::error::Error;
use core::cell::UnsafeCell;
use core::ptr;

// Under the `loom` feature, the atomics and the mutex below are loom's own
// model-checked stand-ins instead of `core`/`std`'s, so that
// `cargo test --features loom` can exhaustively explore interleavings of
// `try_append` rather than just running it once. The backend cell stays a
// plain `core::cell::UnsafeCell`: loom's own cell type would require
// threading every access through a closure, which would obscure the
// pointer-visibility argument this module exists to demonstrate. See
// `tests/loom_tests.rs`, grounded on `rama-utils`'s `AppendOnlyVec` loom
// harness.
#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
#[cfg(feature = "loom")]
use loom::sync::Mutex;

#[cfg(not(feature = "loom"))]
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
#[cfg(not(feature = "loom"))]
use std::sync::Mutex;

/// Number of `spin_loop` iterations a stalled writer burns through before
/// falling back to `yield_now`, matching the backoff shape used by
/// `AppendOnlyVec`'s spin helper.
const SPIN_ITERATIONS_BEFORE_YIELD: u32 = 10;

fn spin_wait(attempt: u32) {
    if attempt < SPIN_ITERATIONS_BEFORE_YIELD {
        core::hint::spin_loop();
    } else {
        #[cfg(feature = "loom")]
        loom::thread::yield_now();
        #[cfg(not(feature = "loom"))]
        std::thread::yield_now();
    }
}

/// A lock-free many-writer, append-only sequence of `T`, generic over a
/// storage [Backend]. Any number of threads may call [ConcurrentVector::try_append]
/// concurrently without external synchronization; growing the backend is
/// the one operation serialized behind an internal mutex, and only the
/// writer that drains the last in-flight append pays for it.
///
/// Reading back the contents concurrently with writers is intentionally
/// not exposed as a safe API beyond [ConcurrentVector::len]; see
/// [ConcurrentVector::as_slice_unsynchronized].
pub struct ConcurrentVector<T: Copy, B: Backend<T>> {
    backend: UnsafeCell<B>,
    /// Monotonically reserves indices for appenders. Relaxed: this is a
    /// ticket counter, not a synchronization point.
    element_count: AtomicUsize,
    /// The capacity writers are currently allowed to address. Published
    /// with `Release` after a successful grow; loaded with `Acquire` before
    /// every element write, so that a writer observing `idx < published`
    /// also observes the backend pointer the grow installed.
    published_capacity: AtomicUsize,
    /// The highest index any in-flight writer has discovered it needs.
    /// Monotonic; only ever raised via `fetch_max`.
    needed_capacity: AtomicUsize,
    /// Count of writers currently between "reserved an index" and "wrote
    /// it or gave up growing". Used to detect the last writer draining the
    /// slow path, who becomes responsible for growing.
    ops_in_progress: AtomicUsize,
    /// Serializes the (rare) backend-growth call itself.
    grow_lock: Mutex<()>,
    /// Set if a grow attempt failed; every slow-path participant checks it
    /// so that a backend failure turns into `Error::Poisoned` for all
    /// waiting writers instead of an infinite spin. This is this crate's
    /// resolution of the "what happens if the resizer fails" design point.
    poisoned: AtomicBool,
}

unsafe impl<T: Copy + Send, B: Backend<T> + Send> Sync for ConcurrentVector<T, B> {}

impl<T: Copy, B: Backend<T>> ConcurrentVector<T, B> {
    /// Opens or creates the backing storage. If it already held durable
    /// elements (only possible for `FileMap`), they count towards
    /// `len()`/`published_capacity` immediately.
    pub fn new(args: B::Args) -> Result<Self, Error> {
        let backend = B::new(args)?;
        let capacity = backend.capacity();
        let backing_size = backend.backing_size();
        Ok(Self {
            backend: UnsafeCell::new(backend),
            element_count: AtomicUsize::new(backing_size),
            published_capacity: AtomicUsize::new(capacity),
            needed_capacity: AtomicUsize::new(capacity),
            ops_in_progress: AtomicUsize::new(0),
            grow_lock: Mutex::new(()),
            poisoned: AtomicBool::new(false),
        })
    }

    /// A snapshot of the element count. Under concurrent writers this is
    /// only a lower bound on what will eventually be visible; it is exact
    /// once all writers have returned from `try_append`.
    pub fn len(&self) -> usize {
        self.element_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The capacity currently published to writers.
    pub fn capacity(&self) -> usize {
        self.published_capacity.load(Ordering::Acquire)
    }

    /// Reserves the next index and writes `value` into it, growing the
    /// backend first if every in-flight writer has observed the buffer is
    /// full. Returns the index `value` was written at.
    ///
    /// Implements the bounded-loop coordination protocol: a
    /// writer reserves its index unconditionally, then either takes the
    /// fast path (the buffer is already big enough) or helps publish the
    /// new `needed_capacity` and either grows (if it is the last writer
    /// still active) or spins until someone else's grow publishes a big
    /// enough capacity.
    pub fn try_append(&self, value: T) -> Result<usize, Error> {
        let idx = self.element_count.fetch_add(1, Ordering::Relaxed);
        self.ops_in_progress.fetch_add(1, Ordering::Relaxed);

        let mut attempt: u32 = 0;
        loop {
            if self.poisoned.load(Ordering::Relaxed) {
                self.ops_in_progress.fetch_sub(1, Ordering::Relaxed);
                return Err(Error::Poisoned);
            }

            let cap = self.published_capacity.load(Ordering::Acquire);
            if idx < cap {
                // SAFETY: `idx < cap` was observed via an Acquire load that
                // pairs with the Release store in `grow_locked`, so the
                // (plain, non-atomic) buffer pointer a prior grow installed
                // is visible here, and `idx` is within that buffer's
                // capacity. No other writer touches this exact index.
                unsafe { self.write_at(idx, value) };
                self.ops_in_progress.fetch_sub(1, Ordering::Relaxed);
                return Ok(idx);
            }

            self.needed_capacity.fetch_max(idx + 1, Ordering::Relaxed);

            let remaining = self.ops_in_progress.fetch_sub(1, Ordering::Relaxed) - 1;
            if remaining == 0 {
                // We drained the last in-flight operation: nobody else can
                // be relying on the buffer's current address, so it is our
                // job to grow it.
                let result = self.grow_locked();
                self.ops_in_progress.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = result {
                    self.poisoned.store(true, Ordering::Relaxed);
                    return Err(err);
                }
            } else {
                spin_wait(attempt);
                attempt = attempt.saturating_add(1);
                self.ops_in_progress.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// # Safety
    /// Caller must ensure `idx < published_capacity` (observed via an
    /// Acquire load) and that no other writer is targeting the same index.
    unsafe fn write_at(&self, idx: usize, value: T) {
        let ptr = (*self.backend.get()).ptr();
        ptr::write(ptr.as_ptr().add(idx), value);
    }

    fn grow_locked(&self) -> Result<(), Error> {
        // A poisoned lock still hands back its guard: the only state it
        // protects is the backend/published_capacity pair below, and a
        // panicking grower already routes through the `poisoned` flag for
        // every other waiter, so there is nothing extra to distrust here.
        let _guard = self.grow_lock.lock().unwrap_or_else(|e| e.into_inner());
        let published = self.published_capacity.load(Ordering::Relaxed);
        let needed = self.needed_capacity.load(Ordering::Relaxed);
        if needed <= published {
            // Another writer already grew far enough while we waited for
            // the lock.
            return Ok(());
        }
        let target = backend::next_capacity(published, needed);
        // SAFETY: `_guard` gives us exclusive access to the backend: every
        // other writer is either spinning on `published_capacity` or
        // blocked on this same lock, and none dereferences the backend's
        // pointer without first re-observing `published_capacity`.
        let backend = unsafe { &mut *self.backend.get() };
        backend.grow_to(target)?;
        self.published_capacity.store(target, Ordering::Release);
        Ok(())
    }

    /// A checked read of element `index`. Like [Self::len], this only
    /// reflects writes that have completed-and-returned as far as the
    /// calling thread can tell; callers needing a stronger guarantee must
    /// synchronize externally (e.g. joining writer threads first).
    pub fn at(&self, index: usize) -> Result<T, Error> {
        let len = self.len();
        if index >= len {
            return Err(Error::OutOfRange { index, len });
        }
        // SAFETY: index < len <= published_capacity, and the element at
        // `index` was written by a `try_append` that returned before this
        // call observed it in `len()`.
        let ptr = unsafe { (*self.backend.get()).ptr() };
        Ok(unsafe { ptr::read(ptr.as_ptr().add(index)) })
    }

    /// Exposes the occupied prefix as a slice without any synchronization
    /// against in-flight writers. The burden of establishing a
    /// happens-before relationship (e.g. joining all writer threads, or
    /// another external barrier) falls on the caller before this is sound
    /// to read; the only safety this method itself supplies is that
    /// `len()` and the backend pointer are read together under one Acquire
    /// fence.
    ///
    /// # Safety
    /// The caller must ensure no writer is concurrently appending, and
    /// that any prior writers' effects have been made visible to this
    /// thread (e.g. by joining their threads).
    pub unsafe fn as_slice_unsynchronized(&self) -> &[T] {
        let len = self.element_count.load(Ordering::Acquire);
        let ptr = (*self.backend.get()).ptr();
        core::slice::from_raw_parts(ptr.as_ptr(), len)
    }

    fn unsupported(op: &'static str) -> Error {
        Error::NotSupportedInConcurrentMode { op }
    }

    /// Always fails: concurrent-append mode has no serial "remove the
    /// last element" operation, since there is no way to tell which
    /// writer's append was logically last.
    pub fn pop(&self) -> Result<T, Error> {
        Err(Self::unsupported("pop"))
    }

    /// Always fails; see [Self::pop].
    pub fn clear(&self) -> Result<(), Error> {
        Err(Self::unsupported("clear"))
    }

    /// Always fails; see [Self::pop].
    pub fn resize(&self) -> Result<(), Error> {
        Err(Self::unsupported("resize"))
    }

    /// Always fails; see [Self::pop].
    pub fn shrink_to_fit(&self) -> Result<(), Error> {
        Err(Self::unsupported("shrink_to_fit"))
    }
}

impl<T: Copy, B: Backend<T>> Drop for ConcurrentVector<T, B> {
    fn drop(&mut self) {
        let len = *self.element_count.get_mut();
        self.backend.get_mut().sync(len);
    }
}
