// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A growable, contiguously-addressed vector with pluggable backing
//! storage.
//!
//! [Vector] is generic over a [backend::Backend]: [backend::HeapBackend]
//! grows a single general-purpose allocation, [backend::AnonMapBackend]
//! grows a private anonymous memory mapping, and (with the `std` feature)
//! [backend::FileBackend] grows a file-backed mapping that persists its
//! contents across process restarts. All three share one capacity-growth
//! policy (double from 16, or from the current capacity if already above
//! the floor) and expose the same [backend::Backend] contract, so `Vector`
//! itself never has to know which one it's holding.
//!
//! With the `concurrent` feature, [ConcurrentVector] offers a second mode:
//! many threads may append concurrently without taking a lock on the
//! common case, at the cost of dropping every other mutating operation
//! (no `pop`, no indexed write, no resize). See [concurrent] for the
//! coordination protocol.
//!
//! `T` is bounded by `Copy` everywhere in this crate: it is the static
//! stand-in for "trivially relocatable and destructible," which is what
//! lets every backend grow a buffer with a flat byte-copy instead of
//! per-element move/drop glue.

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

#[cfg(feature = "std")]
extern crate std;
extern crate alloc;

pub mod backend;
mod error;
pub mod vector;

#[cfg(feature = "concurrent")]
pub mod concurrent;

pub use backend::{AnonMapBackend, Backend, HeapBackend};
#[cfg(feature = "std")]
pub use backend::{FileBackend, FileMapArgs, OpenFlags};
#[cfg(feature = "concurrent")]
pub use concurrent::ConcurrentVector;
pub use error::Error;
pub use vector::Vector;
