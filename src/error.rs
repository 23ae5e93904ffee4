// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

/// The error type returned by every fallible operation in this crate.
///
/// A plain enum instead of `thiserror`, so the crate stays usable from
/// `no_std`.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An operating-system call failed. `op` names the call (e.g. `"mmap"`,
    /// `"ftruncate"`, `"open"`), `errno` is the raw OS error number.
    Io { op: &'static str, errno: i32 },
    /// A general-purpose or virtual-memory allocation was refused.
    AllocationFailure,
    /// A `FileMap` was opened on a file whose length is not a multiple of
    /// `size_of::<T>()`.
    CorruptedFile { len: u64, elem_size: usize },
    /// A checked index was out of bounds.
    OutOfRange { index: usize, len: usize },
    /// The operation is not available on a concurrent-mode vector.
    NotSupportedInConcurrentMode { op: &'static str },
    /// A prior grow attempt failed and left the vector unable to make
    /// progress; see `ConcurrentVector`'s poisoning policy.
    Poisoned,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io { op, errno } => {
                #[cfg(feature = "std")]
                {
                    let cause = std::io::Error::from_raw_os_error(*errno);
                    write!(f, "{op} failed: {cause}")
                }
                #[cfg(not(feature = "std"))]
                {
                    write!(f, "{op} failed with errno {errno}")
                }
            }
            Error::AllocationFailure => f.write_str("memory allocation failed"),
            Error::CorruptedFile { len, elem_size } => write!(
                f,
                "file length {len} is not a multiple of the element size {elem_size}"
            ),
            Error::OutOfRange { index, len } => {
                write!(f, "index {index} out of range for length {len}")
            }
            Error::NotSupportedInConcurrentMode { op } => {
                write!(f, "{op} is not supported in concurrent-append mode")
            }
            Error::Poisoned => f.write_str("vector poisoned by a failed grow"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(not(feature = "std"))]
impl core::error::Error for Error {}

#[cfg(feature = "std")]
impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        let kind = match value {
            Error::OutOfRange { .. } => std::io::ErrorKind::InvalidInput,
            Error::CorruptedFile { .. } => std::io::ErrorKind::InvalidData,
            Error::AllocationFailure => std::io::ErrorKind::OutOfMemory,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, value)
    }
}

#[cfg(all(unix, feature = "std"))]
pub(crate) fn io_error(op: &'static str) -> Error {
    let errno = std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(-1);
    Error::Io { op, errno }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_non_empty() {
        let errors = [
            Error::Io {
                op: "mmap",
                errno: 12,
            },
            Error::AllocationFailure,
            Error::CorruptedFile {
                len: 7,
                elem_size: 4,
            },
            Error::OutOfRange { index: 5, len: 3 },
            Error::NotSupportedInConcurrentMode { op: "pop_back" },
            Error::Poisoned,
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }
}
