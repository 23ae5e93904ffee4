// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::Backend;
use crate::error::Error;
use core::mem;
use core::ptr::NonNull;

/// Anonymous-virtual-memory-backed storage: a private anonymous mapping
/// grown via `mremap` where the platform offers it, and via
/// allocate-copy-unmap where it doesn't (macOS, some BSDs, Windows). This is
/// the one backend where the "remap may move the buffer" possibility is
/// most visible, since even the in-place-preferring path can still return a
/// different address.
pub struct AnonMapBackend<T> {
    ptr: NonNull<T>,
    capacity: usize,
}

unsafe impl<T: Send> Send for AnonMapBackend<T> {}

impl<T> AnonMapBackend<T> {
    fn initial_capacity() -> Result<usize, Error> {
        let page_elems = os::page_size()? / mem::size_of::<T>().max(1);
        Ok(page_elems.max(1))
    }
}

impl<T> Backend<T> for AnonMapBackend<T> {
    type Args = ();

    fn new(_args: ()) -> Result<Self, Error> {
        let capacity = Self::initial_capacity()?;
        let bytes = capacity
            .checked_mul(mem::size_of::<T>())
            .ok_or(Error::AllocationFailure)?;
        let ptr = os::map_anon(bytes)?;
        Ok(Self {
            ptr: ptr.cast(),
            capacity,
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
        let old_bytes = self.capacity * mem::size_of::<T>();
        let new_bytes = n
            .checked_mul(mem::size_of::<T>())
            .ok_or(Error::AllocationFailure)?;
        let new_ptr = os::remap(self.ptr.cast(), old_bytes, new_bytes)?;
        self.ptr = new_ptr.cast();
        self.capacity = n;
        Ok(())
    }
}

impl<T> Drop for AnonMapBackend<T> {
    fn drop(&mut self) {
        let bytes = self.capacity * mem::size_of::<T>();
        if bytes > 0 {
            os::unmap(self.ptr.cast(), bytes);
        }
    }
}

#[cfg(unix)]
mod os {
    use crate::error::Error;
    use core::ptr::{self, NonNull};

    pub fn page_size() -> Result<usize, Error> {
        // SAFETY: sysconf with a well-known, always-valid argument.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 {
            Err(Error::AllocationFailure)
        } else {
            Ok(size as usize)
        }
    }

    pub fn map_anon(bytes: usize) -> Result<NonNull<u8>, Error> {
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON;
        // SAFETY: fixed well-formed arguments for a fresh anonymous mapping.
        let result = unsafe { libc::mmap(ptr::null_mut(), bytes, prot, flags, -1, 0) };
        if result == libc::MAP_FAILED {
            return Err(Error::AllocationFailure);
        }
        // SAFETY: mmap without MAP_FIXED never returns a null address on
        // success.
        Ok(unsafe { NonNull::new_unchecked(result.cast()) })
    }

    pub fn unmap(ptr: NonNull<u8>, bytes: usize) {
        // SAFETY: caller guarantees `ptr`/`bytes` describe a live mapping
        // created by this module.
        unsafe {
            let _ = libc::munmap(ptr.as_ptr().cast(), bytes);
        }
    }

    #[cfg(target_os = "linux")]
    pub fn remap(ptr: NonNull<u8>, old_bytes: usize, new_bytes: usize) -> Result<NonNull<u8>, Error> {
        // SAFETY: `ptr`/`old_bytes` describe a live mapping created by this
        // module; MREMAP_MAYMOVE permits the kernel to relocate it.
        let result = unsafe {
            libc::mremap(
                ptr.as_ptr().cast(),
                old_bytes,
                new_bytes,
                libc::MREMAP_MAYMOVE,
            )
        };
        if result == libc::MAP_FAILED {
            return Err(Error::AllocationFailure);
        }
        // SAFETY: non-MAP_FIXED mremap never returns null on success.
        Ok(unsafe { NonNull::new_unchecked(result.cast()) })
    }

    /// `mremap` is Linux-only; everywhere else in the Unix family (macOS,
    /// the BSDs) we allocate a fresh mapping, byte-copy the shared prefix,
    /// and unmap the old region.
    #[cfg(not(target_os = "linux"))]
    pub fn remap(ptr: NonNull<u8>, old_bytes: usize, new_bytes: usize) -> Result<NonNull<u8>, Error> {
        let new_ptr = map_anon(new_bytes)?;
        let copy_bytes = old_bytes.min(new_bytes);
        // SAFETY: both regions are live mappings of at least `copy_bytes`,
        // and they cannot overlap since `new_ptr` is a fresh mapping.
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), copy_bytes);
        }
        unmap(ptr, old_bytes);
        Ok(new_ptr)
    }
}

#[cfg(windows)]
mod os {
    use crate::error::Error;
    use core::mem::MaybeUninit;
    use core::ptr::{self, NonNull};
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
    };
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    pub fn page_size() -> Result<usize, Error> {
        let mut info = MaybeUninit::<SYSTEM_INFO>::uninit();
        // SAFETY: GetSystemInfo always fully initializes its out-parameter.
        unsafe { GetSystemInfo(info.as_mut_ptr()) };
        let info = unsafe { info.assume_init() };
        Ok(info.dwPageSize as usize)
    }

    pub fn map_anon(bytes: usize) -> Result<NonNull<u8>, Error> {
        // SAFETY: reserving and committing fresh address space, akin to a
        // private anonymous mmap.
        let result = unsafe {
            VirtualAlloc(
                ptr::null(),
                bytes,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        NonNull::new(result.cast()).ok_or(Error::AllocationFailure)
    }

    pub fn unmap(ptr: NonNull<u8>, _bytes: usize) {
        // SAFETY: `ptr` was returned by a prior `VirtualAlloc` in this
        // module; MEM_RELEASE requires the original base address and a
        // size of zero.
        unsafe {
            let _ = VirtualFree(ptr.as_ptr().cast(), 0, MEM_RELEASE);
        }
    }

    /// Windows has no `mremap` equivalent, so growth always allocates fresh
    /// address space and copies.
    pub fn remap(ptr: NonNull<u8>, old_bytes: usize, new_bytes: usize) -> Result<NonNull<u8>, Error> {
        let new_ptr = map_anon(new_bytes)?;
        let copy_bytes = old_bytes.min(new_bytes);
        // SAFETY: both regions are live allocations of at least
        // `copy_bytes`, and they cannot overlap since `new_ptr` is fresh.
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), copy_bytes);
        }
        unmap(ptr, old_bytes);
        Ok(new_ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_least_one_page_of_elements() {
        let backend = AnonMapBackend::<u8>::new(()).unwrap();
        assert!(backend.capacity() >= 1);
    }

    #[test]
    fn grow_preserves_prefix() {
        let mut backend = AnonMapBackend::<u32>::new(()).unwrap();
        let initial = backend.capacity();
        for i in 0..initial as u32 {
            // SAFETY: i is within the initial capacity.
            unsafe { backend.ptr().as_ptr().add(i as usize).write(i) };
        }
        let target = initial * 4 + 7;
        backend.grow_to(target).unwrap();
        assert!(backend.capacity() >= target);
        for i in 0..initial as u32 {
            // SAFETY: the prefix survived the grow.
            let value = unsafe { backend.ptr().as_ptr().add(i as usize).read() };
            assert_eq!(i, value);
        }
    }
}
