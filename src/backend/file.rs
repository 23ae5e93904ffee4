// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::Backend;
use crate::error::Error;
use core::mem;
use core::ptr::NonNull;
use std::path::{Path, PathBuf};

/// Minimum capacity a freshly opened `FileMap` is rounded up to: its length
/// is always at least `16 * sizeof(T)`.
const MIN_CAPACITY: usize = 16;

/// Construction arguments for [FileBackend]: a file path, plus open flags
/// (default: read-write, create if absent, mode 0o644).
#[derive(Clone, Debug)]
pub struct OpenFlags {
    /// Create the file if it does not exist.
    pub create: bool,
    /// Open for reading. `FileMap` always needs this, so this is currently
    /// always `true`; kept as a field for forward-compatible construction.
    pub read: bool,
    /// Open for writing. `FileMap` always needs this for the same reason.
    pub write: bool,
    /// Unix file mode bits used when creating the file. Ignored on
    /// platforms without the concept.
    pub mode: u32,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            create: true,
            read: true,
            write: true,
            mode: 0o644,
        }
    }
}

/// Construction arguments for [FileBackend::new]: the path and the open
/// flags to use.
#[derive(Clone, Debug)]
pub struct FileMapArgs {
    pub path: PathBuf,
    pub flags: OpenFlags,
}

impl FileMapArgs {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flags: OpenFlags::default(),
        }
    }
}

impl From<PathBuf> for FileMapArgs {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for FileMapArgs {
    fn from(path: &Path) -> Self {
        Self::new(path.to_path_buf())
    }
}

/// File-backed virtual-memory storage. The buffer is a `mmap` of a regular
/// file; growth truncates-extends the file and remaps, and a clean drop
/// truncates the file down to the number of elements actually in use, so
/// that the file's length is always exactly `element_count * sizeof(T)`
/// once no `FileBackend` has it open.
pub struct FileBackend<T> {
    ptr: NonNull<T>,
    capacity: usize,
    backing_size: usize,
    path: PathBuf,
    fd: os::RawFd,
    _marker: core::marker::PhantomData<T>,
}

unsafe impl<T: Send> Send for FileBackend<T> {}

impl<T> FileBackend<T> {
    /// The path this backend was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn elem_size() -> usize {
        mem::size_of::<T>()
    }
}

impl<T> Backend<T> for FileBackend<T> {
    type Args = FileMapArgs;

    fn new(args: FileMapArgs) -> Result<Self, Error> {
        let elem_size = Self::elem_size();
        assert!(elem_size > 0, "FileMap does not support zero-sized T");

        let fd = os::open(&args.path, &args.flags)?;
        let len = match os::file_len(fd) {
            Ok(len) => len,
            Err(err) => {
                os::close(fd);
                return Err(err);
            }
        };

        if len % elem_size as u64 != 0 {
            os::close(fd);
            return Err(Error::CorruptedFile {
                len,
                elem_size,
            });
        }

        let backing_size = (len / elem_size as u64) as usize;
        let capacity = backing_size.max(MIN_CAPACITY);
        let capacity_bytes = capacity as u64 * elem_size as u64;

        if len < capacity_bytes {
            if let Err(err) = os::set_len(fd, capacity_bytes) {
                os::close(fd);
                return Err(err);
            }
        }

        let ptr = match os::map(fd, capacity_bytes as usize) {
            Ok(ptr) => ptr,
            Err(err) => {
                os::close(fd);
                return Err(err);
            }
        };

        Ok(Self {
            ptr: ptr.cast(),
            capacity,
            backing_size,
            path: args.path,
            fd,
            _marker: core::marker::PhantomData,
        })
    }

    fn ptr(&self) -> NonNull<T> {
        self.ptr
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn backing_size(&self) -> usize {
        self.backing_size
    }

    /// Unlike [super::HeapBackend]/[super::AnonMapBackend], this is not a
    /// no-op when `n <= capacity()`: `FileMap` always truncate-extends (or
    /// truncates down) to exactly `n` elements and remaps, so that the
    /// invariant `file_length == capacity * sizeof(T)` holds while mapped.
    /// This is what lets `shrink_to_fit` actually shrink a `FileMap`-backed
    /// vector.
    fn grow_to(&mut self, n: usize) -> Result<(), Error> {
        let elem_size = Self::elem_size();
        let new_bytes = (n as u64)
            .checked_mul(elem_size as u64)
            .ok_or(Error::AllocationFailure)?;
        os::set_len(self.fd, new_bytes)?;
        let old_bytes = self.capacity * elem_size;
        let new_ptr = os::remap(self.fd, self.ptr.cast(), old_bytes, new_bytes as usize)?;
        self.ptr = new_ptr.cast();
        self.capacity = n;
        Ok(())
    }

    fn sync(&mut self, used: usize) {
        self.backing_size = used;
    }
}

impl<T> Drop for FileBackend<T> {
    fn drop(&mut self) {
        // Best-effort: drop-time truncation failures must not prevent the
        // vector from being destroyed. The file may retain
        // trailing unused capacity, but its length is always an exact
        // multiple of sizeof(T) from a prior successful grow_to/open, so it
        // is never corrupted.
        if let Err(_err) = self.grow_to(self.backing_size) {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                path = %self.path.display(),
                error = %_err,
                "failed to truncate FileMap on drop; trailing capacity retained",
            );
        }
        os::unmap(self.ptr.cast(), self.capacity * Self::elem_size());
        os::close(self.fd);
    }
}

#[cfg(unix)]
mod os {
    use crate::error::{io_error, Error};
    use core::ptr::{self, NonNull};
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    pub type RawFd = libc::c_int;

    pub fn open(path: &Path, flags: &super::OpenFlags) -> Result<RawFd, Error> {
        let cpath = CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::Io {
            op: "open",
            errno: libc::EINVAL,
        })?;
        let mut oflag = libc::O_RDWR;
        if flags.create {
            oflag |= libc::O_CREAT;
        }
        // SAFETY: cpath is a valid, nul-terminated C string for the
        // duration of this call.
        let fd = unsafe { libc::open(cpath.as_ptr(), oflag, flags.mode as libc::c_uint) };
        if fd < 0 {
            return Err(io_error("open"));
        }
        Ok(fd)
    }

    pub fn close(fd: RawFd) {
        // SAFETY: fd is a valid, open descriptor owned by this module.
        unsafe {
            let _ = libc::close(fd);
        }
    }

    pub fn file_len(fd: RawFd) -> Result<u64, Error> {
        // SAFETY: stat is a plain-old-data struct; fstat fully initializes
        // it on success.
        let mut stat: libc::stat = unsafe { core::mem::zeroed() };
        let rc = unsafe { libc::fstat(fd, &mut stat) };
        if rc != 0 {
            return Err(io_error("fstat"));
        }
        Ok(stat.st_size as u64)
    }

    pub fn set_len(fd: RawFd, len: u64) -> Result<(), Error> {
        // SAFETY: fd is a valid, open, writable descriptor.
        let rc = unsafe { libc::ftruncate(fd, len as libc::off_t) };
        if rc != 0 {
            return Err(io_error("ftruncate"));
        }
        Ok(())
    }

    pub fn map(fd: RawFd, bytes: usize) -> Result<NonNull<u8>, Error> {
        if bytes == 0 {
            return map(fd, 1);
        }
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        // SAFETY: fd is a valid, open descriptor sized to at least `bytes`
        // by a prior ftruncate.
        let result = unsafe { libc::mmap(ptr::null_mut(), bytes, prot, libc::MAP_SHARED, fd, 0) };
        if result == libc::MAP_FAILED {
            return Err(io_error("mmap"));
        }
        // SAFETY: non-MAP_FIXED mmap never returns null on success.
        Ok(unsafe { NonNull::new_unchecked(result.cast()) })
    }

    pub fn unmap(ptr: NonNull<u8>, bytes: usize) {
        let bytes = bytes.max(1);
        // SAFETY: caller guarantees `ptr`/`bytes` describe a live mapping
        // created by `map` in this module.
        unsafe {
            let _ = libc::munmap(ptr.as_ptr().cast(), bytes);
        }
    }

    #[cfg(target_os = "linux")]
    pub fn remap(
        _fd: RawFd,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Result<NonNull<u8>, Error> {
        let old_bytes = old_bytes.max(1);
        let new_bytes = new_bytes.max(1);
        // SAFETY: `ptr`/`old_bytes` describe the live file-backed mapping;
        // the file itself was already resized to `new_bytes` by `set_len`,
        // so MREMAP_MAYMOVE only needs to adjust the address space.
        let result =
            unsafe { libc::mremap(ptr.as_ptr().cast(), old_bytes, new_bytes, libc::MREMAP_MAYMOVE) };
        if result == libc::MAP_FAILED {
            return Err(io_error("mremap"));
        }
        // SAFETY: non-MAP_FIXED mremap never returns null on success.
        Ok(unsafe { NonNull::new_unchecked(result.cast()) })
    }

    /// `mremap` is Linux-only. Elsewhere (macOS, the BSDs) we unmap the old
    /// mapping and map the file fresh at its new length — no byte-copy is
    /// needed here, unlike the anonymous backend, because the data already
    /// lives in the file itself.
    #[cfg(not(target_os = "linux"))]
    pub fn remap(
        fd: RawFd,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Result<NonNull<u8>, Error> {
        unmap(ptr, old_bytes);
        map(fd, new_bytes)
    }
}

#[cfg(windows)]
mod os {
    use crate::error::Error;
    use core::ptr::{self, NonNull};
    use std::path::Path;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        CreateFileW, SetEndOfFile, SetFilePointerEx, FILE_BEGIN, FILE_GENERIC_READ,
        FILE_GENERIC_WRITE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_ALWAYS,
    };
    use windows_sys::Win32::System::Memory::{
        CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_READ, FILE_MAP_WRITE,
        PAGE_READWRITE,
    };

    pub type RawFd = HANDLE;

    fn to_wide(path: &Path) -> Vec<u16> {
        use std::os::windows::ffi::OsStrExt;
        path.as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect()
    }

    pub fn open(path: &Path, _flags: &super::OpenFlags) -> Result<RawFd, Error> {
        let wide = to_wide(path);
        // SAFETY: wide is a nul-terminated UTF-16 string valid for the
        // call's duration.
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                FILE_GENERIC_READ | FILE_GENERIC_WRITE,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                ptr::null(),
                OPEN_ALWAYS,
                0,
                0,
            )
        };
        if handle == -1isize as HANDLE {
            return Err(Error::Io {
                op: "CreateFileW",
                errno: -1,
            });
        }
        Ok(handle)
    }

    pub fn close(fd: RawFd) {
        // SAFETY: fd is a valid, open handle owned by this module.
        unsafe {
            let _ = CloseHandle(fd);
        }
    }

    pub fn file_len(fd: RawFd) -> Result<u64, Error> {
        let mut size = 0i64;
        // SAFETY: fd is a valid, open handle.
        let ok = unsafe { windows_sys::Win32::Storage::FileSystem::GetFileSizeEx(fd, &mut size) };
        if ok == 0 {
            return Err(Error::Io {
                op: "GetFileSizeEx",
                errno: -1,
            });
        }
        Ok(size as u64)
    }

    pub fn set_len(fd: RawFd, len: u64) -> Result<(), Error> {
        let mut new_pos = 0i64;
        // SAFETY: fd is a valid, open handle; FILE_BEGIN + len is a valid
        // seek target.
        let ok =
            unsafe { SetFilePointerEx(fd, len as i64, &mut new_pos, FILE_BEGIN) };
        if ok == 0 {
            return Err(Error::Io {
                op: "SetFilePointerEx",
                errno: -1,
            });
        }
        // SAFETY: fd is positioned at `len` by the call above.
        if unsafe { SetEndOfFile(fd) } == 0 {
            return Err(Error::Io {
                op: "SetEndOfFile",
                errno: -1,
            });
        }
        Ok(())
    }

    pub fn map(fd: RawFd, bytes: usize) -> Result<NonNull<u8>, Error> {
        let bytes = bytes.max(1);
        // SAFETY: fd is a valid, open, writable handle sized to at least
        // `bytes` by a prior set_len.
        let mapping = unsafe {
            CreateFileMappingW(fd, ptr::null(), PAGE_READWRITE, 0, bytes as u32, ptr::null())
        };
        if mapping.is_null() {
            return Err(Error::Io {
                op: "CreateFileMappingW",
                errno: -1,
            });
        }
        // SAFETY: mapping was just created with at least `bytes` committed.
        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_READ | FILE_MAP_WRITE, 0, 0, bytes) };
        unsafe { CloseHandle(mapping) };
        if view.Value.is_null() {
            return Err(Error::Io {
                op: "MapViewOfFile",
                errno: -1,
            });
        }
        // SAFETY: checked non-null above.
        Ok(unsafe { NonNull::new_unchecked(view.Value.cast()) })
    }

    pub fn unmap(ptr: NonNull<u8>, _bytes: usize) {
        // SAFETY: ptr was returned by a prior `map` in this module.
        unsafe {
            let _ = UnmapViewOfFile(windows_sys::Win32::System::Memory::MEMORY_MAPPED_VIEW_ADDRESS {
                Value: ptr.as_ptr().cast(),
            });
        }
    }

    /// Windows offers no `mremap` equivalent for file mappings either:
    /// unmap the view and map the (already-resized) file fresh.
    pub fn remap(
        fd: RawFd,
        ptr: NonNull<u8>,
        old_bytes: usize,
        new_bytes: usize,
    ) -> Result<NonNull<u8>, Error> {
        unmap(ptr, old_bytes);
        map(fd, new_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_path() -> PathBuf {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        // Keep the path but let the empty file be recreated by FileBackend.
        file.close().unwrap();
        path
    }

    #[test]
    fn opens_fresh_file_at_minimum_capacity() {
        let path = temp_path();
        let backend = FileBackend::<u32>::new(FileMapArgs::new(&path)).unwrap();
        assert_eq!(MIN_CAPACITY, backend.capacity());
        assert_eq!(0, backend.backing_size());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rejects_misaligned_length() {
        let path = temp_path();
        std::fs::write(&path, [0u8; 7]).unwrap();
        let err = FileBackend::<u32>::new(FileMapArgs::new(&path)).unwrap_err();
        assert!(matches!(err, Error::CorruptedFile { len: 7, elem_size: 4 }));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn grow_then_shrink_round_trips_prefix() {
        let path = temp_path();
        let mut backend = FileBackend::<u32>::new(FileMapArgs::new(&path)).unwrap();
        for i in 0..4u32 {
            unsafe { backend.ptr().as_ptr().add(i as usize).write(i) };
        }
        backend.grow_to(100).unwrap();
        assert_eq!(100, backend.capacity());
        for i in 0..4u32 {
            let value = unsafe { backend.ptr().as_ptr().add(i as usize).read() };
            assert_eq!(i, value);
        }
        backend.grow_to(4).unwrap();
        assert_eq!(4, backend.capacity());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn sync_then_drop_truncates_file() {
        let path = temp_path();
        {
            let mut backend = FileBackend::<u32>::new(FileMapArgs::new(&path)).unwrap();
            for i in 0..3u32 {
                unsafe { backend.ptr().as_ptr().add(i as usize).write(i) };
            }
            backend.sync(3);
        }
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(3 * mem::size_of::<u32>() as u64, len);
        std::fs::remove_file(&path).ok();
    }
}
