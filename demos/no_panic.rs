// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! This example exists to demonstrate and check that panics are not generated
//! in release builds at all for this crate. This saves on library size and
//! prevents panics at runtime. This is a very strict thing to do, and it is
//! dependent on many things, including the optimizer and inlining.

// Debug assertions cause no_panic to fail.
// Note that generic types can't be #[no_mangle]. Set T to an FFI-safe type.

#[cfg(all(not(miri), not(debug_assertions)))]
mod vec_tests {
    use core::{ptr, slice};
    use no_panic::no_panic;
    use polyvec::backend::HeapBackend;
    use polyvec::{Error, Vector};

    type ByteVec = Vector<u8, HeapBackend<u8>>;

    #[repr(C)]
    pub enum FfiResult<T, E> {
        Ok(T),
        Err(E),
    }

    #[repr(C)]
    pub enum FfiAllocationError {
        NullBuffer,
        AllocationFailure,
    }

    impl From<Error> for FfiAllocationError {
        fn from(_value: Error) -> Self {
            FfiAllocationError::AllocationFailure
        }
    }

    #[no_mangle]
    #[no_panic]
    pub extern "C" fn ffi_vec_new() -> FfiResult<ByteVec, FfiAllocationError> {
        match Vector::new(()) {
            Ok(vec) => FfiResult::Ok(vec),
            Err(err) => FfiResult::Err(FfiAllocationError::from(err)),
        }
    }

    /// # Safety
    /// Caller needs to not have any references to the buffer's data.
    /// `buffer` must point at a live, initialized `ByteVec`.
    #[no_mangle]
    #[no_panic]
    pub unsafe extern "C" fn ffi_vec_drop(buffer: *mut ByteVec) {
        unsafe { ptr::drop_in_place(buffer) };
    }

    /// # Safety
    /// Caller needs to not have any references to the buffer's data.
    /// Buffer needs to be a legitimate buffer.
    #[no_mangle]
    #[no_panic]
    pub unsafe extern "C" fn ffi_vec_reserve(
        buffer: *mut ByteVec,
        additional: usize,
    ) -> FfiResult<(), FfiAllocationError> {
        if buffer.is_null() {
            return FfiResult::Err(FfiAllocationError::NullBuffer);
        }

        // SAFETY: Caller is required to provide a valid buffer.
        if let Err(err) = unsafe { &mut *buffer }.reserve(additional) {
            FfiResult::Err(FfiAllocationError::from(err))
        } else {
            FfiResult::Ok(())
        }
    }

    #[repr(C)]
    pub enum FfiWithinCapacityError {
        NullBuffer,
        NullPointer,
        OutOfCapacity,
    }

    #[no_mangle]
    #[no_panic]
    pub unsafe extern "C" fn ffi_vec_extend_within_capacity(
        vec: *mut ByteVec,
        ptr: *const u8,
        len: usize,
    ) -> FfiResult<(), FfiWithinCapacityError> {
        if vec.is_null() {
            return FfiResult::Err(FfiWithinCapacityError::NullBuffer);
        }

        let slice = if len == 0 {
            if ptr.is_null() {
                return FfiResult::Err(FfiWithinCapacityError::NullPointer);
            }
            &[]
        } else {
            unsafe { slice::from_raw_parts(ptr, len) }
        };

        match unsafe { &mut *vec }.extend_from_slice_within_capacity(slice) {
            Ok(()) => FfiResult::Ok(()),
            Err(_) => FfiResult::Err(FfiWithinCapacityError::OutOfCapacity),
        }
    }

    #[no_mangle]
    #[no_panic]
    pub unsafe extern "C" fn ffi_vec_push_within_capacity(
        vec: *mut ByteVec,
        value: u8,
    ) -> FfiResult<(), FfiWithinCapacityError> {
        if vec.is_null() {
            return FfiResult::Err(FfiWithinCapacityError::NullBuffer);
        }

        match unsafe { &mut *vec }.push_within_capacity(value) {
            Ok(()) => FfiResult::Ok(()),
            Err(_) => FfiResult::Err(FfiWithinCapacityError::OutOfCapacity),
        }
    }

    pub fn test() -> Result<(), &'static str> {
        let expected: &[u8] = &[0; 64];
        let mut vec: ByteVec = match ffi_vec_new() {
            FfiResult::Ok(vec) => vec,
            FfiResult::Err(_) => return Err("failed to allocate initial buffer"),
        };

        match unsafe { ffi_vec_reserve(ptr::addr_of_mut!(vec), expected.len()) } {
            FfiResult::Ok(_) => {
                let result = unsafe {
                    ffi_vec_extend_within_capacity(
                        ptr::addr_of_mut!(vec),
                        vec.as_ptr(),
                        expected.len(),
                    )
                };
                if let FfiResult::Err(_) = result {
                    return Err("failed to extend within capacity");
                }

                let mut i = vec.len() as u8;
                for _ in vec.len()..vec.capacity() {
                    let r = unsafe { ffi_vec_push_within_capacity(ptr::addr_of_mut!(vec), i) };
                    if let FfiResult::Err(_) = r {
                        return Err("failed to push within capacity");
                    }
                    i = i.wrapping_add(1);
                }
            }
            FfiResult::Err(_) => return Err("failed to reserve additional capacity"),
        }

        unsafe { ffi_vec_drop(ptr::addr_of_mut!(vec)) };
        // `ffi_vec_drop` already ran the destructor in place; don't run it
        // again when `vec` goes out of scope.
        core::mem::forget(vec);
        Ok(())
    }
}

fn main() {
    #[cfg(all(not(miri), not(debug_assertions)))]
    {
        match vec_tests::test() {
            Ok(_) => println!("success!"),
            Err(err) => eprintln!("ERROR: {err}"),
        }
    }
    #[cfg(miri)]
    {
        eprintln!("no_panic can't be built and run with miri")
    }
    #[cfg(debug_assertions)]
    {
        eprintln!("no_panic can't be run because of debug_assertions")
    }
}
