// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios exercising each backend and mode together, rather
//! than the unit-level checks that live alongside each module.

use polyvec::backend::{AnonMapBackend, HeapBackend};
use polyvec::Vector;

#[test]
fn s1_heap_push_sequence() {
    let mut v: Vector<i32, HeapBackend<i32>> = Vector::new(()).unwrap();
    v.push(1).unwrap();
    v.push(2).unwrap();
    v.push(3).unwrap();

    assert_eq!(3, v.len());
    assert_eq!([1, 2, 3], v.as_slice());
    assert_eq!(Some(&1), v.front());
    assert_eq!(Some(&3), v.back());
}

#[test]
fn s2_anonmap_push_150() {
    let mut v: Vector<i32, AnonMapBackend<i32>> = Vector::new(()).unwrap();
    for i in 0..150i32 {
        v.push(i).unwrap();
    }
    assert_eq!(150, v.len());
    assert!(v.capacity() >= 150);
    assert_eq!(0, v.as_slice()[0]);
    assert_eq!(149, v.as_slice()[149]);
}

#[test]
fn s4_heap_reserve_then_push() {
    let mut v: Vector<i32, HeapBackend<i32>> = Vector::new(()).unwrap();
    v.reserve(100).unwrap();
    assert!(v.capacity() >= 100);
    for i in 0..5i32 {
        v.push(i).unwrap();
    }
    assert!(v.capacity() >= 100);
    assert_eq!(5, v.len());
}

#[cfg(feature = "std")]
mod filemap {
    use polyvec::backend::FileBackend;
    use polyvec::{Error, Vector};
    use std::fs;
    use tempfile::NamedTempFile;

    fn fresh_path() -> std::path::PathBuf {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        file.close().unwrap();
        path
    }

    #[test]
    fn s3_filemap_persists_across_reopen() {
        let path = fresh_path();

        {
            let mut v: Vector<i32, FileBackend<i32>> = Vector::new(path.clone().into()).unwrap();
            v.push(10).unwrap();
            v.push(20).unwrap();
            v.push(30).unwrap();
        }

        assert_eq!(12, fs::metadata(&path).unwrap().len());

        {
            let v: Vector<i32, FileBackend<i32>> = Vector::new(path.clone().into()).unwrap();
            assert_eq!(3, v.len());
            assert_eq!([10, 20, 30], v.as_slice());
        }

        fs::remove_file(&path).ok();
    }

    #[test]
    fn s6_filemap_rejects_misaligned_file() {
        let path = fresh_path();
        fs::write(&path, [0u8; 7]).unwrap();

        let result: Result<Vector<i32, FileBackend<i32>>, Error> = Vector::new(path.clone().into());
        assert!(matches!(
            result,
            Err(Error::CorruptedFile {
                len: 7,
                elem_size: 4
            })
        ));

        fs::remove_file(&path).ok();
    }
}

#[cfg(feature = "concurrent")]
mod concurrent_scenarios {
    use polyvec::backend::HeapBackend;
    use polyvec::ConcurrentVector;
    use std::sync::Arc;
    use std::thread;

    /// Scaled-down version of S5 (4 threads x 1_000_000 pushes): the
    /// arithmetic and the property under test (every writer's values land,
    /// no collisions, correct running sum) are identical at a size that
    /// keeps this test fast.
    #[test]
    fn s5_many_writers_sum_matches_expected() {
        const WRITERS: usize = 4;
        const PER_WRITER: i64 = 10_000;

        let v: Arc<ConcurrentVector<i64, HeapBackend<i64>>> =
            Arc::new(ConcurrentVector::new(()).unwrap());

        let handles: Vec<_> = (0..WRITERS)
            .map(|_| {
                let v = Arc::clone(&v);
                thread::spawn(move || {
                    for i in 0..PER_WRITER {
                        v.try_append(i).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let total = (WRITERS as i64) * PER_WRITER;
        assert_eq!(total as usize, v.len());

        let expected_sum = (WRITERS as i64) * (PER_WRITER - 1) * PER_WRITER / 2;
        let mut sum = 0i64;
        for i in 0..v.len() {
            sum += v.at(i).unwrap();
        }
        assert_eq!(expected_sum, sum);
    }
}
