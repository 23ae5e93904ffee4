// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shrinkable, generator-driven checks for the invariants every backend is
//! supposed to uphold regardless of which growth path it takes.

use polyvec::backend::{AnonMapBackend, Backend, HeapBackend};
use polyvec::Vector;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Push(i32),
    Pop,
    Reserve(usize),
    Clear,
    Resize(usize, i32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<i32>().prop_map(Op::Push),
        Just(Op::Pop),
        (0usize..200).prop_map(Op::Reserve),
        Just(Op::Clear),
        (0usize..200, any::<i32>()).prop_map(|(n, fill)| Op::Resize(n, fill)),
    ]
}

fn apply<B: Backend<i32>>(v: &mut Vector<i32, B>, model: &mut Vec<i32>, op: &Op) {
    match op {
        Op::Push(value) => {
            v.push(*value).unwrap();
            model.push(*value);
        }
        Op::Pop => {
            let expected = model.pop();
            assert_eq!(expected, v.pop());
        }
        Op::Reserve(additional) => {
            v.reserve(*additional).unwrap();
        }
        Op::Clear => {
            v.clear();
            model.clear();
        }
        Op::Resize(new_len, fill) => {
            v.resize(*new_len, *fill).unwrap();
            model.resize(*new_len, *fill);
        }
    }

    assert_eq!(model.as_slice(), v.as_slice());
    assert!(v.len() <= v.capacity());
}

proptest! {
    #[test]
    fn heap_backend_matches_a_plain_vec_model(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let mut v: Vector<i32, HeapBackend<i32>> = Vector::new(()).unwrap();
        let mut model: Vec<i32> = Vec::new();
        for op in &ops {
            apply(&mut v, &mut model, op);
        }
    }

    #[test]
    fn anonmap_backend_matches_a_plain_vec_model(ops in prop::collection::vec(op_strategy(), 0..200)) {
        let mut v: Vector<i32, AnonMapBackend<i32>> = Vector::new(()).unwrap();
        let mut model: Vec<i32> = Vec::new();
        for op in &ops {
            apply(&mut v, &mut model, op);
        }
    }

    #[test]
    fn capacity_never_shrinks_below_len_after_push_only(values in prop::collection::vec(any::<i32>(), 0..500)) {
        let mut v: Vector<i32, HeapBackend<i32>> = Vector::new(()).unwrap();
        for value in values {
            v.push(value).unwrap();
            prop_assert!(v.capacity() >= v.len());
        }
    }
}
