//! Local sizes and share-chain offsets must cover every tensor without overlap.

use proptest::prelude::*;
use vecc_dtype::DType;
use vecc_ir::{Position, TensorId};

use crate::test::fixtures::*;
use crate::tpipe::TPipe;

fn env(s0: i64, s1: i64) -> impl Fn(&str) -> Option<i64> {
    move |name| match name {
        "s0" => Some(s0),
        "s1" => Some(s1),
        _ => None,
    }
}

fn dtype() -> impl Strategy<Value = DType> {
    prop::sample::select(vec![DType::Int8, DType::Float16, DType::BFloat16, DType::Int32, DType::Float32, DType::Int64])
}

/// A buffer holding one tensor per dtype, all in merge scope 1.
fn shared_buffer(dtypes: &[DType]) -> TPipe {
    let mut graph = row_graph("shared");
    graph.nodes = dtypes
        .iter()
        .enumerate()
        .map(|(i, &dtype)| {
            let id = i as u32;
            N::new(id, &format!("t{i}"), "Abs").output(Out::buf(id as u64, dtype, Position::VecCalc, 0).rows().merge_scope(1)).build()
        })
        .collect();
    let mut tpipe = TPipe::new(tiler_for(&graph));
    tpipe.collect_ques(&graph);
    for node in &graph.nodes {
        tpipe.add_tensor(tensor(node, &tpipe.tiler)).unwrap();
    }
    tpipe.build_share_chains().unwrap();
    tpipe
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn vectorized_size_is_aligned_cover(dtype in dtype(), s1 in 1i64..300) {
        let graph = row_graph("g");
        let tiler = tiler_for(&graph);
        let node = N::new(0, "x", "Load").output(Out::que(0, dtype, Position::VecIn, 0).rows()).build();
        let x = tensor(&node, &tiler);
        let env = env(1, s1);
        let size = x.size.eval(&env).unwrap();
        prop_assert!(size >= x.actual_size.eval(&env).unwrap());
        prop_assert_eq!(size % dtype.block_elems(32) as i64, 0);
        prop_assert!(size - s1 < dtype.block_elems(32) as i64);
    }

    #[test]
    fn share_offsets_pack_back_to_back(dtypes in prop::collection::vec(dtype(), 1..6), s1 in 1i64..100) {
        let tpipe = shared_buffer(&dtypes);
        let env = env(1, s1);
        let mut expected = 0;
        for i in 0..dtypes.len() {
            let id = TensorId(i as u64);
            prop_assert_eq!(tpipe.share_offset(id).unwrap().eval(&env), Some(expected));
            prop_assert_eq!(tpipe.alloc_root(id).unwrap(), TensorId(0));
            expected += tpipe.tensor(id).unwrap().byte_size().eval(&env).unwrap();
        }
        let scope = tpipe.merge_scope_size(vecc_ir::MergeScopeId(1)).unwrap();
        prop_assert_eq!(scope.eval(&env), Some(expected));
    }

    #[test]
    fn registration_is_idempotent(dtypes in prop::collection::vec(dtype(), 1..6)) {
        let mut tpipe = shared_buffer(&dtypes);
        let before = tpipe.buf(vecc_ir::BufId(0)).unwrap().tensors.clone();
        for i in 0..dtypes.len() {
            let again = tpipe.tensor(TensorId(i as u64)).unwrap().clone();
            prop_assert_eq!(tpipe.add_tensor(again).unwrap(), TensorId(i as u64));
        }
        prop_assert_eq!(&tpipe.buf(vecc_ir::BufId(0)).unwrap().tensors, &before);
        tpipe.build_share_chains().unwrap();
        prop_assert_eq!(tpipe.share_set(TensorId(0)).unwrap().len(), dtypes.len());
    }
}
