use vecc_dtype::DType;
use vecc_ir::{BufId, Expr, MergeScopeId, Node, Position, QueId, TensorId};

use crate::config::TmpBufDesc;
use crate::error::Error;
use crate::tensor::TensorState;
use crate::test::fixtures::*;
use crate::tpipe::TPipe;

const F: DType = DType::Float32;

fn local(id: u32, name: &str, out: Out) -> Node {
    N::new(id, name, "Abs").output(out.rows()).build()
}

fn pipe_with(nodes: Vec<Node>) -> TPipe {
    let mut graph = row_graph("g");
    graph.nodes = nodes;
    let mut tpipe = TPipe::new(tiler_for(&graph));
    tpipe.collect_ques(&graph);
    for node in &graph.nodes {
        let tensor = tensor(node, &tpipe.tiler);
        tpipe.add_tensor(tensor).unwrap();
    }
    tpipe
}

fn t(id: u64) -> TensorId {
    TensorId(id)
}

#[test]
fn test_add_tensor_is_idempotent() {
    let node = local(0, "a", Out::que(10, F, Position::VecIn, 0));
    let mut tpipe = pipe_with(vec![node.clone()]);
    let again = tensor(&node, &tpipe.tiler);
    assert_eq!(tpipe.add_tensor(again).unwrap(), t(10));
    assert_eq!(tpipe.que(QueId(0)).unwrap().tensors, vec![t(10)]);
    assert_eq!(tpipe.tensors().count(), 1);
}

#[test]
fn test_queue_takes_largest_depth() {
    let tpipe = pipe_with(vec![
        local(0, "a", Out::que(10, F, Position::VecIn, 0)),
        local(1, "b", Out::que(11, F, Position::VecIn, 0).depth(2, 3)),
    ]);
    let que = tpipe.que(QueId(0)).unwrap();
    assert_eq!((que.depth, que.buf_num), (2, 3));
}

#[test]
fn test_tensor_size_calc() {
    let tpipe = pipe_with(vec![local(0, "x", Out::que(10, F, Position::VecIn, 0))]);
    assert_eq!(
        tpipe.tensor_size_calc().unwrap(),
        "const uint32_t x_size = AlignUp(t.s1, 8);\nconst uint32_t x_que_buf_num = 1;\n"
    );
}

fn shared_buffer() -> TPipe {
    let mut tpipe = pipe_with(vec![
        local(0, "a", Out::buf(10, F, Position::VecCalc, 0).merge_scope(5)),
        local(1, "b", Out::buf(11, F, Position::VecCalc, 0).merge_scope(5)),
        local(2, "c", Out::buf(12, F, Position::VecCalc, 0).merge_scope(5)),
    ]);
    tpipe.build_share_chains().unwrap();
    tpipe
}

#[test]
fn test_share_chain_offsets() {
    let tpipe = shared_buffer();
    let row = s("s1").align(8) * 4;
    assert_eq!(tpipe.share_offset(t(10)).unwrap(), Expr::ZERO);
    assert_eq!(tpipe.share_offset(t(11)).unwrap(), row.clone());
    assert_eq!(tpipe.share_offset(t(12)).unwrap(), row.clone() + row);
    assert_eq!(tpipe.share_set(t(11)).unwrap(), vec![t(10), t(11), t(12)]);
    assert_eq!(tpipe.alloc_root(t(12)).unwrap(), t(10));
    assert!(tpipe.storage_predecessors(t(12)).unwrap().is_empty());
}

#[test]
fn test_share_chains_are_idempotent() {
    let mut tpipe = shared_buffer();
    tpipe.build_share_chains().unwrap();
    assert_eq!(tpipe.share_set(t(10)).unwrap().len(), 3);
}

#[test]
fn test_buffer_binding() {
    let mut tpipe = shared_buffer();
    assert_eq!(tpipe.tensor_alloc(t(10)).unwrap(), "a = b0_buf.template ReinterpretCast<float>();\n");
    assert_eq!(
        tpipe.tensor_alloc(t(11)).unwrap(),
        "b = b0_buf[AlignUp(t.s1, 8) * 4].template ReinterpretCast<float>();\n"
    );
    assert_eq!(tpipe.tensor(t(11)).unwrap().state, TensorState::Allocated);
}

#[test]
fn test_merge_scope_declarations() {
    let tpipe = shared_buffer();
    let sizes = tpipe.merge_scope_size_calc().unwrap();
    assert!(sizes.starts_with("const uint32_t m5_size = AlignUp(t.s1, 8) * 4 + "));
    assert!(!sizes.contains("m5_que_buf_num"));
    assert_eq!(tpipe.tensor_size_calc().unwrap(), "");

    let decl = tpipe.local_tbuf_alloc().unwrap();
    let lines: Vec<&str> = decl.lines().collect();
    assert_eq!(lines[0], "TBuf<TPosition::VECCALC> b0;");
    assert!(lines[1].starts_with("tpipe.InitBuffer(b0, m5_size); // AlignUp(s1, 8) * 4 + "));
    assert_eq!(lines[2], "LocalTensor<uint8_t> b0_buf = b0.Get<uint8_t>();");
    assert_eq!(&lines[3..], ["LocalTensor<float> a;", "LocalTensor<float> b;", "LocalTensor<float> c;"]);
    assert_eq!(tpipe.merge_scope(MergeScopeId(5)).unwrap().tensors.len(), 3);
}

#[test]
fn test_unshared_buffer_members_are_predecessors() {
    let tpipe = pipe_with(vec![
        local(0, "a", Out::buf(10, F, Position::VecCalc, 0)),
        local(1, "b", Out::buf(11, F, Position::VecCalc, 0)),
    ]);
    assert_eq!(tpipe.storage_predecessors(t(11)).unwrap(), vec![t(10)]);
    assert!(tpipe.storage_predecessors(t(10)).unwrap().is_empty());
    assert_eq!(tpipe.buf_size(BufId(0)).unwrap(), s("s1").align(8) * 4);
}

fn reused_queue() -> TPipe {
    let mut tpipe = pipe_with(vec![
        local(0, "a", Out::que(20, F, Position::VecOut, 0)),
        local(1, "b", Out::que(21, F, Position::VecOut, 0)),
        local(2, "c", Out::que(22, F, Position::VecOut, 0)),
    ]);
    tpipe.link_reuse(t(20), t(21)).unwrap();
    tpipe
}

#[test]
fn test_reuse_chain() {
    let mut tpipe = reused_queue();
    assert_eq!(tpipe.tensor(t(21)).unwrap().reuse_id, t(20));
    assert_eq!(tpipe.alloc_root(t(21)).unwrap(), t(20));
    assert_eq!(tpipe.alloc_group(t(20)).unwrap(), vec![t(20), t(21)]);
    assert_eq!(tpipe.storage_predecessors(t(21)).unwrap(), vec![t(20)]);
    assert_eq!(tpipe.share_offset(t(21)).unwrap(), Expr::ZERO);
    assert!(!tpipe.tensor_size_calc().unwrap().contains("b_size"));

    tpipe.tensor_alloc(t(20)).unwrap();
    assert_eq!(tpipe.tensor_alloc(t(21)).unwrap(), "b = a.template ReinterpretCast<float>();\n");
}

#[test]
fn test_reuse_cycle_is_rejected() {
    let mut tpipe = reused_queue();
    assert!(matches!(tpipe.link_reuse(t(21), t(20)), Err(Error::ChainCycle { kind: "reuse", .. })));
    assert!(matches!(tpipe.link_reuse(t(20), t(22)), Err(Error::ChainCycle { .. })));
    assert!(matches!(tpipe.link_reuse(t(22), t(22)), Err(Error::ChainCycle { .. })));
}

#[test]
fn test_reuse_across_storages_is_rejected() {
    let mut tpipe = pipe_with(vec![
        local(0, "a", Out::que(20, F, Position::VecOut, 0)),
        local(1, "b", Out::que(21, F, Position::VecOut, 1)),
    ]);
    assert!(matches!(tpipe.link_reuse(t(20), t(21)), Err(Error::Init { .. })));
}

#[test]
fn test_unknown_tensor_is_lookup_failure() {
    let tpipe = reused_queue();
    assert!(matches!(tpipe.tensor(t(99)), Err(Error::Lookup { what: "tensor", .. })));
}

fn shared_queue() -> TPipe {
    let mut tpipe = pipe_with(vec![
        local(0, "a", Out::que(30, F, Position::VecOut, 0).merge_scope(1)),
        local(1, "b", Out::que(31, F, Position::VecOut, 0).merge_scope(1)),
    ]);
    tpipe.build_share_chains().unwrap();
    tpipe
}

#[test]
fn test_queue_group_lifecycle() {
    let mut tpipe = shared_queue();
    assert_eq!(
        tpipe.tensor_alloc(t(30)).unwrap(),
        "a_buf = q0.AllocTensor<uint8_t>();\na = a_buf.template ReinterpretCast<float>();\n"
    );
    assert_eq!(
        tpipe.tensor_alloc(t(31)).unwrap(),
        "b = a_buf[AlignUp(t.s1, 8) * 4].template ReinterpretCast<float>();\n"
    );
    assert_eq!(tpipe.enque(t(31)).unwrap(), "q0.EnQue(a_buf);\n");
    assert_eq!(tpipe.tensor(t(30)).unwrap().state, TensorState::Enqueued);
    assert_eq!(tpipe.deque(t(30)).unwrap(), "a_buf = q0.DeQue<uint8_t>();\n");
    assert_eq!(tpipe.free(t(31)).unwrap(), "q0.FreeTensor(a_buf);\n");
    assert_eq!(tpipe.tensor(t(31)).unwrap().state, TensorState::Freed);

    // The next use starts a fresh allocation.
    assert!(tpipe.tensor_alloc(t(30)).unwrap().starts_with("a_buf = q0.AllocTensor<uint8_t>();"));
}

#[test]
fn test_queue_declarations() {
    let tpipe = shared_queue();
    let decl = tpipe.local_tque_alloc().unwrap();
    let lines: Vec<&str> = decl.lines().collect();
    assert_eq!(lines[0], "TQue<TPosition::VECOUT, 1> q0;");
    assert!(lines[1].starts_with("tpipe.InitBuffer(q0, 1, m1_size); // "));
    assert_eq!(&lines[2..], ["LocalTensor<uint8_t> a_buf;", "LocalTensor<float> a;", "LocalTensor<float> b;"]);
    assert!(tpipe.merge_scope_size_calc().unwrap().contains("const uint32_t m1_que_buf_num = 1;\n"));
}

#[test]
fn test_tmp_buffers_by_tag() {
    let mut tpipe = pipe_with(Vec::new());
    let text = tpipe.tmp_buf_alloc(&[
        TmpBufDesc { size: Expr::int(1024), reuse_tag: 0 },
        TmpBufDesc { size: Expr::int(2048), reuse_tag: 0 },
        TmpBufDesc { size: s("s0"), reuse_tag: 3 },
    ]);
    let expected = "\
TBuf<TPosition::VECCALC> tmp_tbuf;
tpipe.InitBuffer(tmp_tbuf, 2048);
LocalTensor<uint8_t> tmp_buf = tmp_tbuf.Get<uint8_t>();
TBuf<TPosition::VECCALC> tmp_tbuf_1;
tpipe.InitBuffer(tmp_tbuf_1, t.s0);
LocalTensor<uint8_t> tmp_buf_1 = tmp_tbuf_1.Get<uint8_t>();
";
    assert_eq!(text, expected);
    assert_eq!(tpipe.tmp_buf_name(3), Some("tmp_buf_1"));
    assert_eq!(tpipe.tmp_buf_name(1), None);
}

#[test]
fn test_broadcast_blocks_are_shared_per_value() {
    let mut tpipe = pipe_with(Vec::new());
    let first = tpipe.blk_tensor_alloc_and_init("1.0", F, "c_blk");
    assert!(first.contains("Duplicate(blk_0_tensor, (float)1.0, 8);\n"));
    assert!(first.ends_with("LocalTensor<float> c_blk = blk_0_tensor;\n"));
    assert_eq!(tpipe.blk_tensor_alloc_and_init("1.0", F, "d_blk"), "LocalTensor<float> d_blk = blk_0_tensor;\n");
    assert!(tpipe.blk_tensor_alloc_and_init("1.0", DType::Float16, "e_blk").contains("blk_1"));
}
