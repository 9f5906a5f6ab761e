use vecc_dtype::DType;
use vecc_ir::{Axis, AxisId, AxisKind, ComputeUnit, Expr, Position, ScheduledGraph, TensorId};

use crate::config::KernelConfig;
use crate::error::Error;
use crate::kernel::{Kernel, KernelIo, WorkspaceLayout};
use crate::loops::{Loop, LoopBody};
use crate::api_call::CallId;
use crate::test::fixtures::*;

const F: DType = DType::Float32;

fn parse(graph: &ScheduledGraph) -> crate::Result<Kernel> {
    Kernel::parse_graph(graph, &KernelConfig::default())
}

#[test]
fn test_unary_kernel() {
    let text = generate(&unary_graph("Abs"), &["x"], &["y"]);
    assert!(text.starts_with("TPipe tpipe;\nGlobalTensor<float> x_gm;\nx_gm.SetGlobalBuffer((__gm__ float *)x);\n"));
    assert!(text.contains("GlobalTensor<float> y_gm;\ny_gm.SetGlobalBuffer((__gm__ float *)y);\n"));
    assert!(text.contains("const uint32_t x_local_size = AlignUp(t.s1, 8);\nconst uint32_t x_local_que_buf_num = 1;\n"));
    assert!(text.contains("TQue<TPosition::VECIN, 1> q0;\n"));
    assert!(text.contains("TQue<TPosition::VECOUT, 1> q1;\n"));
    assert!(text.contains("LocalTensor<uint8_t> y_local_buf;\nLocalTensor<float> y_local;\n"));

    let body = "\
for (int64_t z0 = 0; z0 < t.s0; z0++) {
  x_local_buf = q0.AllocTensor<uint8_t>();
  x_local = x_local_buf.template ReinterpretCast<float>();
  DataCopyPadExtend(x_local, x_gm[(int64_t)z0 * t.s1], 1, t.s1, 0, 0);
  q0.EnQue(x_local_buf);
  y_local_buf = q1.AllocTensor<uint8_t>();
  y_local = y_local_buf.template ReinterpretCast<float>();
  x_local_buf = q0.DeQue<uint8_t>();
  Abs(y_local, x_local, AlignUp(t.s1, 8));
  q1.EnQue(y_local_buf);
  q0.FreeTensor(x_local_buf);
  y_local_buf = q1.DeQue<uint8_t>();
  DataCopyPadExtend(y_gm[(int64_t)z0 * t.s1], y_local, 1, t.s1, 0, 0);
  q1.FreeTensor(y_local_buf);
}
";
    assert!(text.ends_with(body), "unexpected body:\n{text}");
}

#[test]
fn test_loop_tree_groups_consecutive_calls() {
    let kernel = parse(&unary_graph("Abs")).unwrap();
    let mut row = Loop::new(AxisId(0));
    row.body = vec![LoopBody::Call(CallId(1)), LoopBody::Call(CallId(2)), LoopBody::Call(CallId(3))];
    assert_eq!(
        kernel.root.body,
        vec![LoopBody::Call(CallId(0)), LoopBody::Child(row), LoopBody::Call(CallId(4))]
    );
    assert_eq!(kernel.root.calls(), (0..5).map(CallId).collect::<Vec<_>>());
}

#[test]
fn test_queue_handoffs_need_no_events() {
    let text = generate(&binary_graph("Add", F), &["x", "y"], &["z"]);
    assert!(text.contains("  Add(z_local, x_local, y_local, AlignUp(t.s1, 8));\n"));
    assert!(line_of(&text, "y_local_buf = q1.DeQue") < line_of(&text, "Add(z_local"));
    assert_eq!(count(&text, "AllocEventID"), 0);
    assert_eq!(count(&text, "PipeBarrier"), 0);
}

#[test]
fn test_copy_through_input_queue_waits_on_event() {
    let mut graph = row_graph("copy");
    graph.nodes = vec![
        data(0, "x", 0, F, 0),
        load(1, "x_local", 0, Out::que(1, F, Position::VecIn, 0).rows()),
        store(2, "y", 1, 2, F),
        output(3, "out", 2, 0),
    ];
    let text = generate(&graph, &["x"], &["y"]);
    assert_eq!(count(&text, "AllocEventID<HardEvent::MTE2_MTE3>"), 1);
    assert!(line_of(&text, "WaitFlag<HardEvent::MTE2_MTE3>") < line_of(&text, "x_local_buf = q0.DeQue"));
    assert!(line_of(&text, "x_local_buf = q0.DeQue") < line_of(&text, "DataCopyPadExtend(y_gm"));
}

#[test]
fn test_one_barrier_orders_vector_producers() {
    let mut graph = row_graph("buffers");
    graph.nodes = vec![
        data(0, "x", 0, F, 0),
        load(1, "x_local", 0, Out::que(1, F, Position::VecIn, 0).rows()),
        vector(2, "a", "Abs", &[1], Out::buf(2, F, Position::VecCalc, 0).rows()),
        vector(3, "b", "Exp", &[1], Out::buf(3, F, Position::VecCalc, 1).rows()),
        vector(4, "z_local", "Add", &[2, 3], Out::que(4, F, Position::VecOut, 1).rows()),
        store(5, "z", 4, 5, F),
        output(6, "out", 5, 0),
    ];
    let text = generate(&graph, &["x"], &["z"]);
    assert!(text.contains("TBuf<TPosition::VECCALC> b0;\n"));
    assert!(text.contains("  a = b0_buf.template ReinterpretCast<float>();\n"));
    assert!(text.contains("  b = b1_buf.template ReinterpretCast<float>();\n"));
    assert_eq!(count(&text, "PipeBarrier<PIPE_V>();"), 1);
    assert_eq!(count(&text, "AllocEventID"), 0);
    assert_eq!(count(&text, "x_local_buf = q0.DeQue"), 1);
    assert!(line_of(&text, "Exp(b, x_local") < line_of(&text, "PipeBarrier<PIPE_V>();"));
    assert!(line_of(&text, "PipeBarrier<PIPE_V>();") < line_of(&text, "Add(z_local, a, b"));
    assert!(line_of(&text, "Exp(b, x_local") < line_of(&text, "q0.FreeTensor(x_local_buf);"));
}

#[test]
fn test_reused_slot_waits_for_same_unit_reader() {
    let mut graph = row_graph("reuse");
    graph.nodes = vec![
        data(0, "x", 0, F, 0),
        load(1, "x_local", 0, Out::que(1, F, Position::VecIn, 0).rows()),
        vector(2, "a", "Abs", &[1], Out::buf(2, F, Position::VecCalc, 0).rows()),
        vector(3, "b", "Exp", &[2], Out::buf(3, F, Position::VecCalc, 1).rows()),
        vector(4, "c", "Abs", &[3], Out::buf(4, F, Position::VecCalc, 0).rows().reuse(2)),
        vector(5, "z_local", "Relu", &[4], Out::que(5, F, Position::VecOut, 1).rows()),
        store(6, "z", 5, 6, F),
        output(7, "out", 6, 0),
    ];
    let text = generate(&graph, &["x"], &["z"]);
    let exp = line_of(&text, "Exp(b, a");
    let cast = line_of(&text, "c = a.template ReinterpretCast<float>();");
    let barrier = text.lines().enumerate().any(|(i, l)| l.contains("PipeBarrier<PIPE_V>();") && exp < i && i < cast);
    assert!(barrier, "no barrier between the last read of `a` and its reuse:\n{text}");
    assert!(cast < line_of(&text, "Abs(c, b"));
    assert_eq!(count(&text, "AllocEventID"), 0);
}

#[test]
fn test_buffer_read_by_store_is_fenced_before_next_iteration() {
    let mut graph = row_graph("stored_buffer");
    graph.nodes = vec![
        data(0, "x", 0, F, 0),
        load(1, "x_local", 0, Out::que(1, F, Position::VecIn, 0).rows()),
        vector(2, "a", "Abs", &[1], Out::buf(2, F, Position::VecCalc, 0).rows()),
        store(3, "y", 2, 3, F),
        output(4, "out", 3, 0),
    ];
    let text = generate(&graph, &["x"], &["y"]);
    assert_eq!(count(&text, "AllocEventID<HardEvent::V_MTE3>"), 1);
    assert_eq!(count(&text, "AllocEventID<HardEvent::MTE3_V>"), 1);
    assert!(line_of(&text, "WaitFlag<HardEvent::V_MTE3>") < line_of(&text, "DataCopyPadExtend(y_gm"));
    assert!(line_of(&text, "DataCopyPadExtend(y_gm") < line_of(&text, "SetFlag<HardEvent::MTE3_V>"));
    assert!(text.ends_with("    tpipe.ReleaseEventID<HardEvent::MTE3_V>(ev);\n  }\n}\n"), "unexpected loop footer:\n{text}");
}

/// Load and store per row, compute per element of the row in a nested loop.
fn nested_graph() -> ScheduledGraph {
    let mut graph = row_graph("nested");
    graph.nodes = vec![
        data(0, "x", 0, F, 0),
        load(1, "x_local", 0, Out::que(1, F, Position::VecIn, 0).rows()),
        N::new(2, "y_local", "Abs")
            .unit(ComputeUnit::Vector)
            .sched(&[0, 1], Some(1))
            .input(1, 0)
            .output(Out::que(2, F, Position::VecOut, 1).rows())
            .build(),
        store(3, "y", 2, 3, F),
        output(4, "out", 3, 0),
    ];
    graph
}

#[test]
fn test_queue_lifecycle_stays_at_allocation_depth() {
    let text = generate(&nested_graph(), &["x"], &["y"]);
    for step in ["q0.AllocTensor", "q0.EnQue", "q0.DeQue", "q0.FreeTensor", "q1.AllocTensor", "q1.EnQue", "q1.DeQue", "q1.FreeTensor"] {
        assert_eq!(count(&text, step), 1, "`{step}` in:\n{text}");
    }
    let before = "  y_local_buf = q1.AllocTensor<uint8_t>();
  y_local = y_local_buf.template ReinterpretCast<float>();
  x_local_buf = q0.DeQue<uint8_t>();
  for (int64_t z1 = 0; z1 < t.s1; z1++) {
";
    let after = "  }
  q1.EnQue(y_local_buf);
  q0.FreeTensor(x_local_buf);
  y_local_buf = q1.DeQue<uint8_t>();
";
    assert!(text.contains(before), "unexpected loop entry:\n{text}");
    assert!(text.contains(after), "unexpected loop exit:\n{text}");
    let (open, close) = (line_of(&text, "for (int64_t z1"), line_of(&text, "q1.EnQue(y_local_buf);"));
    let abs = line_of(&text, "Abs(y_local");
    assert!(open < abs && abs < close);
}

#[test]
fn test_inner_only_tensors_live_inside_the_loop() {
    let mut graph = nested_graph();
    graph.nodes[3] = N::new(3, "y", "Store")
        .unit(ComputeUnit::Mte3)
        .sched(&[0, 1], Some(1))
        .input(2, 0)
        .output(Out::gm(3, F).gm_rows())
        .build();
    let text = generate(&graph, &["x"], &["y"]);
    let open = line_of(&text, "for (int64_t z1");
    assert!(line_of(&text, "x_local_buf = q0.DeQue") < open);
    assert!(line_of(&text, "q0.FreeTensor(x_local_buf);") > line_of(&text, "q1.FreeTensor(y_local_buf);"));
    assert!(line_of(&text, "y_local_buf = q1.AllocTensor") > open);
    assert!(text.contains("    q1.EnQue(y_local_buf);\n"));
    assert!(text.contains("    q1.FreeTensor(y_local_buf);\n"));
    assert!(text.contains("  }\n  q0.FreeTensor(x_local_buf);\n}\n"));
}

#[test]
fn test_shared_queue_allocation() {
    let mut graph = row_graph("shared");
    graph.nodes = vec![
        data(0, "x", 0, F, 0),
        data(1, "y", 1, F, 1),
        load(2, "x_local", 0, Out::que(2, F, Position::VecIn, 0).rows().merge_scope(1)),
        load(3, "y_local", 1, Out::que(3, F, Position::VecIn, 0).rows().merge_scope(1)),
        vector(4, "z_local", "Add", &[2, 3], Out::que(4, F, Position::VecOut, 1).rows()),
        store(5, "z", 4, 5, F),
        output(6, "out", 5, 0),
    ];
    let text = generate(&graph, &["x", "y"], &["z"]);
    assert!(text.contains("const uint32_t m1_size = "));
    assert!(text.contains("const uint32_t m1_que_buf_num = 1;\n"));
    assert!(!text.contains("const uint32_t x_local_size"));
    assert_eq!(count(&text, "q0.AllocTensor"), 1);
    assert!(text.contains("  y_local = x_local_buf[AlignUp(t.s1, 8) * 4].template ReinterpretCast<float>();\n"));
    assert_eq!(count(&text, "q0.EnQue(x_local_buf);"), 1);
    assert_eq!(count(&text, "q0.DeQue"), 1);
    assert_eq!(count(&text, "q0.FreeTensor(x_local_buf);"), 1);
    assert!(line_of(&text, "DataCopyPadExtend(y_local") < line_of(&text, "q0.EnQue(x_local_buf);"));
}

/// `y = x * scale` where `scale` is a single element loaded once per row loop.
fn scalar_graph() -> ScheduledGraph {
    let scalar_layout = |out: Out| out.axes(&[0, 1], &[Expr::ONE, Expr::ONE], &[Expr::ZERO, Expr::ZERO]);
    let mut graph = row_graph("scaled");
    graph.nodes = vec![
        data(0, "x", 0, F, 0),
        N::new(1, "scale", "Data").output(scalar_layout(Out::gm(1, F))).index(1).build(),
        load(2, "x_local", 0, Out::que(2, F, Position::VecIn, 0).rows()),
        load(3, "scale_local", 1, scalar_layout(Out::que(3, F, Position::VecIn, 1)).vectorized(&[1], &[Expr::ZERO])),
        vector(4, "y_local", "Mul", &[2, 3], Out::que(4, F, Position::VecOut, 2).rows()),
        store(5, "y", 4, 5, F),
        output(6, "out", 5, 0),
    ];
    graph
}

#[test]
fn test_scalar_read_back() {
    let text = generate(&scalar_graph(), &["x", "scale"], &["y"]);
    assert!(text.contains("float scale_local_ub_scalar;\n"));
    let guard = line_of(&text, "if (z0 == 0) {");
    let copy = line_of(&text, "DataCopyPadExtend(scale_local, scale_gm, 1, 1, 0, 0);");
    let event = line_of(&text, "AllocEventID<HardEvent::MTE2_S>");
    let read = line_of(&text, "scale_local_ub_scalar = scale_local.GetValue(0);");
    assert!(guard < copy && copy < event && event < read);
    assert!(line_of(&text, "q1.EnQue(scale_local_buf);") > read);
    assert!(text.contains("Muls(y_local, x_local, scale_local_ub_scalar, AlignUp(t.s1, 8));"));
}

#[test]
fn test_read_back_scalar_cannot_be_forced_to_vector() {
    let mut kernel = parse(&scalar_graph()).unwrap();
    let result = kernel.output_tensor_is_ub_scalar(TensorId(3), false);
    assert!(matches!(result, Err(Error::OptimizationConflict { tensor }) if tensor == TensorId(3)));

    let mut graph = scalar_graph();
    graph.optimize.force_vector = vec![TensorId(3)];
    assert!(matches!(parse(&graph), Err(Error::OptimizationConflict { .. })));

    let mut graph = scalar_graph();
    graph.optimize.force_vector = vec![TensorId(2)];
    let kernel = parse(&graph).unwrap();
    assert!(!kernel.tpipe.tensor(TensorId(2)).unwrap().is_ub_scalar);
}

#[test]
fn test_constant_broadcast_block() {
    let mut graph = row_graph("constant");
    graph.nodes = vec![
        data(0, "x", 0, F, 0),
        N::new(1, "c", "Scalar").output(Out::constant(1, F)).value("2.0").build(),
        load(2, "x_local", 0, Out::que(2, F, Position::VecIn, 0).rows()),
        vector(3, "z_local", "Sub", &[2, 1], Out::que(3, F, Position::VecOut, 1).rows()),
        store(4, "z", 3, 4, F),
        output(5, "out", 4, 0),
    ];
    let text = generate(&graph, &["x"], &["z"]);
    assert!(text.contains("const float c = 2.0;\n"));
    assert!(text.contains("Duplicate(blk_0_tensor, (float)2.0, 8);\n"));
    assert!(text.contains("LocalTensor<float> c_blk = blk_0_tensor;\n"));
    assert!(text.contains("Sub(z_local, x_local, c_blk, 64, Ceiling(Rational(AlignUp(t.s1, 8), 64)), {1, 1, 0, 8, 8, 0});"));
}

#[test]
fn test_block_outer_axis_is_not_looped() {
    let mut graph = unary_graph("Abs");
    graph.axes.push(Axis::new(2, "zb", Expr::int(4), AxisKind::BlockOuter));
    for node in &mut graph.nodes {
        if node.sched.loop_axis.is_some() {
            node.sched.axis.insert(0, AxisId(2));
        }
    }
    let text = generate(&graph, &["x"], &["y"]);
    assert!(text.contains("int64_t block_idx = GetBlockIdx();\n"));
    assert!(text.contains("const int64_t zb = block_idx % 4;\n"));
    assert!(!text.contains("for (int64_t zb"));
    assert_eq!(count(&text, "for (int64_t z0 = 0;"), 1);
}

#[test]
fn test_unknown_op() {
    assert!(matches!(parse(&unary_graph("Frobnicate")), Err(Error::UnsupportedOp { op }) if op == "Frobnicate"));
}

#[test]
fn test_unsupported_data_type() {
    assert!(matches!(parse(&binary_graph("Div", DType::Int32)), Err(Error::UnsupportedDataType { .. })));
}

#[test]
fn test_invalid_graph() {
    let mut graph = unary_graph("Abs");
    graph.nodes.swap(1, 2);
    assert!(matches!(parse(&graph), Err(Error::Ir { .. })));
}

#[test]
fn test_missing_kernel_argument() {
    let mut kernel = parse(&unary_graph("Abs")).unwrap();
    let (inputs, outputs) = (names(&["x"]), names(&[]));
    let io = KernelIo { inputs: &inputs, outputs: &outputs };
    let result = kernel.generate(io, &WorkspaceLayout::default(), &KernelConfig::default());
    assert!(matches!(result, Err(Error::Lookup { what: "output", .. })));
}
