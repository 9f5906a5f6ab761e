use test_case::test_case;
use vecc_dtype::DType;
use vecc_ir::{Axis, AxisId, AxisKind, Expr, Position, SizeVar};

use crate::test::fixtures::*;
use crate::tiler::Tiler;

fn tiler() -> Tiler {
    tiler_for(&row_graph("g"))
}

#[test_case(s("s0"), "t.s0"; "size_var")]
#[test_case(s("tmp"), "tmp"; "unregistered_symbol")]
#[test_case(s("s0") - 1, "t.s0 - 1"; "negative_literal")]
#[test_case((s("s0") - 1) * s("s1"), "(t.s0 - 1) * t.s1"; "parenthesized_factor")]
#[test_case(Expr::sum([s("s0") * -1, s("s1")]), "-t.s0 + t.s1"; "leading_negative")]
#[test_case(s("s1").align(8), "AlignUp(t.s1, 8)"; "align")]
#[test_case(Expr::max_of([s("s0"), s("s1"), Expr::int(4)]), "Max(4, Max(t.s0, t.s1))"; "nested_max")]
#[test_case(s("s0").div(s("s1")), "Rational(t.s0, t.s1)"; "division")]
#[test_case(s("s0").div(Expr::int(2)).ceil(), "Ceiling(Rational(t.s0, 2))"; "ceiling")]
#[test_case(s("s0").pow(Expr::int(2)), "Pow(t.s0, 2)"; "power")]
#[test_case(Expr::Mul(vec![s("s0"), Expr::ZERO]), "0"; "zero_factor")]
fn test_size_rendering(expr: Expr, expected: &str) {
    assert_eq!(tiler().size(&expr), expected);
}

#[test]
fn test_known_size_var_renders_literal() {
    let mut tiler = Tiler::new("t", 32);
    tiler.add_size_var(SizeVar::with_value("s0", 16));
    assert_eq!(tiler.size(&(s("s0") * 2)), "16 * 2");
    assert_eq!(tiler.raw_size(&(s("s0") * 2)), "s0 * 2");
}

#[test]
fn test_raw_size_keeps_symbols() {
    assert_eq!(tiler().raw_size(&(s("s0") - 1)), "s0 - 1");
}

#[test]
fn test_registration_is_idempotent() {
    let mut tiler = tiler();
    tiler.add_axis(Axis::new(0, "other", "s9", AxisKind::Original));
    tiler.add_size_var(SizeVar::with_value("s0", 3));
    assert_eq!(tiler.axes().len(), 2);
    assert_eq!(tiler.axis(AxisId(0)).unwrap().name, "z0");
    assert_eq!(tiler.size(&s("s0")), "t.s0");
}

#[test]
fn test_unknown_axis_is_lookup_failure() {
    assert!(matches!(tiler().axis(AxisId(7)), Err(crate::Error::Lookup { what: "axis", .. })));
}

#[test]
fn test_offset() {
    let tiler = tiler();
    let (z0, z1) = (AxisId(0), AxisId(1));
    assert_eq!(tiler.offset(&[z0, z1], &[z0, z1], &[s("s1"), Expr::ONE]).unwrap(), "(int64_t)z0 * t.s1 + (int64_t)z1");
    assert_eq!(tiler.offset(&[z0, z1], &[z0, z1], &[Expr::ZERO, Expr::ONE]).unwrap(), "(int64_t)z1");
    assert_eq!(tiler.offset(&[z0], &[z1], &[Expr::ONE]).unwrap(), "0");
    assert_eq!(tiler.offset(&[z0], &[z0], &[s("s1") + 1]).unwrap(), "(int64_t)z0 * (t.s1 + 1)");
}

#[test]
fn test_vectorized_offset_ignores_outer_loop() {
    let graph = row_graph("g");
    let tiler = tiler_for(&graph);
    let node = N::new(0, "x", "Load").output(Out::que(0, DType::Float32, Position::VecIn, 0).rows()).build();
    let x = tensor(&node, &tiler);
    assert_eq!(tiler.tensor_vectorized_offset(&[AxisId(0)], &x).unwrap(), "0");
    assert_eq!(tiler.tensor_vectorized_offset(&[AxisId(0), AxisId(1)], &x).unwrap(), "(int64_t)z1");
}

#[test_case(DType::Float32, 8; "float")]
#[test_case(DType::Float16, 16; "half")]
#[test_case(DType::Int8, 32; "byte")]
fn test_vectorized_size_is_block_aligned(dtype: DType, block_elems: i64) {
    let tiler = tiler();
    let node = N::new(0, "x", "Load").output(Out::que(0, dtype, Position::VecIn, 0).rows()).build();
    let x = tensor(&node, &tiler);
    assert_eq!(x.size, s("s1").align(block_elems));
    assert_eq!(x.actual_size, s("s1"));
    assert!(!x.is_ub_scalar);
}

#[test]
fn test_vectorized_size_over_two_axes() {
    let tiler = tiler();
    let out = Out::que(0, DType::Float32, Position::VecIn, 0)
        .axes(&[0, 1], &[s("s0"), s("s1")], &[s("s1"), Expr::ONE])
        .vectorized(&[0, 1], &[s("s1"), Expr::ONE]);
    let x = tensor(&N::new(0, "x", "Load").output(out).build(), &tiler);
    let env = |name: &str| match name {
        "s0" => Some(3),
        "s1" => Some(5),
        _ => None,
    };
    assert_eq!(x.actual_size.eval(&env), Some(15));
    assert_eq!(x.size.eval(&env), Some(16));
}

#[test]
fn test_scalar_tensor_has_unit_size() {
    let tiler = tiler();
    let out = Out::que(0, DType::Float32, Position::VecOut, 0)
        .axes(&[0, 1], &[s("s0"), Expr::ONE], &[Expr::ONE, Expr::ZERO])
        .vectorized(&[1], &[Expr::ZERO]);
    let x = tensor(&N::new(0, "x", "Sum").output(out).build(), &tiler);
    assert!(x.is_ub_scalar);
    assert_eq!(x.actual_size, Expr::ONE);
    assert_eq!(x.size, Expr::int(8));
}

#[test]
fn test_block_outer_axis_define() {
    let mut tiler = Tiler::new("t", 32);
    tiler.add_size_var(SizeVar::new("s0b"));
    tiler.add_axis(Axis::new(0, "z0b", "s0b", AxisKind::BlockOuter));
    tiler.add_axis(Axis::new(1, "z1", "s1", AxisKind::Original));
    tiler.add_axis(Axis::new(2, "z1b", Expr::int(4), AxisKind::BlockOuter));
    tiler.add_axis(Axis::new(3, "z2b", s("s0b") + 1, AxisKind::BlockOuter));
    let expected = "\
int64_t block_idx = GetBlockIdx();
if (block_idx >= t.block_dim) {
  return;
}
const int64_t z0b = block_idx % t.s0b;
block_idx /= t.s0b;
const int64_t z1b = block_idx % 4;
block_idx /= 4;
const int64_t z2b = block_idx % (t.s0b + 1);
";
    assert_eq!(tiler.block_outer_axis_define(), expected);
}

#[test]
fn test_block_outer_unit_axis() {
    let mut tiler = Tiler::new("t", 32);
    tiler.add_axis(Axis::new(0, "z0b", Expr::ONE, AxisKind::BlockOuter));
    assert!(tiler.block_outer_axis_define().ends_with("const int64_t z0b = 0;\n"));
}

#[test]
fn test_no_block_outer_axes() {
    assert_eq!(tiler().block_outer_axis_define(), "");
}
