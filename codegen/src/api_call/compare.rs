//! Extended compare instructions.
//!
//! Three forms exist. A second operand that is a cached scalar uses the scalar compare. Two
//! tensors with the same layout compare in one direct instruction over the whole footprint.
//! Otherwise the parameterized form walks rows of `inner` elements with a per-operand row
//! stride aligned to whole blocks; broadcast operands get a zero stride. When the output has
//! more than one row along a non-degenerate leading axis, the instruction is wrapped in an
//! explicit loop and the loop variable's offset is folded into every tensor operand.

use super::layout::{RowNest, needs_explicit_loop, operand};
use super::{ApiCall, CallContext, CmpMode, OperandRole};
use crate::error::*;
use crate::tensor::Tensor;

pub(super) fn compare(
    call: &ApiCall,
    ctx: &CallContext<'_>,
    mut mode: CmpMode,
    inputs: &[&Tensor],
    roles: &[OperandRole],
    out: &Tensor,
) -> Result<String> {
    let (mut a, mut b) = match inputs {
        [a, b] => (*a, *b),
        _ => return Err(Error::init("two inputs", &call.name)),
    };
    let (mut ra, mut rb) = match roles {
        [ra, rb] => (*ra, *rb),
        _ => (OperandRole::Vector, OperandRole::Vector),
    };
    if ra == OperandRole::Scalar {
        (a, b, ra, rb) = (b, a, rb, ra);
        mode = mode.swapped();
    }
    let cmp = mode.target_name();

    if rb == OperandRole::Scalar {
        let scalar = operand(ctx, b, rb, "")?;
        if ra == OperandRole::Vector && needs_explicit_loop(out, &[a]) {
            let nest = RowNest::new(ctx, out)?;
            let dst = operand(ctx, out, OperandRole::Vector, &nest.extra(ctx, out)?)?;
            let src = operand(ctx, a, ra, &nest.extra(ctx, a)?)?;
            let body = format!("CompareScalarExtend({dst}, {src}, {scalar}, {cmp}, {});", ctx.tiler.size(&nest.inner));
            return nest.wrap(ctx, &body);
        }
        let dst = operand(ctx, out, OperandRole::Vector, "")?;
        let src = operand(ctx, a, ra, "")?;
        let size = if ra == OperandRole::Vector { &a.size } else { &out.size };
        return Ok(format!("CompareScalarExtend({dst}, {src}, {scalar}, {cmp}, {});\n", ctx.tiler.size(size)));
    }

    let vectors: Vec<&Tensor> =
        [(a, ra), (b, rb)].into_iter().filter(|(_, r)| *r == OperandRole::Vector).map(|(t, _)| t).collect();
    let broadcast = ra == OperandRole::BlockBroadcast || rb == OperandRole::BlockBroadcast;
    if !broadcast && !needs_explicit_loop(out, &vectors) {
        let dst = operand(ctx, out, OperandRole::Vector, "")?;
        let (src0, src1) = (operand(ctx, a, ra, "")?, operand(ctx, b, rb, "")?);
        let size = vectors.first().map_or(&out.size, |t| &t.size);
        return Ok(format!("{}({dst}, {src0}, {src1}, {cmp}, {});\n", call.api, ctx.tiler.size(size)));
    }

    let nest = RowNest::new(ctx, out)?;
    let dst = operand(ctx, out, OperandRole::Vector, &nest.extra(ctx, out)?)?;
    let src0 = operand(ctx, a, ra, &nest.extra(ctx, a)?)?;
    let src1 = operand(ctx, b, rb, &nest.extra(ctx, b)?)?;
    let outer = if nest.is_looped() { "1".to_string() } else { ctx.tiler.size(&nest.outer) };
    let strides = [
        nest.row_stride(ctx, out, OperandRole::Vector),
        nest.row_stride(ctx, a, ra),
        nest.row_stride(ctx, b, rb),
    ]
    .map(|s| ctx.tiler.size(&s));
    let body = format!(
        "{}({dst}, {src0}, {src1}, {cmp}, {outer}, {}, {});",
        call.api,
        ctx.tiler.size(&nest.inner),
        strides.join(", ")
    );
    tracing::trace!(call = %call.name, looped = nest.is_looped(), "parameterized compare");
    nest.wrap(ctx, &body)
}
