//! Data movement between global and local memory, and scalar broadcast.

use vecc_ir::Expr;

use super::layout::{indexed, operand, single_input, size_arg};
use super::{ApiCall, CallContext, OperandRole};
use crate::error::*;
use crate::tensor::Tensor;

/// Row shape of a copy between `local` and `global`: (rows, row length, global row stride,
/// local row stride).
fn copy_shape(ctx: &CallContext<'_>, local: &Tensor, global: &Tensor) -> Result<[String; 4]> {
    let Some((&last, leading)) = local.vectorized_axis.split_last() else {
        return Ok(["1".into(), "1".into(), "0".into(), "0".into()]);
    };
    let inner = ctx.tiler.repeat(local, last)?;
    let outer = Expr::prod(leading.iter().map(|&a| ctx.tiler.repeat(local, a)).collect::<Result<Vec<_>>>()?);
    let (gm_stride, ub_stride) = match leading.last() {
        Some(&row) => (
            global.stride_of(row).cloned().unwrap_or(Expr::ZERO),
            local.vectorized_stride_of(row).cloned().unwrap_or(Expr::ZERO),
        ),
        None => (Expr::ZERO, Expr::ZERO),
    };
    Ok([&outer, &inner, &gm_stride, &ub_stride].map(|e| ctx.tiler.size(e)))
}

pub(super) fn load(call: &ApiCall, ctx: &CallContext<'_>, inputs: &[&Tensor], out: &Tensor) -> Result<String> {
    let gm = single_input(call, inputs)?;
    let gm_offset = ctx.tiler.offset(ctx.current_axis, &gm.axis, &gm.strides)?;
    let [outer, inner, gm_stride, ub_stride] = copy_shape(ctx, out, gm)?;
    let dst = operand(ctx, out, OperandRole::Vector, "")?;
    let src = indexed(&gm.name, &[&gm_offset]);
    Ok(format!("{}({dst}, {src}, {outer}, {inner}, {gm_stride}, {ub_stride});\n", call.api))
}

pub(super) fn store(
    call: &ApiCall,
    ctx: &CallContext<'_>,
    inputs: &[&Tensor],
    roles: &[OperandRole],
    out: &Tensor,
) -> Result<String> {
    let local = single_input(call, inputs)?;
    let gm_offset = ctx.tiler.offset(ctx.current_axis, &out.axis, &out.strides)?;
    let [outer, inner, gm_stride, ub_stride] = copy_shape(ctx, local, out)?;
    let src = operand(ctx, local, roles.first().copied().unwrap_or(OperandRole::Vector), "")?;
    let dst = indexed(&out.name, &[&gm_offset]);
    Ok(format!("{}({dst}, {src}, {outer}, {inner}, {ub_stride}, {gm_stride});\n", call.api))
}

pub(super) fn duplicate(call: &ApiCall, ctx: &CallContext<'_>, inputs: &[&Tensor], out: &Tensor) -> Result<String> {
    let scalar = operand(ctx, single_input(call, inputs)?, OperandRole::Scalar, "")?;
    let dst = operand(ctx, out, OperandRole::Vector, "")?;
    Ok(format!("{}({dst}, {scalar}, {});\n", call.api, size_arg(ctx, out)))
}
