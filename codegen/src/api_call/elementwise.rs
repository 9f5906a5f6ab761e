//! Unary, binary, negate and cast instructions.

use vecc_dtype::DType;
use vecc_ir::Expr;

use super::layout::{per_row, repeat_count, repeat_params, single_input};
use super::{ApiCall, CallContext, OperandRole};
use crate::error::*;
use crate::tensor::Tensor;

fn role(roles: &[OperandRole], index: usize) -> OperandRole {
    roles.get(index).copied().unwrap_or(OperandRole::Vector)
}

pub(super) fn unary(
    call: &ApiCall,
    ctx: &CallContext<'_>,
    inputs: &[&Tensor],
    roles: &[OperandRole],
    out: &Tensor,
) -> Result<String> {
    let input = single_input(call, inputs)?;
    per_row(ctx, out, &[(input, role(roles, 0))], |dst, srcs, count| {
        Ok(format!("{}({dst}, {}, {});\n", call.api, srcs[0], ctx.tiler.size(count)))
    })
}

pub(super) fn unary_tmp(
    call: &ApiCall,
    ctx: &CallContext<'_>,
    inputs: &[&Tensor],
    roles: &[OperandRole],
    out: &Tensor,
) -> Result<String> {
    let tmp = call
        .tmp_tag
        .and_then(|tag| ctx.tpipe.tmp_buf_name(tag))
        .ok_or_else(|| Error::init("scratch buffer", &call.name))?;
    let input = single_input(call, inputs)?;
    per_row(ctx, out, &[(input, role(roles, 0))], |dst, srcs, count| {
        Ok(format!("{}({dst}, {}, {tmp}, {});\n", call.api, srcs[0], ctx.tiler.size(count)))
    })
}

/// Bitwise unary on 16-bit lanes. Other element widths are reinterpreted and the element
/// count rescaled to lanes.
pub(super) fn unary_bit_width(
    call: &ApiCall,
    ctx: &CallContext<'_>,
    inputs: &[&Tensor],
    roles: &[OperandRole],
    out: &Tensor,
) -> Result<String> {
    let bytes = out.dtype.bytes();
    if bytes == 2 {
        return unary(call, ctx, inputs, roles, out);
    }
    let alias = DType::Int16.type_name();
    let alias_name = format!("{}_alias", out.name);
    let input = single_input(call, inputs)?;
    per_row(ctx, out, &[(input, role(roles, 0))], |dst, srcs, count| {
        let lanes = match bytes {
            1 => count.clone().div(Expr::int(2)).ceil(),
            n => count.clone() * (n / 2) as i64,
        };
        Ok(format!(
            "LocalTensor<{alias}> {alias_name} = {dst}.template ReinterpretCast<{alias}>();\n\
             {}({alias_name}, {}.template ReinterpretCast<{alias}>(), {});\n",
            call.api,
            srcs[0],
            ctx.tiler.size(&lanes)
        ))
    })
}

pub(super) fn cast(
    call: &ApiCall,
    ctx: &CallContext<'_>,
    inputs: &[&Tensor],
    roles: &[OperandRole],
    out: &Tensor,
) -> Result<String> {
    let input = single_input(call, inputs)?;
    let mode = input.dtype.cast_round_mode(out.dtype).ok_or_else(|| Error::UnsupportedDataType {
        api: call.api.clone(),
        dtypes: vec![input.dtype, out.dtype],
    })?;
    let mode = mode.target_name();
    per_row(ctx, out, &[(input, role(roles, 0))], |dst, srcs, count| {
        Ok(format!("{}({dst}, {}, {mode}, {});\n", call.api, srcs[0], ctx.tiler.size(count)))
    })
}

pub(super) fn binary(
    call: &ApiCall,
    ctx: &CallContext<'_>,
    inputs: &[&Tensor],
    roles: &[OperandRole],
    out: &Tensor,
) -> Result<String> {
    let (mut a, mut b) = match inputs {
        [a, b] => (*a, *b),
        _ => return Err(Error::init("two inputs", &call.name)),
    };
    let (mut ra, mut rb) = (role(roles, 0), role(roles, 1));
    if ra == OperandRole::Scalar {
        (a, b, ra, rb) = (b, a, rb, ra);
    }
    per_row(ctx, out, &[(a, ra), (b, rb)], |dst, srcs, count| {
        let (src0, src1) = (&srcs[0], &srcs[1]);
        let size = ctx.tiler.size(count);
        Ok(match (ra, rb) {
            (OperandRole::Vector, OperandRole::Vector) => format!("{}({dst}, {src0}, {src1}, {size});\n", call.api),
            (_, OperandRole::Scalar) => {
                let api = call.scalar_api.as_deref().ok_or_else(|| Error::init("scalar instruction variant", &call.name))?;
                format!("{api}({dst}, {src0}, {src1}, {size});\n")
            }
            _ => {
                let per_repeat = ctx.config.repeat_elems(out.dtype);
                let repeats = ctx.tiler.size(&repeat_count(count, per_repeat));
                let params = repeat_params(ctx, &[(out, OperandRole::Vector), (a, ra), (b, rb)], per_repeat);
                format!("{}({dst}, {src0}, {src1}, {per_repeat}, {repeats}, {params});\n", call.api)
            }
        })
    })
}

pub(super) fn neg(
    call: &ApiCall,
    ctx: &CallContext<'_>,
    inputs: &[&Tensor],
    roles: &[OperandRole],
    out: &Tensor,
) -> Result<String> {
    let input = single_input(call, inputs)?;
    per_row(ctx, out, &[(input, role(roles, 0))], |dst, srcs, count| {
        Ok(format!("{}({dst}, {}, ({})-1, {});\n", call.api, srcs[0], out.type_name(), ctx.tiler.size(count)))
    })
}
