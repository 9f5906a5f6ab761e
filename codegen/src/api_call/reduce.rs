//! Reductions over the vectorized footprint, viewed as a two-dimensional `[first, last]` shape.

use vecc_ir::Expr;

use super::layout::{operand, single_input};
use super::{ApiCall, CallContext, OperandRole};
use crate::error::*;
use crate::tensor::Tensor;

/// Which dimension of the `[first, last]` view is reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReducePattern {
    /// Reduce the last dimension, keep the first.
    AR,
    /// Reduce the first dimension, keep the last.
    RA,
}

impl ReducePattern {
    pub const fn target_name(&self) -> &'static str {
        match self {
            Self::AR => "Pattern::Reduce::AR",
            Self::RA => "Pattern::Reduce::RA",
        }
    }

    /// Reduced when the output collapses the input's last vectorized axis to a single element.
    pub fn detect(ctx: &CallContext<'_>, input: &Tensor, out: &Tensor) -> Result<Self> {
        let Some(&last) = input.vectorized_axis.last() else { return Ok(Self::AR) };
        let in_repeat = ctx.tiler.repeat(input, last)?;
        let out_repeat = if out.vectorized_axis.contains(&last) { ctx.tiler.repeat(out, last)? } else { Expr::ONE };
        if (out_repeat.is_one() && !in_repeat.is_one()) || input.vectorized_axis.len() < 2 {
            Ok(Self::AR)
        } else {
            Ok(Self::RA)
        }
    }
}

pub(super) fn reduce(
    call: &ApiCall,
    ctx: &CallContext<'_>,
    inputs: &[&Tensor],
    roles: &[OperandRole],
    out: &Tensor,
) -> Result<String> {
    let input = single_input(call, inputs)?;
    let tmp = call
        .tmp_tag
        .and_then(|tag| ctx.tpipe.tmp_buf_name(tag))
        .ok_or_else(|| Error::init("scratch buffer", &call.name))?;
    let pattern = ReducePattern::detect(ctx, input, out)?;

    let (first, last) = match input.vectorized_axis.split_last() {
        Some((_, leading)) if !leading.is_empty() => {
            let first = Expr::prod(leading.iter().map(|&a| ctx.tiler.repeat(input, a)).collect::<Result<Vec<_>>>()?);
            let row = leading.last().and_then(|&a| input.vectorized_stride_of(a)).cloned().unwrap_or(Expr::ONE);
            (first, row)
        }
        _ => (Expr::ONE, input.size.clone()),
    };

    let src = operand(ctx, input, roles.first().copied().unwrap_or(OperandRole::Vector), "")?;
    let dst = operand(ctx, out, OperandRole::Vector, "")?;
    let shape = format!("{}_shape", out.name);
    Ok(format!(
        "uint32_t {shape}[] = {{(uint32_t)({}), (uint32_t)({})}};\n\
         {}<{}, {}, true>({dst}, {src}, {tmp}, {shape}, true);\n",
        ctx.tiler.size(&first),
        ctx.tiler.size(&last),
        call.api,
        input.type_name(),
        pattern.target_name(),
    ))
}
