//! Operand indexing, explicit row loops and repeat parameters shared by the instruction
//! families.

use vecc_ir::{AxisId, Expr};

use super::{ApiCall, CallContext, OperandRole};
use crate::error::*;
use crate::tensor::Tensor;
use crate::tpipe::blk_name;
use crate::writer::CodeWriter;

/// `name`, or `name[offset]` with the non-zero offset parts joined.
pub(super) fn indexed(name: &str, parts: &[&str]) -> String {
    let parts: Vec<&str> = parts.iter().copied().filter(|p| !p.is_empty() && *p != "0").collect();
    if parts.is_empty() { name.to_string() } else { format!("{name}[{}]", parts.join(" + ")) }
}

/// Render one operand for its role. `extra` is an additional offset from an explicit row loop.
pub(super) fn operand(ctx: &CallContext<'_>, tensor: &Tensor, role: OperandRole, extra: &str) -> Result<String> {
    Ok(match role {
        OperandRole::Scalar if tensor.is_const() => tensor.name.clone(),
        OperandRole::Scalar => tensor.scalar_name(),
        OperandRole::BlockBroadcast if tensor.is_const() => blk_name(tensor),
        OperandRole::BlockBroadcast => tensor.name.clone(),
        OperandRole::Vector => {
            let base = ctx.tiler.tensor_vectorized_offset(ctx.current_axis, tensor)?;
            indexed(&tensor.name, &[&base, extra])
        }
    })
}

/// Whether the instruction must run row by row: the operands disagree on their vectorized
/// layout, so no single contiguous run covers the whole footprint of every operand.
pub fn needs_explicit_loop(out: &Tensor, operands: &[&Tensor]) -> bool {
    out.vectorized_axis.len() >= 2
        && operands
            .iter()
            .any(|t| t.vectorized_axis != out.vectorized_axis || t.vectorized_strides != out.vectorized_strides)
}

/// Emit an instruction over the footprint of `out`. When the vector operands disagree with the
/// output's layout it is emitted once per row inside an explicit loop, and `emit` gets the row
/// length instead of the whole size.
pub(super) fn per_row(
    ctx: &CallContext<'_>,
    out: &Tensor,
    operands: &[(&Tensor, OperandRole)],
    emit: impl FnOnce(&str, &[String], &Expr) -> Result<String>,
) -> Result<String> {
    let vectors: Vec<&Tensor> = operands.iter().filter(|(_, r)| *r == OperandRole::Vector).map(|(t, _)| *t).collect();
    if !needs_explicit_loop(out, &vectors) {
        let dst = operand(ctx, out, OperandRole::Vector, "")?;
        let srcs = operands.iter().map(|(t, r)| operand(ctx, t, *r, "")).collect::<Result<Vec<_>>>()?;
        return emit(&dst, &srcs, &out.size);
    }
    let nest = RowNest::new(ctx, out)?;
    let dst = operand(ctx, out, OperandRole::Vector, &nest.extra(ctx, out)?)?;
    let srcs = operands
        .iter()
        .map(|(t, r)| {
            let extra = if *r == OperandRole::Vector { nest.extra(ctx, t)? } else { String::new() };
            operand(ctx, t, *r, &extra)
        })
        .collect::<Result<Vec<_>>>()?;
    tracing::trace!(out = %out.name, looped = nest.is_looped(), "row-wise instruction");
    nest.wrap(ctx, &emit(&dst, &srcs, &nest.inner)?)
}

/// Row decomposition of an output: the leading vectorized axes that need a loop, and the
/// length of one row.
pub(super) struct RowNest {
    pub axes: Vec<AxisId>,
    repeats: Vec<Expr>,
    pub inner: Expr,
    /// Leading axis whose stride separates rows, if any.
    pub row_axis: Option<AxisId>,
    /// Rows covered by one instruction when no loop is emitted.
    pub outer: Expr,
}

impl RowNest {
    pub fn new(ctx: &CallContext<'_>, out: &Tensor) -> Result<Self> {
        let Some((&last, leading)) = out.vectorized_axis.split_last() else {
            return Ok(Self { axes: Vec::new(), repeats: Vec::new(), inner: out.actual_size.clone(), row_axis: None, outer: Expr::ONE });
        };
        let (mut axes, mut repeats) = (Vec::new(), Vec::new());
        let mut outer = Vec::new();
        for &axis in leading {
            let repeat = ctx.tiler.repeat(out, axis)?;
            if !repeat.is_one() {
                axes.push(axis);
                repeats.push(repeat.clone());
            }
            outer.push(repeat);
        }
        Ok(Self { axes, repeats, inner: ctx.tiler.repeat(out, last)?, row_axis: leading.last().copied(), outer: Expr::prod(outer) })
    }

    pub fn is_looped(&self) -> bool {
        !self.axes.is_empty()
    }

    /// Offset the row loop adds to `tensor`.
    pub fn extra(&self, ctx: &CallContext<'_>, tensor: &Tensor) -> Result<String> {
        ctx.tiler.offset(&self.axes, &tensor.vectorized_axis, &tensor.vectorized_strides)
    }

    /// Distance between consecutive rows of `tensor`, rounded up to whole blocks of its
    /// element type. Broadcast operands, and operands that do not vary along the row axis,
    /// get zero.
    pub fn row_stride(&self, ctx: &CallContext<'_>, tensor: &Tensor, role: OperandRole) -> Expr {
        if role != OperandRole::Vector {
            return Expr::ZERO;
        }
        match self.row_axis {
            Some(axis) => match tensor.vectorized_stride_of(axis) {
                Some(stride) if !stride.is_zero() => {
                    stride.clone().align(tensor.dtype.block_elems(ctx.tiler.block_size()).max(1) as i64)
                }
                _ => Expr::ZERO,
            },
            None => tensor.size.clone(),
        }
    }

    /// Wrap `body` in one `for` per looped axis.
    pub fn wrap(&self, ctx: &CallContext<'_>, body: &str) -> Result<String> {
        let mut writer = CodeWriter::new(0);
        for (&axis, repeat) in self.axes.iter().zip(&self.repeats) {
            let name = &ctx.tiler.axis(axis)?.name;
            writer.line(format!("for (int64_t {name} = 0; {name} < {}; {name}++) {{", ctx.tiler.size(repeat)));
            writer.push_indent();
        }
        writer.lines(body);
        for _ in &self.axes {
            writer.pop_indent();
            writer.line("}");
        }
        Ok(writer.finish())
    }
}

/// Repeat parameters `{dst blk, src0 blk, src1 blk, dst rep, src0 rep, src1 rep}` for one
/// vector repeat of `per_repeat` elements. Broadcast operands get zero strides.
pub(super) fn repeat_params(ctx: &CallContext<'_>, operands: &[(&Tensor, OperandRole)], per_repeat: i64) -> String {
    let block = ctx.config.block_size.max(1) as i64;
    let (mut blk, mut rep) = (Vec::new(), Vec::new());
    for (tensor, role) in operands {
        if *role == OperandRole::Vector {
            blk.push("1".to_string());
            rep.push((per_repeat * tensor.dtype.bytes() as i64 / block).max(1).to_string());
        } else {
            blk.push("0".to_string());
            rep.push("0".to_string());
        }
    }
    format!("{{{}, {}}}", blk.join(", "), rep.join(", "))
}

/// Number of repeats needed to cover `size` elements.
pub(super) fn repeat_count(size: &Expr, per_repeat: i64) -> Expr {
    size.clone().div(Expr::int(per_repeat)).ceil()
}

/// Size argument of a whole-tensor instruction.
pub(super) fn size_arg(ctx: &CallContext<'_>, out: &Tensor) -> String {
    ctx.tiler.size(&out.size)
}

/// The only input of a unary-like call.
pub(super) fn single_input<'t>(call: &ApiCall, inputs: &[&'t Tensor]) -> Result<&'t Tensor> {
    inputs.first().copied().ok_or_else(|| Error::init("input tensor", &call.name))
}
