//! Axis and size-variable registry, and the renderer for symbolic sizes.
//!
//! Every size or offset that ends up in generated text goes through [`Tiler::size`]: registered
//! size variables become reads of the tiling-data parameter (`t.s0`), and the symbolic operators
//! map onto the helper functions the kernel prelude defines (`AlignUp`, `Max`, `Rational`, ...).

use vecc_ir::{Axis, AxisId, Expr, SizeVar};

use crate::error::*;
use crate::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct Tiler {
    param: String,
    block_size: usize,
    axes: Vec<Axis>,
    size_vars: Vec<SizeVar>,
}

impl Tiler {
    pub fn new(param: impl Into<String>, block_size: usize) -> Self {
        Self { param: param.into(), block_size, axes: Vec::new(), size_vars: Vec::new() }
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Register an axis. Re-registering an id keeps the first registration.
    pub fn add_axis(&mut self, axis: Axis) {
        if self.axes.iter().all(|a| a.id != axis.id) {
            self.axes.push(axis);
        }
    }

    /// Register a size variable. Re-registering a name keeps the first registration.
    pub fn add_size_var(&mut self, var: SizeVar) {
        if self.size_vars.iter().all(|v| v.name != var.name) {
            self.size_vars.push(var);
        }
    }

    pub fn axis(&self, id: AxisId) -> Result<&Axis> {
        self.axes.iter().find(|a| a.id == id).ok_or_else(|| Error::lookup("axis", id))
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn size_var(&self, name: &str) -> Option<&SizeVar> {
        self.size_vars.iter().find(|v| v.name == name)
    }

    /// Render `expr` as target source, reading size variables from the tiling data.
    pub fn size(&self, expr: &Expr) -> String {
        self.render(expr, true)
    }

    /// Render `expr` with raw symbol names, for audit comments.
    pub fn raw_size(&self, expr: &Expr) -> String {
        self.render(expr, false)
    }

    fn render(&self, expr: &Expr, substitute: bool) -> String {
        match expr {
            Expr::Const(v) => v.to_string(),
            Expr::Symbol(name) => match self.size_var(name) {
                Some(SizeVar { value: Some(v), .. }) if substitute => v.to_string(),
                Some(_) if substitute => format!("{}.{name}", self.param),
                _ => name.clone(),
            },
            Expr::Add(terms) => self.render_sum(terms, substitute),
            Expr::Mul(factors) => self.render_product(factors, substitute),
            Expr::Div(a, b) => format!("Rational({}, {})", self.render(a, substitute), self.render(b, substitute)),
            Expr::Rational(p, q) => format!("Rational({p}, {q})"),
            Expr::Pow(a, b) => format!("Pow({}, {})", self.render(a, substitute), self.render(b, substitute)),
            Expr::Align(a, n) => format!("AlignUp({}, {n})", self.render(a, substitute)),
            Expr::Max(operands) => {
                let mut rendered = operands.iter().rev().map(|e| self.render(e, substitute));
                let last = rendered.next().unwrap_or_else(|| "0".to_string());
                rendered.fold(last, |acc, e| format!("Max({e}, {acc})"))
            }
            Expr::Ceil(a) => format!("Ceiling({})", self.render(a, substitute)),
        }
    }

    fn render_sum(&self, terms: &[Expr], substitute: bool) -> String {
        let mut out = String::new();
        for term in terms.iter().filter(|t| !t.is_zero()) {
            let (negative, magnitude) = match term {
                Expr::Const(c) if *c < 0 => (true, Expr::Const(-c)),
                Expr::Mul(factors) => match factors.last() {
                    Some(Expr::Const(c)) if *c < 0 => {
                        let rest = factors[..factors.len() - 1].iter().cloned();
                        (true, Expr::prod(rest.chain([Expr::Const(-c)])))
                    }
                    _ => (false, term.clone()),
                },
                _ => (false, term.clone()),
            };
            let text = self.render(&magnitude, substitute);
            match (out.is_empty(), negative) {
                (true, false) => out = text,
                (true, true) => out = format!("-{}", self.factor(&magnitude, substitute)),
                (false, false) => out = format!("{out} + {text}"),
                (false, true) => out = format!("{out} - {}", self.factor(&magnitude, substitute)),
            }
        }
        if out.is_empty() { "0".to_string() } else { out }
    }

    fn render_product(&self, factors: &[Expr], substitute: bool) -> String {
        if factors.iter().any(Expr::is_zero) {
            return "0".to_string();
        }
        let parts: Vec<String> =
            factors.iter().filter(|f| !f.is_one()).map(|f| self.factor(f, substitute)).collect();
        if parts.is_empty() { "1".to_string() } else { parts.join(" * ") }
    }

    /// Render as an operand of `*`, parenthesizing sums.
    fn factor(&self, expr: &Expr, substitute: bool) -> String {
        let text = self.render(expr, substitute);
        if expr.is_sum() { format!("({text})") } else { text }
    }

    /// Linear offset over `axes`: one `(int64_t){axis} * {stride}` term for each axis the tensor
    /// iterates over. Unit strides omit the factor and zero strides drop the term.
    pub fn offset(&self, axes: &[AxisId], tensor_axes: &[AxisId], strides: &[Expr]) -> Result<String> {
        let mut terms = Vec::new();
        for &axis in axes {
            let Some(pos) = tensor_axes.iter().position(|a| *a == axis) else { continue };
            let Some(stride) = strides.get(pos) else { continue };
            if stride.is_zero() {
                continue;
            }
            let name = &self.axis(axis)?.name;
            if stride.is_one() {
                terms.push(format!("(int64_t){name}"));
            } else {
                terms.push(format!("(int64_t){name} * {}", self.factor(stride, true)));
            }
        }
        Ok(if terms.is_empty() { "0".to_string() } else { terms.join(" + ") })
    }

    /// Offset of the tensor's vectorized block for the loop nest `current_axis`.
    ///
    /// Only the suffix of `current_axis` starting at the first axis the tensor iterates over
    /// contributes, weighted by the tensor's vectorized strides.
    pub fn tensor_vectorized_offset(&self, current_axis: &[AxisId], tensor: &Tensor) -> Result<String> {
        let Some(start) = current_axis.iter().position(|a| tensor.axis.contains(a)) else {
            return Ok("0".to_string());
        };
        self.offset(&current_axis[start..], &tensor.vectorized_axis, &tensor.vectorized_strides)
    }

    /// Extent of `tensor` along `axis`: its own repeat, or the axis size when it has none.
    pub fn repeat(&self, tensor: &Tensor, axis: AxisId) -> Result<Expr> {
        match tensor.repeat_of(axis) {
            Some(repeat) => Ok(repeat.clone()),
            None => Ok(self.axis(axis)?.size.clone()),
        }
    }

    /// Σ (repeat − 1) × stride + 1 over the vectorized axes; `None` without vectorized axes.
    fn vectorized_span(&self, tensor: &Tensor) -> Result<Option<Expr>> {
        if tensor.vectorized_axis.is_empty() {
            return Ok(None);
        }
        let mut terms = Vec::with_capacity(tensor.vectorized_axis.len() + 1);
        for (&axis, stride) in tensor.vectorized_axis.iter().zip(&tensor.vectorized_strides) {
            terms.push((self.repeat(tensor, axis)? - 1) * stride.clone());
        }
        terms.push(Expr::ONE);
        Ok(Some(Expr::sum(terms)))
    }

    /// Block-aligned element count of the tensor's local footprint; literal 1 when the tensor
    /// has no vectorized axes.
    pub fn tensor_vectorized_size(&self, tensor: &Tensor) -> Result<Expr> {
        let block_elems = tensor.dtype.block_elems(self.block_size).max(1) as i64;
        Ok(self.vectorized_span(tensor)?.map_or(Expr::ONE, |span| span.align(block_elems)))
    }

    /// Element count actually touched by the tensor, without block alignment.
    pub fn tensor_actual_size(&self, tensor: &Tensor) -> Result<Expr> {
        Ok(self.vectorized_span(tensor)?.unwrap_or(Expr::ONE))
    }

    /// Decompose the block index into one local index per block-outer axis.
    pub fn block_outer_axis_define(&self) -> String {
        let block_axes: Vec<&Axis> = self.axes.iter().filter(|a| a.is_block_outer()).collect();
        if block_axes.is_empty() {
            return String::new();
        }
        let mut lines = vec![
            "int64_t block_idx = GetBlockIdx();".to_string(),
            format!("if (block_idx >= {}.block_dim) {{", self.param),
            "  return;".to_string(),
            "}".to_string(),
        ];
        for (i, axis) in block_axes.iter().enumerate() {
            if axis.size.is_one() {
                lines.push(format!("const int64_t {} = 0;", axis.name));
                continue;
            }
            let size = self.size(&axis.size);
            let size = if axis.size.is_const() || matches!(axis.size, Expr::Symbol(_)) { size } else { format!("({size})") };
            lines.push(format!("const int64_t {} = block_idx % {size};", axis.name));
            if i + 1 < block_axes.len() {
                lines.push(format!("block_idx /= {size};"));
            }
        }
        tracing::trace!(axes = block_axes.len(), "block outer axes defined");
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}
