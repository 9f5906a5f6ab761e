//! Per-output memory and shape descriptor.

use vecc_dtype::DType;
use vecc_ir::{AllocKind, AxisId, BufId, Expr, MergeScopeId, Node, Position, QueId, TensorId, WorkspaceId};

use crate::error::*;
use crate::tiler::Tiler;

/// Where the generated code lets the tensor's storage go through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorState {
    #[default]
    Unallocated,
    Allocated,
    Enqueued,
    Dequeued,
    Freed,
}

/// Kernel argument a global tensor is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoBinding {
    Input(usize),
    Output(usize),
}

/// One node output, with everything the generator needs to declare, size and bind it.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub id: TensorId,
    pub name: String,
    pub dtype: DType,
    pub position: Position,
    pub alloc: AllocKind,

    pub axis: Vec<AxisId>,
    pub repeats: Vec<Expr>,
    pub strides: Vec<Expr>,
    pub vectorized_axis: Vec<AxisId>,
    pub vectorized_strides: Vec<Expr>,
    /// Block-aligned local element count.
    pub size: Expr,
    /// Element count actually touched.
    pub actual_size: Expr,

    pub que: Option<QueId>,
    pub buf: Option<BufId>,
    pub merge_scope: Option<MergeScopeId>,
    /// Root of the reuse chain this tensor belongs to; its own id when it reuses nothing.
    pub reuse_id: TensorId,
    pub depth: u32,
    pub buf_num: u32,

    pub workspace_id: Option<WorkspaceId>,
    pub io: Option<IoBinding>,
    /// Literal of a compile-time constant.
    pub const_value: Option<String>,

    pub is_ub_scalar: bool,
    pub need_gen_get_value: bool,
    pub need_duplicate: bool,

    pub state: TensorState,
    pub written: bool,
    pub reads_done: usize,
}

/// Replace characters that are not valid in an identifier.
pub fn sanitize_name(name: &str) -> String {
    let mut out: String = name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

impl Tensor {
    /// Describe output `index` of `node`.
    pub fn from_output(node: &Node, index: usize) -> Result<Self> {
        let desc = node.outputs.get(index).ok_or_else(|| Error::lookup("output", format!("{}#{index}", node.name)))?;
        let id = desc.mem.tensor_id.ok_or_else(|| Error::init("tensor id", &node.name))?;
        if node.name.is_empty() {
            return Err(Error::init("name", format!("node {}", node.id)));
        }
        let que = match desc.mem.alloc {
            AllocKind::Queue => Some(desc.que.id.ok_or_else(|| Error::init("queue id", &node.name))?),
            _ => None,
        };
        let buf = match desc.mem.alloc {
            AllocKind::Buffer => Some(desc.buf.id.ok_or_else(|| Error::init("buffer id", &node.name))?),
            _ => None,
        };

        let mut name = sanitize_name(&node.name);
        if index > 0 {
            name = format!("{name}_{index}");
        }
        if desc.mem.alloc == AllocKind::Global {
            name.push_str("_gm");
        }

        Ok(Self {
            id,
            name,
            dtype: desc.dtype,
            position: desc.mem.position,
            alloc: desc.mem.alloc,
            axis: desc.axis.clone(),
            repeats: desc.repeats.clone().unwrap_or_default(),
            strides: desc.strides.clone(),
            vectorized_axis: desc.vectorized_axis.clone(),
            vectorized_strides: desc.vectorized_strides.clone(),
            size: Expr::ONE,
            actual_size: Expr::ONE,
            que,
            buf,
            merge_scope: desc.opt.merge_scope,
            reuse_id: id,
            depth: desc.que.depth.max(1),
            buf_num: desc.que.buf_num.max(1),
            workspace_id: desc.mem.workspace_id,
            io: None,
            const_value: None,
            is_ub_scalar: false,
            need_gen_get_value: false,
            need_duplicate: false,
            state: TensorState::Unallocated,
            written: false,
            reads_done: 0,
        })
    }

    /// Compute local sizes and the scalar classification.
    pub fn init(&mut self, tiler: &Tiler) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::init("name", format!("tensor {}", self.id)));
        }
        if !self.is_local() {
            return Ok(());
        }
        self.size = tiler.tensor_vectorized_size(self)?;
        self.actual_size = tiler.tensor_actual_size(self)?;
        self.is_ub_scalar = self.vectorized_axis.iter().map(|&a| tiler.repeat(self, a)).collect::<Result<Vec<_>>>()?.iter().all(Expr::is_one);
        Ok(())
    }

    pub fn is_local(&self) -> bool {
        self.alloc.is_local()
    }

    pub fn is_global(&self) -> bool {
        self.alloc == AllocKind::Global
    }

    pub fn is_const(&self) -> bool {
        self.const_value.is_some()
    }

    /// Constant or cached local scalar: usable where an instruction takes a scalar.
    pub fn is_scalar_like(&self) -> bool {
        self.is_const() || self.is_ub_scalar
    }

    pub fn repeat_of(&self, axis: AxisId) -> Option<&Expr> {
        let pos = self.axis.iter().position(|a| *a == axis)?;
        self.repeats.get(pos)
    }

    pub fn stride_of(&self, axis: AxisId) -> Option<&Expr> {
        let pos = self.axis.iter().position(|a| *a == axis)?;
        self.strides.get(pos)
    }

    pub fn vectorized_stride_of(&self, axis: AxisId) -> Option<&Expr> {
        let pos = self.vectorized_axis.iter().position(|a| *a == axis)?;
        self.vectorized_strides.get(pos)
    }

    /// Local footprint in bytes.
    pub fn byte_size(&self) -> Expr {
        self.size.clone() * self.dtype.bytes() as i64
    }

    /// Π repeats × element bytes, zero when the repeats are unresolved.
    pub fn footprint(&self) -> Expr {
        if self.repeats.is_empty() {
            return Expr::ZERO;
        }
        Expr::prod(self.repeats.iter().cloned().chain([Expr::int(self.dtype.bytes() as i64)]))
    }

    pub fn type_name(&self) -> &'static str {
        self.dtype.type_name()
    }

    pub fn scalar_name(&self) -> String {
        format!("{}_ub_scalar", self.name)
    }

    pub fn define_ub_scalar(&self) -> String {
        format!("{} {};", self.type_name(), self.scalar_name())
    }

    pub fn init_ub_scalar(&self) -> String {
        format!("{} = {}.GetValue(0);", self.scalar_name(), self.name)
    }

    pub fn set_global_buffer(&self, arg: &str) -> String {
        let ty = self.type_name();
        format!("GlobalTensor<{ty}> {name};\n{name}.SetGlobalBuffer((__gm__ {ty} *){arg});\n", name = self.name)
    }
}
