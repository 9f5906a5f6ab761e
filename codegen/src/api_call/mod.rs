//! Per-operation instruction emitters.
//!
//! Every scheduled node becomes one [`ApiCall`]. The family of instruction it lowers to is a
//! closed [`ApiKind`] resolved through the [`ApiRegistry`](crate::config::ApiRegistry); the
//! family decides how operands are classified ([`OperandRole`]) and what text is emitted.

mod compare;
mod elementwise;
mod layout;
mod movement;
mod reduce;

use std::fmt;

use smallvec::SmallVec;
use vecc_dtype::{DType, DTypeSet, sets};
use vecc_ir::{AxisId, ComputeUnit, Node, NodeId, TensorId};

use crate::config::{ApiSpec, KernelConfig};
use crate::error::*;
use crate::sync::SyncState;
use crate::tensor::{Tensor, sanitize_name};
use crate::tiler::Tiler;
use crate::tpipe::TPipe;
use crate::writer::CodeWriter;

pub use layout::needs_explicit_loop;
pub use reduce::ReducePattern;

/// Position of a call in the kernel's node order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub usize);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Comparison predicate of a compare instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpMode {
    Ge,
    Gt,
    Le,
    Lt,
    Eq,
    Ne,
}

impl CmpMode {
    pub const fn target_name(&self) -> &'static str {
        match self {
            Self::Ge => "CMPMODE::GE",
            Self::Gt => "CMPMODE::GT",
            Self::Le => "CMPMODE::LE",
            Self::Lt => "CMPMODE::LT",
            Self::Eq => "CMPMODE::EQ",
            Self::Ne => "CMPMODE::NE",
        }
    }

    /// The predicate that holds for `(b, a)` whenever `self` holds for `(a, b)`.
    pub const fn swapped(&self) -> Self {
        match self {
            Self::Ge => Self::Le,
            Self::Gt => Self::Lt,
            Self::Le => Self::Ge,
            Self::Lt => Self::Gt,
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
        }
    }
}

/// Instruction family of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKind {
    /// Marker nodes without instructions.
    Nop,
    Load,
    Store,
    /// Broadcast of a scalar into a tensor.
    Duplicate,
    Unary,
    /// Unary with a shared scratch buffer.
    UnaryTmp,
    /// Unary working on 16-bit lanes regardless of the element width.
    UnaryBitWidth,
    Cast,
    Binary,
    Neg,
    Compare(CmpMode),
    Reduce,
}

impl ApiKind {
    /// Number of inputs the family takes; `None` when any count is accepted.
    const fn arity(&self) -> Option<usize> {
        match self {
            Self::Nop => None,
            Self::Binary | Self::Compare(_) => Some(2),
            _ => Some(1),
        }
    }
}

/// How an input is passed to the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandRole {
    /// A local tensor, indexed by its vectorized offset.
    Vector,
    /// A scalar register value: a constant or a cached local scalar.
    Scalar,
    /// A block repeated over the whole operation with zero stride.
    BlockBroadcast,
}

/// What one call needs from the kernel while generating.
pub struct CallContext<'a> {
    pub tiler: &'a Tiler,
    pub tpipe: &'a TPipe,
    /// Loop axes enclosing the call, outermost first.
    pub current_axis: &'a [AxisId],
    pub config: &'a KernelConfig,
}

impl<'a> CallContext<'a> {
    pub fn new(tpipe: &'a TPipe, current_axis: &'a [AxisId], config: &'a KernelConfig) -> Self {
        Self { tiler: &tpipe.tiler, tpipe, current_axis, config }
    }
}

/// One scheduled node bound to its instruction family and tensors.
#[derive(Debug, Clone)]
pub struct ApiCall {
    pub id: CallId,
    pub node: NodeId,
    pub name: String,
    pub op_type: String,
    pub api: String,
    pub scalar_api: Option<String>,
    pub commutative: bool,
    pub dtypes: DTypeSet,
    pub kind: ApiKind,
    pub unit: ComputeUnit,
    /// Scheduled axes up to and including the loop axis.
    pub axis: Vec<AxisId>,
    pub loop_axis: Option<AxisId>,
    pub inputs: SmallVec<[TensorId; 4]>,
    pub outputs: SmallVec<[TensorId; 2]>,
    /// Reuse tag of the scratch buffer the instruction uses.
    pub tmp_tag: Option<i64>,
}

impl ApiCall {
    pub fn init(
        node: &Node,
        spec: &ApiSpec,
        id: CallId,
        inputs: SmallVec<[TensorId; 4]>,
        outputs: SmallVec<[TensorId; 2]>,
    ) -> Result<Self> {
        if node.name.is_empty() {
            return Err(Error::init("name", format!("node {}", node.id)));
        }
        if let Some(arity) = spec.kind.arity()
            && inputs.len() != arity
        {
            return Err(Error::init(format!("{arity} inputs, got {}", inputs.len()), &node.name));
        }
        if spec.kind != ApiKind::Nop && outputs.len() != 1 {
            return Err(Error::init(format!("one output, got {}", outputs.len()), &node.name));
        }
        let axis = match node.sched.loop_axis {
            Some(loop_axis) => {
                let end = node.sched.axis.iter().position(|a| *a == loop_axis).map_or(0, |p| p + 1);
                node.sched.axis[..end].to_vec()
            }
            None => Vec::new(),
        };
        Ok(Self {
            id,
            node: node.id,
            name: sanitize_name(&node.name),
            op_type: node.op_type.clone(),
            api: spec.api.clone(),
            scalar_api: spec.scalar_api.clone(),
            commutative: spec.commutative,
            dtypes: spec.dtypes,
            kind: spec.kind,
            unit: if spec.unit.is_hardware() { spec.unit } else { node.unit },
            axis,
            loop_axis: node.sched.loop_axis,
            inputs,
            outputs,
            tmp_tag: None,
        })
    }

    pub fn needs_tmp_buf(&self) -> bool {
        matches!(self.kind, ApiKind::UnaryTmp | ApiKind::Reduce)
    }

    /// Classify every input of the call.
    pub fn operand_roles(&self, inputs: &[&Tensor]) -> Result<SmallVec<[OperandRole; 4]>> {
        use OperandRole::*;
        let broadcast_if_const = |t: &Tensor| if t.is_const() { BlockBroadcast } else { Vector };
        let roles = match self.kind {
            ApiKind::Nop | ApiKind::Load => inputs.iter().map(|_| Vector).collect(),
            ApiKind::Duplicate => {
                let input = inputs.first().ok_or_else(|| Error::init("broadcast input", &self.name))?;
                if !input.is_scalar_like() {
                    return Err(Error::init("scalar broadcast input", &self.name));
                }
                SmallVec::from_slice(&[Scalar])
            }
            ApiKind::Binary | ApiKind::Compare(_) => {
                let [a, b] = inputs else {
                    return Err(Error::init("two inputs", &self.name));
                };
                let scalar_form = match self.kind {
                    ApiKind::Compare(_) => sets::FLOATS.contains(a.dtype),
                    _ => self.scalar_api.is_some(),
                };
                let swappable = match self.kind {
                    ApiKind::Compare(_) => scalar_form,
                    _ => scalar_form && self.commutative,
                };
                let pair = match (a.is_scalar_like(), b.is_scalar_like()) {
                    (false, false) => [Vector, Vector],
                    (false, true) => [Vector, if scalar_form { Scalar } else { BlockBroadcast }],
                    (true, false) => [if swappable { Scalar } else { BlockBroadcast }, Vector],
                    (true, true) => [broadcast_if_const(*a), if scalar_form { Scalar } else { BlockBroadcast }],
                };
                SmallVec::from_slice(&pair)
            }
            _ => inputs.iter().map(|t| broadcast_if_const(*t)).collect(),
        };
        Ok(roles)
    }

    /// Reject element types the instruction cannot handle.
    pub fn check_dtypes(&self, inputs: &[&Tensor], outputs: &[&Tensor]) -> Result<()> {
        let unsupported = || Error::UnsupportedDataType {
            api: if self.api.is_empty() { self.op_type.clone() } else { self.api.clone() },
            dtypes: inputs.iter().chain(outputs).map(|t| t.dtype).collect(),
        };
        match self.kind {
            ApiKind::Nop => Ok(()),
            ApiKind::Cast => {
                let (Some(input), Some(output)) = (inputs.first(), outputs.first()) else {
                    return Err(Error::init("cast operands", &self.name));
                };
                input.dtype.cast_round_mode(output.dtype).map(|_| ()).ok_or_else(unsupported)
            }
            ApiKind::Compare(_) => {
                let inputs_ok = inputs.iter().all(|t| self.dtypes.contains(t.dtype));
                let outputs_ok = outputs.iter().all(|t| matches!(t.dtype, DType::Bool | DType::UInt8));
                if inputs_ok && outputs_ok { Ok(()) } else { Err(unsupported()) }
            }
            _ => {
                if inputs.iter().chain(outputs).all(|t| self.dtypes.contains(t.dtype)) {
                    Ok(())
                } else {
                    Err(unsupported())
                }
            }
        }
    }

    /// Instruction text of the call.
    pub fn generate(&self, ctx: &CallContext<'_>, inputs: &[&Tensor], outputs: &[&Tensor]) -> Result<String> {
        if self.kind == ApiKind::Nop {
            return Ok(String::new());
        }
        let out = *outputs.first().ok_or_else(|| Error::init("output tensor", &self.name))?;
        let roles = self.operand_roles(inputs)?;
        let text = match self.kind {
            ApiKind::Nop => String::new(),
            ApiKind::Load => movement::load(self, ctx, inputs, out)?,
            ApiKind::Store => movement::store(self, ctx, inputs, &roles, out)?,
            ApiKind::Duplicate => movement::duplicate(self, ctx, inputs, out)?,
            ApiKind::Unary => elementwise::unary(self, ctx, inputs, &roles, out)?,
            ApiKind::UnaryTmp => elementwise::unary_tmp(self, ctx, inputs, &roles, out)?,
            ApiKind::UnaryBitWidth => elementwise::unary_bit_width(self, ctx, inputs, &roles, out)?,
            ApiKind::Cast => elementwise::cast(self, ctx, inputs, &roles, out)?,
            ApiKind::Binary => elementwise::binary(self, ctx, inputs, &roles, out)?,
            ApiKind::Neg => elementwise::neg(self, ctx, inputs, &roles, out)?,
            ApiKind::Compare(mode) => compare::compare(self, ctx, mode, inputs, &roles, out)?,
            ApiKind::Reduce => reduce::reduce(self, ctx, inputs, &roles, out)?,
        };
        tracing::trace!(call = %self.name, api = %self.api, kind = ?self.kind, "instruction generated");
        Ok(text)
    }

    /// The single output when it is a cached scalar that needs reading back.
    fn read_back_output<'t>(&self, tpipe: &'t TPipe) -> Result<Option<&'t Tensor>> {
        let [out] = self.outputs.as_slice() else { return Ok(None) };
        let tensor = tpipe.tensor(*out)?;
        Ok((tensor.is_ub_scalar && tensor.need_gen_get_value).then_some(tensor))
    }

    /// Open a first-iteration guard when the output is a read-back scalar computed in a loop
    /// whose axis it does not vary along. Returns whether a guard was opened.
    pub fn pre_process(&self, tpipe: &TPipe, writer: &mut CodeWriter) -> Result<bool> {
        let (Some(out), Some(axis)) = (self.read_back_output(tpipe)?, self.loop_axis) else {
            return Ok(false);
        };
        let varies = out.axis.contains(&axis) && out.stride_of(axis).is_none_or(|s| !s.is_zero());
        if varies {
            return Ok(false);
        }
        writer.line(format!("if ({} == 0) {{", tpipe.tiler.axis(axis)?.name));
        writer.push_indent();
        Ok(true)
    }

    /// Read back scalar outputs, refill their broadcast block, and close the guard.
    pub fn post_process(&self, tpipe: &TPipe, sync: &mut SyncState, writer: &mut CodeWriter, guard: bool) -> Result<()> {
        for &id in &self.outputs {
            let tensor = tpipe.tensor(id)?;
            if !(tensor.is_ub_scalar && tensor.need_gen_get_value) {
                continue;
            }
            if let Some(fence) = sync.fence(self.id, self.unit, ComputeUnit::Scalar) {
                writer.lines(fence);
            }
            writer.line(tensor.init_ub_scalar());
            if tensor.need_duplicate {
                let elems = tensor.dtype.block_elems(tpipe.tiler.block_size());
                writer.line("PipeBarrier<PIPE_ALL>();");
                writer.line(format!("Duplicate({}, {}, {elems});", tensor.name, tensor.scalar_name()));
            }
            tracing::trace!(tensor = %tensor.name, duplicate = tensor.need_duplicate, "scalar read back");
        }
        if guard {
            writer.pop_indent();
            writer.line("}");
        }
        Ok(())
    }
}
