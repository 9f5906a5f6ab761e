//! Kernel assembly.
//!
//! A [`Kernel`] is one schedule variant of one group: it parses a [`ScheduledGraph`] into
//! tensors, calls and a loop tree, then renders the kernel body. [`dispatch`] combines the
//! variants of all groups of a fused graph into one entry point selected by tiling key.

pub mod dispatch;
pub mod workspace;

use std::collections::HashMap;

use smallvec::SmallVec;
use snafu::ResultExt;
use vecc_ir::{AxisId, NodeId, ScheduledGraph, TensorId};

use crate::api_call::{ApiCall, ApiKind, CallId, OperandRole};
use crate::config::{KernelConfig, TmpBufDesc};
use crate::error::*;
use crate::loops::{Loop, LoopContext};
use crate::tensor::{IoBinding, Tensor};
use crate::tiler::Tiler;
use crate::tpipe::TPipe;
use crate::writer::CodeWriter;

pub use dispatch::{KernelOutput, generate_fused_kernel};
pub use workspace::{WorkspaceLayout, calculate_workspace_size};

/// Names of the kernel arguments, in declaration order.
#[derive(Debug, Clone, Copy)]
pub struct KernelIo<'a> {
    pub inputs: &'a [String],
    pub outputs: &'a [String],
}

#[derive(Debug)]
pub struct Kernel {
    pub name: String,
    pub tpipe: TPipe,
    pub calls: Vec<ApiCall>,
    pub root: Loop,
    /// Constants used as block-broadcast operands.
    blk_requests: Vec<TensorId>,
    tmp_descs: Vec<TmpBufDesc>,
}

impl Kernel {
    /// Build tensors, calls and the loop tree of one schedule variant.
    #[tracing::instrument(skip_all, fields(graph = %graph.name))]
    pub fn parse_graph(graph: &ScheduledGraph, config: &KernelConfig) -> Result<Self> {
        graph.validate().context(IrSnafu)?;

        let mut tiler = Tiler::new(config.tiling_data_param.clone(), config.block_size);
        for axis in &graph.axes {
            tiler.add_axis(axis.clone());
        }
        for var in &graph.size_vars {
            tiler.add_size_var(var.clone());
        }
        let mut tpipe = TPipe::new(tiler);
        tpipe.collect_ques(graph);

        let mut produced: HashMap<(NodeId, usize), TensorId> = HashMap::new();
        let mut calls = Vec::with_capacity(graph.nodes.len());
        let mut root = Loop::root();
        let mut tmp_descs = Vec::new();

        for node in &graph.nodes {
            let spec = config.api_registry.get(&node.op_type).ok_or_else(|| Error::UnsupportedOp { op: node.op_type.clone() })?;
            let id = CallId(calls.len());

            let mut outputs: SmallVec<[TensorId; 2]> = SmallVec::new();
            for index in 0..node.outputs.len() {
                let mut tensor = Tensor::from_output(node, index)?;
                tensor.init(&tpipe.tiler)?;
                match node.op_type.as_str() {
                    "Scalar" => {
                        let value = node.attrs.value.clone().ok_or_else(|| Error::init("constant value", &node.name))?;
                        tensor.const_value = Some(value);
                        tensor.is_ub_scalar = false;
                    }
                    "Data" => {
                        let index = node.attrs.index.ok_or_else(|| Error::init("input index", &node.name))?;
                        tensor.io = Some(IoBinding::Input(index));
                    }
                    _ => {}
                }
                let tensor_id = tpipe.add_tensor(tensor)?;
                tpipe.links_mut(tensor_id)?.write = Some(id);
                if let Some(source) = node.outputs[index].opt.ref_tensor {
                    tpipe.link_reuse(source, tensor_id)?;
                }
                produced.insert((node.id, index), tensor_id);
                outputs.push(tensor_id);
            }

            let inputs = node
                .inputs
                .iter()
                .map(|i| {
                    produced.get(&(i.node, i.index)).copied().ok_or_else(|| Error::lookup("node output", format!("{}#{}", i.node, i.index)))
                })
                .collect::<Result<SmallVec<[TensorId; 4]>>>()?;
            if node.op_type == "Output" {
                let index = node.attrs.index.ok_or_else(|| Error::init("output index", &node.name))?;
                for &input in &inputs {
                    tpipe.tensor_mut(input)?.io = Some(IoBinding::Output(index));
                }
            }
            for &input in &inputs {
                tpipe.links_mut(input)?.add_read(id);
            }

            let mut call = ApiCall::init(node, spec, id, inputs, outputs)?;
            let descs = config.tmp_buf_registry.descs(node);
            if call.needs_tmp_buf() {
                let desc = descs.first().ok_or_else(|| Error::init("scratch buffer descriptor", &node.name))?;
                call.tmp_tag = Some(desc.reuse_tag);
            }
            tmp_descs.extend(descs);

            let mut path: Vec<AxisId> = Vec::with_capacity(call.axis.len());
            for &axis in &call.axis {
                if !tpipe.tiler.axis(axis)?.is_block_outer() {
                    path.push(axis);
                }
            }
            root.place(&path, id);
            calls.push(call);
        }

        tpipe.build_share_chains()?;
        for call in &calls {
            let ins = call.inputs.iter().map(|&t| tpipe.tensor(t)).collect::<Result<Vec<_>>>()?;
            let outs = call.outputs.iter().map(|&t| tpipe.tensor(t)).collect::<Result<Vec<_>>>()?;
            call.check_dtypes(&ins, &outs)?;
        }

        let mut kernel = Self { name: graph.name.clone(), tpipe, calls, root, blk_requests: Vec::new(), tmp_descs };
        kernel.parse_optimize_info(graph)?;
        tracing::debug!(calls = kernel.calls.len(), tensors = kernel.tpipe.tensors().count(), "graph parsed");
        Ok(kernel)
    }

    /// Decide which cached scalars are read back and which constants get a broadcast block.
    pub fn parse_optimize_info(&mut self, graph: &ScheduledGraph) -> Result<()> {
        for index in 0..self.calls.len() {
            let call = &self.calls[index];
            if call.kind == ApiKind::Reduce {
                for out in call.outputs.clone() {
                    self.output_tensor_is_ub_scalar(out, false)?;
                }
            }
            let call = &self.calls[index];
            let ins = call.inputs.iter().map(|&t| self.tpipe.tensor(t)).collect::<Result<Vec<_>>>()?;
            let roles = call.operand_roles(&ins)?;
            let marks: Vec<(TensorId, OperandRole)> = call.inputs.iter().copied().zip(roles).collect();
            for (id, role) in marks {
                let tensor = self.tpipe.tensor_mut(id)?;
                if tensor.is_const() {
                    if role == OperandRole::BlockBroadcast && !self.blk_requests.contains(&id) {
                        self.blk_requests.push(id);
                    }
                    continue;
                }
                if !tensor.is_ub_scalar {
                    continue;
                }
                match role {
                    OperandRole::Scalar => tensor.need_gen_get_value = true,
                    OperandRole::BlockBroadcast => {
                        tensor.need_gen_get_value = true;
                        tensor.need_duplicate = true;
                    }
                    OperandRole::Vector => {}
                }
            }
        }
        for &id in &graph.optimize.force_vector {
            self.output_tensor_is_ub_scalar(id, false)?;
        }
        Ok(())
    }

    /// Override the scalar classification of a tensor.
    pub fn output_tensor_is_ub_scalar(&mut self, id: TensorId, is_scalar: bool) -> Result<()> {
        let tensor = self.tpipe.tensor_mut(id)?;
        snafu::ensure!(is_scalar || !tensor.need_gen_get_value, OptimizationConflictSnafu { tensor: id });
        tensor.is_ub_scalar = is_scalar && tensor.is_local();
        Ok(())
    }

    /// One binding per distinct global tensor and one declaration per constant.
    pub fn global_tensor_init(&self, io: KernelIo<'_>, layout: &WorkspaceLayout) -> Result<String> {
        let mut out = String::new();
        for tensor in self.tpipe.tensors() {
            if let Some(value) = &tensor.const_value {
                out.push_str(&format!("const {} {} = {value};\n", tensor.type_name(), tensor.name));
                continue;
            }
            if !tensor.is_global() {
                continue;
            }
            let arg = match (tensor.workspace_id, tensor.io) {
                (Some(ws), _) => {
                    let offset = layout.offset(ws)?;
                    if offset.is_zero() {
                        "workspace".to_string()
                    } else {
                        format!("(workspace + {})", self.tpipe.tiler.size(offset))
                    }
                }
                (None, Some(IoBinding::Input(i))) => io.inputs.get(i).cloned().ok_or_else(|| Error::lookup("input", i))?,
                (None, Some(IoBinding::Output(i))) => io.outputs.get(i).cloned().ok_or_else(|| Error::lookup("output", i))?,
                (None, None) => return Err(Error::init("global binding", tensor.name.clone())),
            };
            out.push_str(&tensor.set_global_buffer(&arg));
        }
        Ok(out)
    }

    /// Render the body of the schedule variant. Generation consumes the lifecycle state of the
    /// tensors, so a kernel is generated once.
    #[tracing::instrument(skip_all, fields(graph = %self.name))]
    pub fn generate(&mut self, io: KernelIo<'_>, layout: &WorkspaceLayout, config: &KernelConfig) -> Result<String> {
        let mut writer = CodeWriter::new(0);
        writer.line(format!("TPipe {};", self.tpipe.name));
        writer.lines(self.global_tensor_init(io, layout)?);
        writer.lines(self.tpipe.tiler.block_outer_axis_define());
        writer.lines(self.tpipe.tensor_size_calc()?);
        writer.lines(self.tpipe.merge_scope_size_calc()?);
        writer.lines(self.tpipe.local_tbuf_alloc()?);
        writer.lines(self.tpipe.local_tque_alloc()?);
        writer.lines(self.tpipe.tmp_buf_alloc(&self.tmp_descs));
        writer.lines(self.tpipe.gen_duplicate_buf_alloc(&self.blk_requests)?);
        for tensor in self.tpipe.tensors() {
            if tensor.is_ub_scalar && tensor.need_gen_get_value {
                writer.line(tensor.define_ub_scalar());
            }
        }
        let mut text = writer.finish();

        let mut ctx = LoopContext::new(&mut self.tpipe, &self.calls, config, 0);
        self.root.generate(&mut ctx)?;
        tracing::debug!(barriers = ctx.sync.barriers, events = ctx.sync.events, "loops generated");
        text.push_str(&ctx.writer.finish());
        Ok(text)
    }
}
