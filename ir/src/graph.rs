//! Scheduled computation graph handed over by the upstream scheduler.
//!
//! The node list is ordered: the scheduler emits it in the topological order the generated
//! kernel must follow, and every synchronization decision downstream depends on that order.
//! [`ScheduledGraph::validate`] checks it once at ingestion.

use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;
use snafu::ensure;
use vecc_dtype::DType;

use crate::error::*;
use crate::{AllocKind, Axis, AxisId, BufId, ComputeUnit, Expr, MergeScopeId, NodeId, Position, QueId, SizeVar};
use crate::{TensorId, WorkspaceId};

/// Reference to one output of an earlier node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeOutput {
    pub node: NodeId,
    pub index: usize,
}

impl NodeOutput {
    pub fn new(node: impl Into<NodeId>, index: usize) -> Self {
        Self { node: node.into(), index }
    }
}

/// Scheduling placement of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedAttr {
    /// Iteration axes of the node, outermost first.
    pub axis: Vec<AxisId>,
    /// Innermost axis the node is looped over; `None` places it at kernel scope.
    pub loop_axis: Option<AxisId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemAttr {
    pub tensor_id: Option<TensorId>,
    pub position: Position,
    pub alloc: AllocKind,
    pub workspace_id: Option<WorkspaceId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueAttr {
    pub id: Option<QueId>,
    pub depth: u32,
    pub buf_num: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufAttr {
    pub id: Option<BufId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptAttr {
    pub merge_scope: Option<MergeScopeId>,
    /// Earlier tensor whose slot this output takes over in place.
    pub ref_tensor: Option<TensorId>,
}

/// Description of one node output as assigned by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDesc {
    pub dtype: DType,
    pub axis: Vec<AxisId>,
    /// Per-axis extent. `None` when the scheduler left the shape unresolved.
    pub repeats: Option<Vec<Expr>>,
    pub strides: Vec<Expr>,
    pub vectorized_axis: Vec<AxisId>,
    pub vectorized_strides: Vec<Expr>,
    pub mem: MemAttr,
    pub que: QueAttr,
    pub buf: BufAttr,
    pub opt: OptAttr,
}

impl OutputDesc {
    pub fn new(dtype: DType) -> Self {
        Self {
            dtype,
            axis: Vec::new(),
            repeats: Some(Vec::new()),
            strides: Vec::new(),
            vectorized_axis: Vec::new(),
            vectorized_strides: Vec::new(),
            mem: MemAttr::default(),
            que: QueAttr::default(),
            buf: BufAttr::default(),
            opt: OptAttr::default(),
        }
    }

    /// Repeat of `axis`, if the output iterates over it.
    pub fn repeat_of(&self, axis: AxisId) -> Option<&Expr> {
        let pos = self.axis.iter().position(|a| *a == axis)?;
        self.repeats.as_ref()?.get(pos)
    }

    /// Π repeats × element bytes; zero when the repeats are unresolved.
    pub fn footprint(&self) -> Expr {
        match &self.repeats {
            Some(repeats) if !repeats.is_empty() => {
                Expr::prod(repeats.iter().cloned().chain([Expr::int(self.dtype.bytes() as i64)]))
            }
            _ => Expr::ZERO,
        }
    }
}

/// Free-form node attributes the generator understands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeAttrs {
    /// Kernel argument index for `Data` and `Output` nodes.
    pub index: Option<usize>,
    /// Literal value for `Scalar` nodes and broadcasts.
    pub value: Option<String>,
}

/// A primitive tensor operation placed by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op_type: String,
    pub unit: ComputeUnit,
    pub sched: SchedAttr,
    pub inputs: SmallVec<[NodeOutput; 4]>,
    pub outputs: SmallVec<[OutputDesc; 2]>,
    pub attrs: NodeAttrs,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            op_type: op_type.into(),
            unit: ComputeUnit::None,
            sched: SchedAttr::default(),
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
            attrs: NodeAttrs::default(),
        }
    }
}

/// Tensors the upstream optimizer wants kept in vector form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeInfo {
    pub force_vector: Vec<TensorId>,
}

/// One schedule variant of a graph, with its nodes in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduledGraph {
    pub name: String,
    pub axes: Vec<Axis>,
    pub size_vars: Vec<SizeVar>,
    pub nodes: Vec<Node>,
    pub optimize: OptimizeInfo,
}

impl ScheduledGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.iter().find(|n| n.id == id).ok_or(Error::UnknownNode { id })
    }

    pub fn axis(&self, id: AxisId) -> Result<&Axis> {
        self.axes.iter().find(|a| a.id == id).ok_or(Error::UnknownAxis { id })
    }

    /// Nodes that read any output of `id`, in node order.
    pub fn consumers(&self, id: NodeId) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.inputs.iter().any(|i| i.node == id))
    }

    /// Check ids, axis references and the topological order of the node list.
    pub fn validate(&self) -> Result<()> {
        let mut axis_ids = HashSet::new();
        for axis in &self.axes {
            ensure!(axis_ids.insert(axis.id), DuplicateAxisSnafu { id: axis.id });
        }
        let known_axis = |id: &AxisId| -> Result<()> {
            ensure!(axis_ids.contains(id), UnknownAxisSnafu { id: *id });
            Ok(())
        };

        let mut seen: HashMap<NodeId, usize> = HashMap::new();
        let all_ids: HashSet<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        for node in &self.nodes {
            for input in &node.inputs {
                match seen.get(&input.node) {
                    Some(&available) => ensure!(
                        input.index < available,
                        UnknownOutputSnafu { node: node.id, producer: input.node, index: input.index, available }
                    ),
                    None if all_ids.contains(&input.node) => {
                        return NotTopologicalSnafu { node: node.id, input: input.node }.fail();
                    }
                    None => return UnknownNodeSnafu { id: input.node }.fail(),
                }
            }

            node.sched.axis.iter().try_for_each(known_axis)?;
            if let Some(loop_axis) = node.sched.loop_axis {
                ensure!(node.sched.axis.contains(&loop_axis), LoopAxisNotScheduledSnafu { node: node.id, axis: loop_axis });
            }

            for (index, out) in node.outputs.iter().enumerate() {
                out.axis.iter().chain(&out.vectorized_axis).try_for_each(known_axis)?;
                if let Some(repeats) = &out.repeats {
                    let (got, expected) = (repeats.len(), out.axis.len());
                    ensure!(got == expected, RankMismatchSnafu { node: node.id, index, what: "repeats", got, expected });
                }
                if !out.strides.is_empty() {
                    let (got, expected) = (out.strides.len(), out.axis.len());
                    ensure!(got == expected, RankMismatchSnafu { node: node.id, index, what: "strides", got, expected });
                }
                let (got, expected) = (out.vectorized_strides.len(), out.vectorized_axis.len());
                ensure!(
                    got == expected,
                    RankMismatchSnafu { node: node.id, index, what: "vectorized strides", got, expected }
                );
            }

            ensure!(seen.insert(node.id, node.outputs.len()).is_none(), DuplicateNodeSnafu { id: node.id });
        }

        tracing::debug!(graph = %self.name, nodes = self.nodes.len(), axes = self.axes.len(), "scheduled graph validated");
        Ok(())
    }
}

/// One independently schedulable part of a fused graph, with its schedule variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleGroup {
    pub impls: Vec<ScheduledGraph>,
}

/// A fused graph split into groups that communicate through the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusedGraph {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub groups: Vec<ScheduleGroup>,
}

impl FusedGraph {
    /// Every schedule variant of every group.
    pub fn all_graphs(&self) -> impl Iterator<Item = &ScheduledGraph> {
        self.groups.iter().flat_map(|g| g.impls.iter())
    }
}
