//! Input model of the vecc kernel generator.
//!
//! The upstream scheduler hands the generator a [`ScheduledGraph`]: an ordered list of
//! [`Node`]s whose outputs are already assigned axes, memory positions, queue or buffer ids
//! and compute units. Sizes and strides are symbolic [`Expr`] values because tensor shapes
//! are resolved only at run time.
//!
//! # Module Organization
//!
//! - [`expr`] - Symbolic integer expressions
//! - [`axis`] - Axes and runtime size variables
//! - [`graph`] - Nodes, output descriptors, scheduled and fused graphs
//! - [`types`] - Identifier newtypes and small attribute enums
//! - [`error`] - Validation errors

pub mod axis;
pub mod error;
pub mod expr;
pub mod graph;
pub mod types;


pub use axis::{Axis, SizeVar};
pub use error::{Error, Result};
pub use expr::Expr;
pub use graph::{
    BufAttr, FusedGraph, MemAttr, Node, NodeAttrs, NodeOutput, OptAttr, OptimizeInfo, OutputDesc, QueAttr,
    SchedAttr, ScheduleGroup, ScheduledGraph,
};
pub use types::{AllocKind, AxisId, AxisKind, BufId, ComputeUnit, MergeScopeId, NodeId, Position, QueId};
pub use types::{TensorId, WorkspaceId};

pub use vecc_dtype::DType;
