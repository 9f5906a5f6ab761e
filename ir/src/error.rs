use snafu::Snafu;

use crate::{AxisId, NodeId};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while validating a scheduled graph.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// An axis id is referenced but never declared.
    #[snafu(display("unknown axis {id}"))]
    UnknownAxis { id: AxisId },

    /// A node id is referenced but never declared.
    #[snafu(display("unknown node {id}"))]
    UnknownNode { id: NodeId },

    /// A node reads an output index its producer does not have.
    #[snafu(display("node {node} reads output {index} of node {producer}, which has {available} outputs"))]
    UnknownOutput { node: NodeId, producer: NodeId, index: usize, available: usize },

    /// An input refers to a node that does not precede its consumer.
    #[snafu(display("node {node} reads node {input} before it is defined; node order must be topological"))]
    NotTopological { node: NodeId, input: NodeId },

    /// Two nodes share an id.
    #[snafu(display("duplicate node id {id}"))]
    DuplicateNode { id: NodeId },

    /// Two axes share an id.
    #[snafu(display("duplicate axis id {id}"))]
    DuplicateAxis { id: AxisId },

    /// The loop axis of a node is not one of its scheduled axes.
    #[snafu(display("node {node} loops over axis {axis} which is not in its scheduled axes"))]
    LoopAxisNotScheduled { node: NodeId, axis: AxisId },

    /// Per-axis attribute lists disagree in length.
    #[snafu(display("node {node} output {index}: {what} has {got} entries, expected {expected}"))]
    RankMismatch { node: NodeId, index: usize, what: &'static str, got: usize, expected: usize },
}
