//! Error types for kernel generation.

use snafu::Snafu;
use vecc_dtype::DType;
use vecc_ir::TensorId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that abort generation of a kernel.
///
/// Any error means the scheduled graph or the configuration is invalid and must be fixed
/// upstream; no partial output is produced.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A call or tensor lacks an id, a name or a required attribute.
    #[snafu(display("init failure for {node}: missing {what}"))]
    Init { what: String, node: String },

    /// A tensor, axis, queue, buffer or call id was not registered.
    #[snafu(display("lookup failure: {what} {id} not found"))]
    Lookup { what: &'static str, id: String },

    /// A tensor consumed as a scalar read-back is re-requested for scalar optimization.
    #[snafu(display("optimization conflict: tensor {tensor} is already consumed as a scalar read-back"))]
    OptimizationConflict { tensor: TensorId },

    /// The data types of a node cannot be lowered to the requested instruction.
    #[snafu(display("unsupported data type for {api}: {dtypes:?}"))]
    UnsupportedDataType { api: String, dtypes: Vec<DType> },

    /// The node type has no registered instruction emitter.
    #[snafu(display("unsupported operation type: {op}"))]
    UnsupportedOp { op: String },

    /// Linking two tensors would close a reuse or share chain into a cycle.
    #[snafu(display("{kind} chain from {from} to {to} would form a cycle or fork"))]
    ChainCycle { kind: &'static str, from: TensorId, to: TensorId },

    /// The scheduled graph failed validation.
    #[snafu(display("IR error: {source}"))]
    Ir {
        #[snafu(source)]
        source: vecc_ir::Error,
    },
}

impl Error {
    pub fn lookup(what: &'static str, id: impl std::fmt::Display) -> Self {
        Self::Lookup { what, id: id.to_string() }
    }

    pub fn init(what: impl Into<String>, node: impl Into<String>) -> Self {
        Self::Init { what: what.into(), node: node.into() }
    }
}
