use vecc_ir::TensorId;

use crate::api_call::CallId;

/// Call-site links of one tensor: who writes it, who reads it, and the reuse and share chains
/// it takes part in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiTensor {
    pub id: TensorId,
    pub write: Option<CallId>,
    /// Reading calls in node order, each at most once.
    pub reads: Vec<CallId>,
    /// Tensor whose slot this one takes over.
    pub reuse_from: Option<TensorId>,
    pub reuse_next: Option<TensorId>,
    /// Previous tensor packed into the same allocation.
    pub share_prev: Option<TensorId>,
    pub share_next: Option<TensorId>,
}

impl ApiTensor {
    pub fn new(id: TensorId) -> Self {
        Self { id, write: None, reads: Vec::new(), reuse_from: None, reuse_next: None, share_prev: None, share_next: None }
    }

    pub fn add_read(&mut self, call: CallId) {
        if !self.reads.contains(&call) {
            self.reads.push(call);
        }
    }

    pub fn last_read(&self) -> Option<CallId> {
        self.reads.last().copied()
    }
}
