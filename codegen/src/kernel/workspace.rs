//! Layout of the global workspace shared by the groups of a fused graph.
//!
//! Every workspace id declared anywhere in the fused graph gets one region. A region must fit
//! every declaration of its id, across all schedule variants, so its size is the maximum of
//! their footprints. Regions are laid out back to back in ascending id order.

use vecc_ir::{Expr, ScheduledGraph, WorkspaceId};

use crate::error::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRegion {
    pub id: WorkspaceId,
    pub size: Expr,
    pub offset: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    pub regions: Vec<WorkspaceRegion>,
    /// Bytes the caller must allocate.
    pub total: Expr,
}

impl Default for WorkspaceLayout {
    fn default() -> Self {
        Self { regions: Vec::new(), total: Expr::ZERO }
    }
}

impl WorkspaceLayout {
    pub fn region(&self, id: WorkspaceId) -> Result<&WorkspaceRegion> {
        self.regions.iter().find(|r| r.id == id).ok_or_else(|| Error::lookup("workspace", id))
    }

    pub fn offset(&self, id: WorkspaceId) -> Result<&Expr> {
        Ok(&self.region(id)?.offset)
    }
}

/// Size every workspace region over all declarations in `graphs` and lay them out.
pub fn calculate_workspace_size<'a>(graphs: impl IntoIterator<Item = &'a ScheduledGraph>) -> WorkspaceLayout {
    let mut footprints: std::collections::BTreeMap<WorkspaceId, Vec<Expr>> = Default::default();
    for graph in graphs {
        for desc in graph.nodes.iter().flat_map(|n| n.outputs.iter()) {
            if let Some(ws) = desc.mem.workspace_id {
                footprints.entry(ws).or_default().push(desc.footprint());
            }
        }
    }

    let mut regions = Vec::with_capacity(footprints.len());
    let mut offset = Expr::ZERO;
    for (id, sizes) in footprints {
        let size = Expr::max_of(std::iter::once(Expr::ZERO).chain(sizes));
        regions.push(WorkspaceRegion { id, size: size.clone(), offset: offset.clone() });
        offset = offset + size;
    }
    tracing::debug!(regions = regions.len(), total = %offset, "workspace laid out");
    WorkspaceLayout { regions, total: offset }
}
