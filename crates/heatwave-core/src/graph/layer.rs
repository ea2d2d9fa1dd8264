use super::{GraphNode, NodeId};
use crate::grid::GridShape;

const EMPTY: u32 = u32::MAX;

/// Dense cell → node-id map for one day. Filling and clearing touch only the
/// cells of that day's nodes, so a layer can be reused across days.
#[derive(Debug, Clone)]
pub struct DayLayer {
    slots: Vec<u32>,
}

impl DayLayer {
    pub fn new(shape: GridShape) -> Self {
        Self { slots: vec![EMPTY; shape.n_cells()] }
    }

    pub fn fill(&mut self, nodes: &[GraphNode], shape: GridShape) {
        for n in nodes {
            self.slots[shape.index(n.record.point)] = n.id.0;
        }
    }

    pub fn clear(&mut self, nodes: &[GraphNode], shape: GridShape) {
        for n in nodes {
            self.slots[shape.index(n.record.point)] = EMPTY;
        }
    }

    #[inline]
    pub fn get(&self, cell: usize) -> Option<NodeId> {
        let id = self.slots[cell];
        (id != EMPTY).then_some(NodeId(id))
    }
}
