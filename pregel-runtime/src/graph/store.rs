use pregel_common::types::{Edge, VertexId};

/// One local vertex: its id, activity flag and offsets into the store arena.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexEntry {
    pub id: VertexId,
    pub active: bool,
    pub data_offset: usize,
    pub edge_offset: usize,
    pub edge_count: usize,
}

/// Local vertex and edge partition of one worker.
///
/// Iteration order is stable across supersteps.
pub trait GraphStore<V, E>: Send {
    fn vertex_count(&self) -> usize;

    fn edge_count(&self) -> usize;

    fn vertex_entry(&self, index: usize) -> Option<&VertexEntry>;

    fn vertex_iterator(&self) -> Box<dyn Iterator<Item = &VertexEntry> + '_>;

    fn set_active(&mut self, index: usize, active: bool);

    fn active_count(&self) -> usize {
        self.vertex_iterator().filter(|e| e.active).count()
    }

    fn vertex_data(&self, entry: &VertexEntry) -> &V;

    /// Disjoint borrows of one vertex's entry, data and out-edges.
    fn vertex_parts(&mut self, index: usize) -> Option<VertexParts<'_, V, E>>;
}

/// One vertex as seen by a running computation.
pub struct VertexParts<'a, V, E> {
    pub entry: &'a VertexEntry,
    pub data: &'a mut V,
    pub edges: &'a [Edge<E>],
}
