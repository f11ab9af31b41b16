use crate::graph::store::{GraphStore, VertexEntry, VertexParts};
use crate::graph::GraphPartition;
use pregel_common::error::{PregelError, PregelResult};
use pregel_common::types::{Edge, VertexId};
use std::collections::HashMap;

/// Arena-backed [`GraphStore`]: entries, vertex data and edges live in flat
/// vectors and refer to each other by offset.
pub struct InMemoryGraphStore<V, E> {
    entries: Vec<VertexEntry>,
    data: Vec<V>,
    edges: Vec<Edge<E>>,
    index: HashMap<VertexId, usize>,
}

impl<V, E> InMemoryGraphStore<V, E> {
    pub fn new(
        vertices: Vec<(VertexId, V)>,
        edges: Vec<(VertexId, Edge<E>)>,
    ) -> PregelResult<Self> {
        let mut index = HashMap::with_capacity(vertices.len());
        let mut entries = Vec::with_capacity(vertices.len());
        let mut data = Vec::with_capacity(vertices.len());

        for (id, value) in vertices {
            let offset = data.len();
            if index.insert(id.clone(), offset).is_some() {
                return Err(PregelError::InvalidArgument(format!(
                    "duplicate vertex {id}"
                )));
            }
            entries.push(VertexEntry {
                id,
                active: true,
                data_offset: offset,
                edge_offset: 0,
                edge_count: 0,
            });
            data.push(value);
        }

        let mut per_vertex: Vec<Vec<Edge<E>>> = (0..entries.len()).map(|_| Vec::new()).collect();
        let total = edges.len();
        for (src, edge) in edges {
            let i = *index.get(&src).ok_or_else(|| {
                PregelError::InvalidArgument(format!("edge source {src} is not a local vertex"))
            })?;
            per_vertex[i].push(edge);
        }

        let mut flat = Vec::with_capacity(total);
        for (entry, list) in entries.iter_mut().zip(per_vertex) {
            entry.edge_offset = flat.len();
            entry.edge_count = list.len();
            flat.extend(list);
        }

        Ok(Self {
            entries,
            data,
            edges: flat,
            index,
        })
    }

    pub fn from_partition(partition: GraphPartition<V, E>) -> PregelResult<Self> {
        Self::new(partition.vertices, partition.edges)
    }

    pub fn index_of(&self, id: &VertexId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &VertexId) -> Option<&V> {
        self.index.get(id).map(|&i| &self.data[i])
    }
}

impl<V, E> GraphStore<V, E> for InMemoryGraphStore<V, E>
where
    V: Send,
    E: Send,
{
    fn vertex_count(&self) -> usize {
        self.entries.len()
    }

    fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn vertex_entry(&self, index: usize) -> Option<&VertexEntry> {
        self.entries.get(index)
    }

    fn vertex_iterator(&self) -> Box<dyn Iterator<Item = &VertexEntry> + '_> {
        Box::new(self.entries.iter())
    }

    fn set_active(&mut self, index: usize, active: bool) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.active = active;
        }
    }

    fn vertex_data(&self, entry: &VertexEntry) -> &V {
        &self.data[entry.data_offset]
    }

    fn vertex_parts(&mut self, index: usize) -> Option<VertexParts<'_, V, E>> {
        let entry = self.entries.get(index)?;
        let end = entry.edge_offset + entry.edge_count;
        Some(VertexParts {
            entry,
            data: self.data.get_mut(entry.data_offset)?,
            edges: self.edges.get(entry.edge_offset..end)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pregel_common::types::ShardId;

    fn vid(key: &str) -> VertexId {
        VertexId::new(ShardId::new("s0"), key)
    }

    #[test]
    fn edges_are_grouped_per_source() {
        let store = InMemoryGraphStore::new(
            vec![(vid("a"), 1u32), (vid("b"), 2), (vid("c"), 3)],
            vec![
                (vid("c"), Edge::new(vid("a"), 10u8)),
                (vid("a"), Edge::new(vid("b"), 11)),
                (vid("a"), Edge::new(vid("c"), 12)),
            ],
        )
        .unwrap();

        assert_eq!(store.vertex_count(), 3);
        assert_eq!(store.edge_count(), 3);
        let mut store = store;
        let a = store.vertex_parts(0).unwrap();
        let targets: Vec<&str> = a.edges.iter().map(|e| e.to.key.as_str()).collect();
        assert_eq!(targets, vec!["b", "c"]);
        assert!(store.vertex_parts(1).unwrap().edges.is_empty());
        assert!(store.vertex_parts(3).is_none());
        assert_eq!(store.active_count(), 3);
    }

    #[test]
    fn vertex_data_is_mutable_through_parts() {
        let mut store: InMemoryGraphStore<u32, ()> =
            InMemoryGraphStore::new(vec![(vid("a"), 1), (vid("b"), 2)], vec![]).unwrap();
        let parts = store.vertex_parts(1).unwrap();
        assert_eq!(parts.entry.id, vid("b"));
        *parts.data += 4;
        assert_eq!(store.get(&vid("b")), Some(&6));
        assert_eq!(store.get(&vid("a")), Some(&1));
    }

    #[test]
    fn duplicate_vertices_are_rejected() {
        let res: PregelResult<InMemoryGraphStore<u32, ()>> =
            InMemoryGraphStore::new(vec![(vid("a"), 1), (vid("a"), 2)], vec![]);
        assert!(res.is_err());
    }
}
