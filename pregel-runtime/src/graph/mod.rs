pub mod mem_store;
pub mod results;
pub mod store;

use crate::shuffle::partitioner::ShardLayout;
use pregel_common::error::{PregelError, PregelResult};
use pregel_common::types::{Edge, VertexId, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One worker's slice of the input graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPartition<V, E> {
    pub vertices: Vec<(VertexId, V)>,
    pub edges: Vec<(VertexId, Edge<E>)>,
}

impl<V, E> Default for GraphPartition<V, E> {
    fn default() -> Self {
        Self {
            vertices: Vec::new(),
            edges: Vec::new(),
        }
    }
}

impl<V, E> GraphPartition<V, E> {
    /// Re-types vertex and edge payloads, e.g. to seed algorithm state.
    pub fn map<V2, E2>(
        self,
        vertex: impl Fn(&VertexId, V) -> V2,
        edge: impl Fn(E) -> E2,
    ) -> GraphPartition<V2, E2> {
        GraphPartition {
            vertices: self
                .vertices
                .into_iter()
                .map(|(id, v)| {
                    let value = vertex(&id, v);
                    (id, value)
                })
                .collect(),
            edges: self
                .edges
                .into_iter()
                .map(|(src, e)| (src, Edge::new(e.to, edge(e.data))))
                .collect(),
        }
    }
}

/// Whole input graph keyed by vertex key, before sharding.
#[derive(Debug, Clone)]
pub struct GraphInput<V, E> {
    pub vertices: Vec<(String, V)>,
    pub edges: Vec<(String, String, E)>,
}

impl<V, E> GraphInput<V, E> {
    pub fn new(vertices: Vec<(String, V)>, edges: Vec<(String, String, E)>) -> Self {
        Self { vertices, edges }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Adds the opposite direction of every edge.
    pub fn with_reverse_edges(mut self) -> Self
    where
        E: Clone,
    {
        let reversed: Vec<_> = self
            .edges
            .iter()
            .map(|(src, target, value)| (target.clone(), src.clone(), value.clone()))
            .collect();
        self.edges.extend(reversed);
        self
    }

    /// Splits the graph by shard owner. Edges live with their source vertex.
    pub fn partition(
        self,
        layout: &ShardLayout,
    ) -> PregelResult<BTreeMap<WorkerId, GraphPartition<V, E>>> {
        let mut out: BTreeMap<WorkerId, GraphPartition<V, E>> = layout
            .workers()
            .into_iter()
            .map(|w| (w, GraphPartition::default()))
            .collect();

        let mut known: HashSet<String> = HashSet::with_capacity(self.vertices.len());
        for (key, value) in self.vertices {
            let id = layout.vertex_id(&key)?;
            let owner = layout.owner(&id.shard)?.clone();
            known.insert(key);
            out.entry(owner).or_default().vertices.push((id, value));
        }

        for (src, target, value) in self.edges {
            if !known.contains(&src) {
                return Err(PregelError::InvalidArgument(format!(
                    "edge source {src} is not a vertex"
                )));
            }
            let src_id = layout.vertex_id(&src)?;
            let target_id = layout.vertex_id(&target)?;
            let owner = layout.owner(&src_id.shard)?.clone();
            out.entry(owner)
                .or_default()
                .edges
                .push((src_id, Edge::new(target_id, value)));
        }
        Ok(out)
    }
}

impl<E> GraphInput<(), E> {
    /// Every edge endpoint becomes a vertex, in first-seen order.
    pub fn from_edges(edges: Vec<(String, String, E)>) -> Self {
        let mut seen = HashSet::new();
        let mut vertices = Vec::new();
        for (src, target, _) in &edges {
            for key in [src, target] {
                if seen.insert(key.clone()) {
                    vertices.push((key.clone(), ()));
                }
            }
        }
        Self { vertices, edges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_follow_their_source_vertex() {
        let workers = vec![WorkerId::new("a"), WorkerId::new("b")];
        let layout = ShardLayout::round_robin(&workers, 2).unwrap();
        let input = GraphInput::new(
            (0..20).map(|i| (format!("v{i}"), i)).collect(),
            (0..19)
                .map(|i| (format!("v{i}"), format!("v{}", i + 1), ()))
                .collect(),
        );
        let parts = input.partition(&layout).unwrap();

        let total: usize = parts.values().map(|p| p.vertices.len()).sum();
        assert_eq!(total, 20);
        for (worker, part) in &parts {
            for (src, _) in &part.edges {
                assert_eq!(layout.owner(&src.shard).unwrap(), worker);
            }
        }
    }

    #[test]
    fn dangling_edge_source_is_rejected() {
        let layout = ShardLayout::round_robin(&[WorkerId::new("a")], 1).unwrap();
        let input: GraphInput<(), ()> =
            GraphInput::new(vec![], vec![("x".to_string(), "y".to_string(), ())]);
        assert!(input.partition(&layout).is_err());
    }

    #[test]
    fn edge_list_implies_vertices_and_reverse_edges() {
        let input = GraphInput::from_edges(vec![
            ("a".to_string(), "b".to_string(), 1u64),
            ("b".to_string(), "c".to_string(), 2),
        ])
        .with_reverse_edges();
        let keys: Vec<&str> = input.vertices.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(input.edges.len(), 4);
        assert!(input
            .edges
            .contains(&("c".to_string(), "b".to_string(), 2)));
    }
}
