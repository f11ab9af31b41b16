use crate::aggregator::AggregatorValue;
use pregel_common::error::{PregelError, PregelResult};
use pregel_common::types::{Edge, GlobalSuperstep, VertexId};

/// What a vertex program sees of the vertex it runs for.
pub trait VertexContext<V, E, M> {
    fn global_superstep(&self) -> GlobalSuperstep;

    fn vertex_id(&self) -> &VertexId;

    fn vertex_data(&self) -> &V;

    fn vertex_data_mut(&mut self) -> &mut V;

    fn set_vertex_data(&mut self, value: V);

    fn edges(&self) -> Box<dyn Iterator<Item = &Edge<E>> + '_>;

    fn edge_count(&self) -> usize;

    fn send_message(&mut self, target: &VertexId, message: M) -> PregelResult<()>;

    fn send_message_to_all_neighbours(&mut self, message: M) -> PregelResult<()>
    where
        M: Clone,
    {
        let targets: Vec<VertexId> = self.edges().map(|e| e.to.clone()).collect();
        for target in &targets {
            self.send_message(target, message.clone())?;
        }
        Ok(())
    }

    /// The vertex is skipped in later supersteps until a message wakes it.
    fn vote_halt(&mut self);

    fn vote_active(&mut self);

    fn is_active(&self) -> bool;

    fn aggregate(&mut self, name: &str, value: AggregatorValue) -> PregelResult<()>;

    /// Global value of `name` as merged at the previous barrier.
    fn aggregated_value(&self, name: &str) -> Option<AggregatorValue>;
}

/// Per-superstep vertex program, shared by all local vertices of one worker.
pub trait VertexComputation<V, E, M>: Send {
    fn compute(
        &mut self,
        messages: &mut dyn Iterator<Item = M>,
        context: &mut dyn VertexContext<V, E, M>,
    ) -> PregelResult<()>;

    /// Repairs vertex state after a partial failure instead of recomputing.
    fn compensate(&mut self, _context: &mut dyn VertexContext<V, E, M>) -> PregelResult<()> {
        Err(PregelError::Algorithm(
            "compensation is not supported".to_string(),
        ))
    }
}
