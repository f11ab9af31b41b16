use pregel_api::{Algorithm, Combiner, MinCombiner, VertexComputation, VertexContext};
use pregel_common::error::PregelResult;
use pregel_common::types::GlobalSuperstep;
use std::sync::Arc;

/// Weakly connected components by min-label propagation.
///
/// Expects both directions of every edge to be present; each vertex starts
/// labelled with its own key.
#[derive(Debug, Clone, Default)]
pub struct ConnectedComponents;

pub struct ConnectedComponentsComputation;

impl VertexComputation<String, (), String> for ConnectedComponentsComputation {
    fn compute(
        &mut self,
        messages: &mut dyn Iterator<Item = String>,
        context: &mut dyn VertexContext<String, (), String>,
    ) -> PregelResult<()> {
        if context.global_superstep() == 0 {
            let label = context.vertex_data().clone();
            context.send_message_to_all_neighbours(label)?;
        } else if let Some(smallest) = messages.min() {
            if smallest < *context.vertex_data() {
                context.set_vertex_data(smallest.clone());
                context.send_message_to_all_neighbours(smallest)?;
            }
        }
        context.vote_halt();
        Ok(())
    }

    fn compensate(
        &mut self,
        context: &mut dyn VertexContext<String, (), String>,
    ) -> PregelResult<()> {
        let label = context.vertex_data().clone();
        context.send_message_to_all_neighbours(label)?;
        context.vote_halt();
        Ok(())
    }
}

impl Algorithm<String, (), String> for ConnectedComponents {
    fn name(&self) -> &str {
        "wcc"
    }

    fn create_computation(
        &self,
        _gss: GlobalSuperstep,
    ) -> Box<dyn VertexComputation<String, (), String>> {
        Box::new(ConnectedComponentsComputation)
    }

    fn combiner(&self) -> Option<Arc<dyn Combiner<String>>> {
        Some(Arc::new(MinCombiner))
    }

    fn supports_compensation(&self) -> bool {
        true
    }
}
