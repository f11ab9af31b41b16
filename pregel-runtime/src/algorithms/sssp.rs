use pregel_api::{Algorithm, Combiner, MinCombiner, VertexComputation, VertexContext};
use pregel_common::error::PregelResult;
use pregel_common::types::{GlobalSuperstep, VertexId};
use std::sync::Arc;

pub const UNREACHED: u64 = u64::MAX;

/// Single-source shortest paths over non-negative integer edge weights.
#[derive(Debug, Clone)]
pub struct ShortestPaths {
    pub source: String,
}

impl ShortestPaths {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

pub struct ShortestPathsComputation {
    source: String,
}

impl ShortestPathsComputation {
    fn is_source(&self, context: &dyn VertexContext<u64, u64, u64>) -> bool {
        context.vertex_id().key == self.source
    }
}

impl VertexComputation<u64, u64, u64> for ShortestPathsComputation {
    fn compute(
        &mut self,
        messages: &mut dyn Iterator<Item = u64>,
        context: &mut dyn VertexContext<u64, u64, u64>,
    ) -> PregelResult<()> {
        let current = *context.vertex_data();
        let mut best = current;
        if context.global_superstep() == 0 && self.is_source(context) {
            best = 0;
        }
        best = messages.fold(best, u64::min);
        if best < current {
            context.set_vertex_data(best);
            relax(context)?;
        }
        context.vote_halt();
        Ok(())
    }

    fn compensate(&mut self, context: &mut dyn VertexContext<u64, u64, u64>) -> PregelResult<()> {
        if self.is_source(context) {
            context.set_vertex_data(0);
        }
        if *context.vertex_data() != UNREACHED {
            relax(context)?;
        }
        context.vote_halt();
        Ok(())
    }
}

fn relax(context: &mut dyn VertexContext<u64, u64, u64>) -> PregelResult<()> {
    let distance = *context.vertex_data();
    let offers: Vec<(VertexId, u64)> = context
        .edges()
        .map(|e| (e.to.clone(), distance.saturating_add(e.data)))
        .collect();
    for (target, offer) in &offers {
        context.send_message(target, *offer)?;
    }
    Ok(())
}

impl Algorithm<u64, u64, u64> for ShortestPaths {
    fn name(&self) -> &str {
        "sssp"
    }

    fn create_computation(
        &self,
        _gss: GlobalSuperstep,
    ) -> Box<dyn VertexComputation<u64, u64, u64>> {
        Box::new(ShortestPathsComputation {
            source: self.source.clone(),
        })
    }

    fn combiner(&self) -> Option<Arc<dyn Combiner<u64>>> {
        Some(Arc::new(MinCombiner))
    }

    fn supports_compensation(&self) -> bool {
        true
    }
}
