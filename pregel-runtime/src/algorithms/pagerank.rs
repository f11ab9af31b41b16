use pregel_api::aggregator::{AggregatorKind, AggregatorValue, Aggregators};
use pregel_api::{
    Algorithm, Combiner, MasterContext, SumCombiner, VertexComputation, VertexContext,
};
use pregel_common::error::PregelResult;
use pregel_common::types::GlobalSuperstep;
use std::sync::Arc;

/// Largest per-vertex rank change of the last superstep.
pub const CONVERGENCE: &str = "convergence";

#[derive(Debug, Clone)]
pub struct PageRank {
    pub damping: f64,
    pub threshold: f64,
}

impl PageRank {
    pub fn new(damping: f64, threshold: f64) -> Self {
        Self { damping, threshold }
    }
}

impl Default for PageRank {
    fn default() -> Self {
        Self::new(0.85, 1e-4)
    }
}

pub struct PageRankComputation {
    damping: f64,
}

impl VertexComputation<f64, (), f64> for PageRankComputation {
    fn compute(
        &mut self,
        messages: &mut dyn Iterator<Item = f64>,
        context: &mut dyn VertexContext<f64, (), f64>,
    ) -> PregelResult<()> {
        if context.global_superstep() > 0 {
            let sum: f64 = messages.sum();
            let rank = (1.0 - self.damping) + self.damping * sum;
            let delta = (rank - *context.vertex_data()).abs();
            context.aggregate(CONVERGENCE, AggregatorValue::Float(delta))?;
            context.set_vertex_data(rank);
        }
        spread(context)
    }

    fn compensate(&mut self, context: &mut dyn VertexContext<f64, (), f64>) -> PregelResult<()> {
        spread(context)
    }
}

fn spread(context: &mut dyn VertexContext<f64, (), f64>) -> PregelResult<()> {
    let degree = context.edge_count();
    if degree > 0 {
        let share = *context.vertex_data() / degree as f64;
        context.send_message_to_all_neighbours(share)?;
    }
    Ok(())
}

/// Ends the execution once no rank moves by `threshold` or more.
pub struct ConvergenceMaster {
    threshold: f64,
}

impl MasterContext for ConvergenceMaster {
    fn post_global_superstep(&mut self, gss: GlobalSuperstep, aggregators: &Aggregators) -> bool {
        if gss == 0 {
            return true;
        }
        match aggregators.value(CONVERGENCE).and_then(|v| v.as_f64()) {
            Some(delta) => delta >= self.threshold,
            None => true,
        }
    }
}

impl Algorithm<f64, (), f64> for PageRank {
    fn name(&self) -> &str {
        "pagerank"
    }

    fn create_computation(
        &self,
        _gss: GlobalSuperstep,
    ) -> Box<dyn VertexComputation<f64, (), f64>> {
        Box::new(PageRankComputation {
            damping: self.damping,
        })
    }

    fn combiner(&self) -> Option<Arc<dyn Combiner<f64>>> {
        Some(Arc::new(SumCombiner))
    }

    fn aggregators(&self) -> Vec<(String, AggregatorKind)> {
        vec![(CONVERGENCE.to_string(), AggregatorKind::Max)]
    }

    fn supports_compensation(&self) -> bool {
        true
    }

    fn create_master_context(&self) -> Option<Box<dyn MasterContext>> {
        Some(Box::new(ConvergenceMaster {
            threshold: self.threshold,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_stops_below_threshold() {
        let mut master = ConvergenceMaster { threshold: 0.01 };
        let mut aggs =
            Aggregators::from_declarations(&[(CONVERGENCE.to_string(), AggregatorKind::Max)]);
        assert!(master.post_global_superstep(0, &aggs));

        aggs.aggregate(CONVERGENCE, AggregatorValue::Float(0.5)).unwrap();
        assert!(master.post_global_superstep(3, &aggs));

        let mut small = aggs.empty_like();
        small.aggregate(CONVERGENCE, AggregatorValue::Float(0.001)).unwrap();
        assert!(!master.post_global_superstep(4, &small));
    }
}
