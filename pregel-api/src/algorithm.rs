use crate::aggregator::{AggregatorKind, Aggregators};
use crate::combiner::Combiner;
use crate::computation::VertexComputation;
use pregel_common::error::PregelResult;
use pregel_common::types::GlobalSuperstep;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Vertex, edge and message payloads travel as serde values.
pub trait MessageValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
impl<T> MessageValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Stateless description of a graph algorithm.
pub trait Algorithm<V, E, M>: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn create_computation(&self, gss: GlobalSuperstep) -> Box<dyn VertexComputation<V, E, M>>;

    fn combiner(&self) -> Option<Arc<dyn Combiner<M>>> {
        None
    }

    fn aggregators(&self) -> Vec<(String, AggregatorKind)> {
        Vec::new()
    }

    fn supports_compensation(&self) -> bool {
        false
    }

    fn create_master_context(&self) -> Option<Box<dyn MasterContext>> {
        None
    }
}

/// Conductor-side hooks around every global superstep.
pub trait MasterContext: Send {
    fn pre_global_superstep(
        &mut self,
        _gss: GlobalSuperstep,
        _aggregators: &mut Aggregators,
    ) -> PregelResult<()> {
        Ok(())
    }

    /// Returning `false` finishes the execution after `gss`.
    fn post_global_superstep(&mut self, _gss: GlobalSuperstep, _aggregators: &Aggregators) -> bool {
        true
    }
}
