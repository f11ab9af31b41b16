//! Built-in algorithms, selectable by name when an execution is submitted
//! over the wire.

pub mod pagerank;
pub mod sssp;
pub mod wcc;

use crate::conductor::ConductorSetup;
use crate::distributed::transport::Transport;
use crate::graph::mem_store::InMemoryGraphStore;
use crate::graph::results::ResultSink;
use crate::graph::{GraphInput, GraphPartition};
use crate::worker::context::WorkerConfig;
use crate::worker::{Worker, WorkerHandle};
use pregel_api::{Algorithm, MessageValue};
use pregel_common::config::Configuration;
use pregel_common::error::{PregelError, PregelResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use pagerank::PageRank;
pub use sssp::ShortestPaths;
pub use wcc::ConnectedComponents;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlgorithmSpec {
    PageRank { damping: f64, threshold: f64 },
    Sssp { source: String },
    Wcc,
}

impl AlgorithmSpec {
    /// `pagerank.damping`, `pagerank.threshold` and `sssp.source` are read
    /// from `params`.
    pub fn parse(name: &str, params: &Configuration) -> PregelResult<Self> {
        match name {
            "pagerank" => {
                let defaults = PageRank::default();
                Ok(AlgorithmSpec::PageRank {
                    damping: params.get_f64("pagerank.damping", defaults.damping)?,
                    threshold: params.get_f64("pagerank.threshold", defaults.threshold)?,
                })
            }
            "sssp" => {
                let source = params.get("sssp.source").cloned().ok_or_else(|| {
                    PregelError::Config("sssp needs sssp.source".to_string())
                })?;
                Ok(AlgorithmSpec::Sssp { source })
            }
            "wcc" => Ok(AlgorithmSpec::Wcc),
            other => Err(PregelError::InvalidArgument(format!(
                "unknown algorithm: {other}"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmSpec::PageRank { .. } => "pagerank",
            AlgorithmSpec::Sssp { .. } => "sssp",
            AlgorithmSpec::Wcc => "wcc",
        }
    }

    /// Shapes an edge list the way the algorithm expects to read it.
    pub fn prepare_input(&self, input: GraphInput<(), u64>) -> GraphInput<(), u64> {
        match self {
            AlgorithmSpec::Wcc => input.with_reverse_edges(),
            _ => input,
        }
    }

    pub fn conductor_setup(&self) -> ConductorSetup {
        match self {
            AlgorithmSpec::PageRank { damping, threshold } => {
                ConductorSetup::from_algorithm::<f64, (), f64, _>(&PageRank::new(
                    *damping, *threshold,
                ))
            }
            AlgorithmSpec::Sssp { source } => {
                ConductorSetup::from_algorithm::<u64, u64, u64, _>(&ShortestPaths::new(
                    source.clone(),
                ))
            }
            AlgorithmSpec::Wcc => ConductorSetup::from_algorithm::<String, (), String, _>(
                &ConnectedComponents,
            ),
        }
    }

    /// Seeds vertex state for the algorithm. The worker is not registered.
    pub fn build_worker(
        &self,
        config: Arc<WorkerConfig>,
        partition: GraphPartition<(), u64>,
        transport: Arc<dyn Transport>,
        sink: &ResultSink,
    ) -> PregelResult<Arc<dyn WorkerHandle>> {
        match self {
            AlgorithmSpec::PageRank { damping, threshold } => spawn_worker::<f64, (), f64>(
                Arc::new(PageRank::new(*damping, *threshold)),
                config,
                partition.map(|_, _| 1.0, |_| ()),
                transport,
                sink,
            ),
            AlgorithmSpec::Sssp { source } => spawn_worker::<u64, u64, u64>(
                Arc::new(ShortestPaths::new(source.clone())),
                config,
                partition.map(|_, _| sssp::UNREACHED, |w| w),
                transport,
                sink,
            ),
            AlgorithmSpec::Wcc => spawn_worker::<String, (), String>(
                Arc::new(ConnectedComponents),
                config,
                partition.map(|id, _| id.key.clone(), |_| ()),
                transport,
                sink,
            ),
        }
    }
}

fn spawn_worker<V, E, M>(
    algorithm: Arc<dyn Algorithm<V, E, M>>,
    config: Arc<WorkerConfig>,
    partition: GraphPartition<V, E>,
    transport: Arc<dyn Transport>,
    sink: &ResultSink,
) -> PregelResult<Arc<dyn WorkerHandle>>
where
    V: MessageValue,
    E: Send + Sync + 'static,
    M: MessageValue,
{
    let store = InMemoryGraphStore::from_partition(partition)?;
    let worker = Worker::new(
        config,
        algorithm,
        Box::new(store),
        transport,
        sink.writer::<V>()?,
    )?;
    Ok(Arc::new(worker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_parameters() {
        let params = Configuration::new()
            .with("pagerank.damping", 0.5)
            .with("sssp.source", "v7");
        assert_eq!(
            AlgorithmSpec::parse("pagerank", &params).unwrap(),
            AlgorithmSpec::PageRank {
                damping: 0.5,
                threshold: 1e-4
            }
        );
        assert_eq!(
            AlgorithmSpec::parse("sssp", &params).unwrap(),
            AlgorithmSpec::Sssp {
                source: "v7".to_string()
            }
        );
        assert!(AlgorithmSpec::parse("sssp", &Configuration::new())
            .unwrap_err()
            .is_configuration());
        assert!(AlgorithmSpec::parse("bfs", &params).is_err());
    }

    #[test]
    fn wcc_input_is_symmetric() {
        let input = GraphInput::from_edges(vec![("a".to_string(), "b".to_string(), 1)]);
        let prepared = AlgorithmSpec::Wcc.prepare_input(input);
        assert_eq!(prepared.edges.len(), 2);
    }
}
