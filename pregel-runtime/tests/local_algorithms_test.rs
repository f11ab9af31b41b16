use pregel_api::{Algorithm, VertexComputation, VertexContext};
use pregel_common::config::Configuration;
use pregel_common::error::PregelResult;
use pregel_common::types::GlobalSuperstep;
use pregel_runtime::algorithms::sssp::UNREACHED;
use pregel_runtime::algorithms::{ConnectedComponents, PageRank, ShortestPaths};
use pregel_runtime::cluster::LocalCluster;
use pregel_runtime::conductor::ExecutionState;
use pregel_runtime::graph::results::{CollectingResultWriter, ResultWriter};
use pregel_runtime::graph::GraphInput;
use std::collections::BTreeMap;
use std::sync::Arc;

fn by_key<V: Clone>(sink: &CollectingResultWriter<V>) -> BTreeMap<String, V> {
    sink.rows()
        .into_iter()
        .map(|(id, value)| (id.key, value))
        .collect()
}

fn edge<E>(src: &str, target: &str, data: E) -> (String, String, E) {
    (src.to_string(), target.to_string(), data)
}

#[tokio::test]
async fn test_local_sssp_exact_distances() {
    let cluster = LocalCluster::new(3, 2, Configuration::new()).unwrap();
    let input = GraphInput::new(
        ["a", "b", "c", "d", "e"]
            .iter()
            .map(|k| (k.to_string(), UNREACHED))
            .collect(),
        vec![
            edge("a", "b", 4u64),
            edge("a", "c", 1),
            edge("c", "b", 2),
            edge("b", "d", 1),
            edge("c", "d", 5),
        ],
    );
    let sink = CollectingResultWriter::new();
    let algorithm: Arc<dyn Algorithm<u64, u64, u64>> = Arc::new(ShortestPaths::new("a"));

    let outcome = cluster
        .run(algorithm, input, |_| {
            Box::new(sink.clone()) as Box<dyn ResultWriter<u64>>
        })
        .await
        .unwrap();

    assert_eq!(outcome.state, ExecutionState::Done);
    assert_eq!(outcome.vertices_written, 5);
    let distances = by_key(&sink);
    assert_eq!(distances["a"], 0u64);
    assert_eq!(distances["c"], 1u64);
    assert_eq!(distances["b"], 3u64);
    assert_eq!(distances["d"], 4u64);
    assert_eq!(distances["e"], UNREACHED);
}

#[tokio::test]
async fn test_local_wcc_labels_components_by_smallest_key() {
    let cluster = LocalCluster::new(2, 3, Configuration::new()).unwrap();
    let input = GraphInput::new(
        ["a", "b", "c", "x", "y", "z"]
            .iter()
            .map(|k| (k.to_string(), k.to_string()))
            .collect(),
        vec![edge("c", "b", ()), edge("b", "a", ()), edge("z", "y", ()), edge("y", "x", ())],
    )
    .with_reverse_edges();
    let sink = CollectingResultWriter::new();
    let algorithm: Arc<dyn Algorithm<String, (), String>> = Arc::new(ConnectedComponents);

    let outcome = cluster
        .run(algorithm, input, |_| {
            Box::new(sink.clone()) as Box<dyn ResultWriter<String>>
        })
        .await
        .unwrap();

    assert_eq!(outcome.state, ExecutionState::Done);
    let labels = by_key(&sink);
    assert_eq!(labels.len(), 6);
    for key in ["a", "b", "c"] {
        assert_eq!(labels[key], "a");
    }
    for key in ["x", "y", "z"] {
        assert_eq!(labels[key], "x");
    }
}

#[tokio::test]
async fn test_local_pagerank_on_cycle_converges_to_uniform_rank() {
    let cluster = LocalCluster::new(3, 1, Configuration::new()).unwrap();
    let input = GraphInput::new(
        ["p", "q", "r"].iter().map(|k| (k.to_string(), 1.0)).collect(),
        vec![edge("p", "q", ()), edge("q", "r", ()), edge("r", "p", ())],
    );
    let sink = CollectingResultWriter::new();
    let algorithm: Arc<dyn Algorithm<f64, (), f64>> = Arc::new(PageRank::default());

    let outcome = cluster
        .run(algorithm, input, |_| {
            Box::new(sink.clone()) as Box<dyn ResultWriter<f64>>
        })
        .await
        .unwrap();

    assert_eq!(outcome.state, ExecutionState::Done);
    assert!(outcome.stats.supersteps <= 3);
    for (key, rank) in by_key::<f64>(&sink) {
        assert!((rank - 1.0).abs() < 1e-9, "rank of {key} is {rank}");
    }
}

/// Every vertex counts its own invocations and relays once along its edges.
struct Relay;

struct RelayComputation;

impl VertexComputation<u64, (), u64> for RelayComputation {
    fn compute(
        &mut self,
        messages: &mut dyn Iterator<Item = u64>,
        context: &mut dyn VertexContext<u64, (), u64>,
    ) -> PregelResult<()> {
        *context.vertex_data_mut() += 1;
        let woken = messages.count() > 0;
        if context.vertex_id().key == "v0" || woken {
            context.send_message_to_all_neighbours(1)?;
        }
        context.vote_halt();
        Ok(())
    }
}

impl Algorithm<u64, (), u64> for Relay {
    fn name(&self) -> &str {
        "relay"
    }

    fn create_computation(&self, _gss: GlobalSuperstep) -> Box<dyn VertexComputation<u64, (), u64>> {
        Box::new(RelayComputation)
    }
}

#[tokio::test]
async fn test_halted_vertices_only_wake_on_messages() {
    let cluster = LocalCluster::new(2, 2, Configuration::new()).unwrap();
    let input = GraphInput::new(
        (0..4).map(|i| (format!("v{i}"), 0u64)).collect(),
        vec![edge("v0", "v1", ()), edge("v1", "v2", ()), edge("v2", "v3", ())],
    );
    let sink = CollectingResultWriter::new();
    let algorithm: Arc<dyn Algorithm<u64, (), u64>> = Arc::new(Relay);

    let outcome = cluster
        .run(algorithm, input, |_| {
            Box::new(sink.clone()) as Box<dyn ResultWriter<u64>>
        })
        .await
        .unwrap();

    assert_eq!(outcome.state, ExecutionState::Done);
    // v3 receives at superstep 3 and sends nothing, so that is the last one
    assert_eq!(outcome.gss, Some(3));
    assert_eq!(outcome.stats.supersteps, 4);
    let counts = by_key(&sink);
    assert_eq!(counts["v0"], 1u64);
    assert_eq!(counts["v1"], 2u64);
    assert_eq!(counts["v2"], 2u64);
    assert_eq!(counts["v3"], 2u64);
}

/// Keeps every vertex active forever.
struct Spin;

struct SpinComputation;

impl VertexComputation<u64, (), u64> for SpinComputation {
    fn compute(
        &mut self,
        _messages: &mut dyn Iterator<Item = u64>,
        context: &mut dyn VertexContext<u64, (), u64>,
    ) -> PregelResult<()> {
        *context.vertex_data_mut() += 1;
        Ok(())
    }
}

impl Algorithm<u64, (), u64> for Spin {
    fn name(&self) -> &str {
        "spin"
    }

    fn create_computation(&self, _gss: GlobalSuperstep) -> Box<dyn VertexComputation<u64, (), u64>> {
        Box::new(SpinComputation)
    }
}

#[tokio::test]
async fn test_superstep_limit_finalizes_active_execution() {
    let conf = Configuration::new().with("pregel.max_gss", 5);
    let cluster = LocalCluster::new(2, 1, conf).unwrap();
    let input: GraphInput<u64, ()> =
        GraphInput::new((0..6).map(|i| (format!("v{i}"), 0)).collect(), Vec::new());
    let sink = CollectingResultWriter::new();
    let algorithm: Arc<dyn Algorithm<u64, (), u64>> = Arc::new(Spin);

    let outcome = cluster
        .run(algorithm, input, |_| {
            Box::new(sink.clone()) as Box<dyn ResultWriter<u64>>
        })
        .await
        .unwrap();

    assert_eq!(outcome.state, ExecutionState::Done);
    assert_eq!(outcome.stats.supersteps, 5);
    assert_eq!(outcome.gss, Some(4));
    assert!(by_key(&sink).values().all(|&computed| computed == 5u64));
}

#[tokio::test]
async fn test_results_are_skipped_when_storing_is_disabled() {
    let conf = Configuration::new().with("pregel.store_results", false);
    let cluster = LocalCluster::new(2, 1, conf).unwrap();
    let input: GraphInput<u64, ()> =
        GraphInput::new((0..4).map(|i| (format!("v{i}"), 0)).collect(), Vec::new());
    let sink = CollectingResultWriter::new();
    let algorithm: Arc<dyn Algorithm<u64, (), u64>> = Arc::new(Relay);

    let outcome = cluster
        .run(algorithm, input, |_| {
            Box::new(sink.clone()) as Box<dyn ResultWriter<u64>>
        })
        .await
        .unwrap();

    assert_eq!(outcome.state, ExecutionState::Done);
    assert_eq!(outcome.vertices_written, 0);
    assert!(sink.rows().is_empty());
}

#[tokio::test]
async fn test_released_execution_leaves_no_workers_behind() {
    let cluster = LocalCluster::new(2, 2, Configuration::new()).unwrap();
    let input: GraphInput<u64, ()> =
        GraphInput::new(vec![("only".to_string(), 0)], Vec::new());
    let algorithm: Arc<dyn Algorithm<u64, (), u64>> = Arc::new(Relay);

    cluster
        .run(algorithm, input, |_| {
            Box::new(CollectingResultWriter::<u64>::new()) as Box<dyn ResultWriter<u64>>
        })
        .await
        .unwrap();

    assert!(cluster.coordinator().conductor_executions().is_empty());
    for worker in cluster.worker_ids() {
        assert!(cluster.server(&worker).unwrap().worker_executions().is_empty());
    }
}
