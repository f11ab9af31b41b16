use pregel_api::aggregator::{AggregatorKind, AggregatorValue, Aggregators};
use pregel_api::{
    Algorithm, Combiner, MasterContext, SumCombiner, VertexComputation, VertexContext,
};
use pregel_common::config::Configuration;
use pregel_common::error::PregelResult;
use pregel_common::types::GlobalSuperstep;
use pregel_runtime::cluster::LocalCluster;
use pregel_runtime::conductor::ExecutionState;
use pregel_runtime::graph::results::{CollectingResultWriter, ResultWriter};
use pregel_runtime::graph::GraphInput;
use std::sync::Arc;

const HUB: &str = "hub";

/// Every spoke sends 1 to the hub, which records (sum, messages seen).
struct FanIn {
    combine: bool,
}

struct FanInComputation;

impl VertexComputation<(u64, u64), (), u64> for FanInComputation {
    fn compute(
        &mut self,
        messages: &mut dyn Iterator<Item = u64>,
        context: &mut dyn VertexContext<(u64, u64), (), u64>,
    ) -> PregelResult<()> {
        if context.global_superstep() == 0 {
            context.send_message_to_all_neighbours(1)?;
        } else {
            let (sum, seen) = messages.fold((0, 0), |(s, n), m| (s + m, n + 1));
            context.set_vertex_data((sum, seen));
        }
        context.vote_halt();
        Ok(())
    }
}

impl Algorithm<(u64, u64), (), u64> for FanIn {
    fn name(&self) -> &str {
        "fan-in"
    }

    fn create_computation(
        &self,
        _gss: GlobalSuperstep,
    ) -> Box<dyn VertexComputation<(u64, u64), (), u64>> {
        Box::new(FanInComputation)
    }

    fn combiner(&self) -> Option<Arc<dyn Combiner<u64>>> {
        if self.combine {
            Some(Arc::new(SumCombiner))
        } else {
            None
        }
    }
}

async fn run_fan_in(combine: bool) -> (u64, u64) {
    let cluster = LocalCluster::new(3, 2, Configuration::new()).unwrap();
    let mut vertices: Vec<(String, (u64, u64))> =
        (0..10).map(|i| (format!("s{i}"), (0, 0))).collect();
    vertices.push((HUB.to_string(), (0, 0)));
    let edges = (0..10)
        .map(|i| (format!("s{i}"), HUB.to_string(), ()))
        .collect();
    let sink = CollectingResultWriter::new();
    let algorithm: Arc<dyn Algorithm<(u64, u64), (), u64>> = Arc::new(FanIn { combine });

    let outcome = cluster
        .run(algorithm, GraphInput::new(vertices, edges), |_| {
            Box::new(sink.clone()) as Box<dyn ResultWriter<(u64, u64)>>
        })
        .await
        .unwrap();
    assert_eq!(outcome.state, ExecutionState::Done);

    sink.rows()
        .into_iter()
        .find(|(id, _)| id.key == HUB)
        .map(|(_, value)| value)
        .unwrap()
}

#[tokio::test]
async fn test_combiner_folds_fan_in_to_one_message() {
    assert_eq!(run_fan_in(true).await, (10, 1));
}

#[tokio::test]
async fn test_without_combiner_every_message_arrives() {
    assert_eq!(run_fan_in(false).await, (10, 10));
}

/// Counts vertices with a sum aggregator, then reads the total back.
struct CountVertices;

struct CountVerticesComputation;

impl VertexComputation<i64, (), u64> for CountVerticesComputation {
    fn compute(
        &mut self,
        _messages: &mut dyn Iterator<Item = u64>,
        context: &mut dyn VertexContext<i64, (), u64>,
    ) -> PregelResult<()> {
        if context.global_superstep() == 0 {
            context.aggregate("vertices", AggregatorValue::Int(1))?;
        } else {
            let total = context
                .aggregated_value("vertices")
                .and_then(|v| v.as_i64())
                .unwrap_or(-1);
            context.set_vertex_data(total);
            context.vote_halt();
        }
        Ok(())
    }
}

impl Algorithm<i64, (), u64> for CountVertices {
    fn name(&self) -> &str {
        "count-vertices"
    }

    fn create_computation(&self, _gss: GlobalSuperstep) -> Box<dyn VertexComputation<i64, (), u64>> {
        Box::new(CountVerticesComputation)
    }

    fn aggregators(&self) -> Vec<(String, AggregatorKind)> {
        vec![("vertices".to_string(), AggregatorKind::Sum)]
    }
}

#[tokio::test]
async fn test_aggregator_merges_across_workers_at_the_barrier() {
    let cluster = LocalCluster::new(3, 2, Configuration::new()).unwrap();
    let input: GraphInput<i64, ()> =
        GraphInput::new((0..7).map(|i| (format!("v{i}"), 0)).collect(), Vec::new());
    let sink = CollectingResultWriter::new();
    let algorithm: Arc<dyn Algorithm<i64, (), u64>> = Arc::new(CountVertices);

    let outcome = cluster
        .run(algorithm, input, |_| {
            Box::new(sink.clone()) as Box<dyn ResultWriter<i64>>
        })
        .await
        .unwrap();

    assert_eq!(outcome.state, ExecutionState::Done);
    let rows = sink.rows();
    assert_eq!(rows.len(), 7);
    assert!(rows.iter().all(|(_, total)| *total == 7i64));
}

/// Publishes a per-superstep budget and stops after superstep 2.
struct BudgetMaster;

impl MasterContext for BudgetMaster {
    fn pre_global_superstep(
        &mut self,
        gss: GlobalSuperstep,
        aggregators: &mut Aggregators,
    ) -> PregelResult<()> {
        aggregators.aggregate("budget", AggregatorValue::Int(gss as i64 * 10))
    }

    fn post_global_superstep(&mut self, gss: GlobalSuperstep, _aggregators: &Aggregators) -> bool {
        gss < 2
    }
}

struct Budgeted;

struct BudgetedComputation;

impl VertexComputation<i64, (), u64> for BudgetedComputation {
    fn compute(
        &mut self,
        _messages: &mut dyn Iterator<Item = u64>,
        context: &mut dyn VertexContext<i64, (), u64>,
    ) -> PregelResult<()> {
        if let Some(budget) = context.aggregated_value("budget").and_then(|v| v.as_i64()) {
            context.set_vertex_data(budget);
        }
        Ok(())
    }
}

impl Algorithm<i64, (), u64> for Budgeted {
    fn name(&self) -> &str {
        "budgeted"
    }

    fn create_computation(&self, _gss: GlobalSuperstep) -> Box<dyn VertexComputation<i64, (), u64>> {
        Box::new(BudgetedComputation)
    }

    fn aggregators(&self) -> Vec<(String, AggregatorKind)> {
        vec![("budget".to_string(), AggregatorKind::Overwrite)]
    }

    fn create_master_context(&self) -> Option<Box<dyn MasterContext>> {
        Some(Box::new(BudgetMaster))
    }
}

#[tokio::test]
async fn test_master_context_publishes_values_and_stops_execution() {
    let cluster = LocalCluster::new(2, 2, Configuration::new()).unwrap();
    let input: GraphInput<i64, ()> =
        GraphInput::new((0..4).map(|i| (format!("v{i}"), -1)).collect(), Vec::new());
    let sink = CollectingResultWriter::new();
    let algorithm: Arc<dyn Algorithm<i64, (), u64>> = Arc::new(Budgeted);

    let outcome = cluster
        .run(algorithm, input, |_| {
            Box::new(sink.clone()) as Box<dyn ResultWriter<i64>>
        })
        .await
        .unwrap();

    assert_eq!(outcome.state, ExecutionState::Done);
    assert_eq!(outcome.stats.supersteps, 3);
    assert!(sink.rows().iter().all(|(_, budget)| *budget == 20i64));
}
