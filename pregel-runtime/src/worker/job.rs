use crate::distributed::transport::Delivery;
use crate::graph::store::{GraphStore, VertexParts};
use crate::messaging::{IncomingCache, OutgoingCache};
use pregel_api::aggregator::{AggregatorValue, Aggregators};
use pregel_api::{VertexComputation, VertexContext};
use pregel_common::error::PregelResult;
use pregel_common::types::{Edge, GlobalSuperstep, VertexId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    Compute,
    Compensate,
}

/// What one pass over the local partition produced.
pub struct JobOutput {
    pub active_count: u64,
    pub vertex_count: u64,
    pub computed_count: u64,
    pub send_count: u64,
    pub aggregators: Aggregators,
    pub deliveries: Vec<Delivery>,
    pub interrupted: bool,
}

/// One superstep (or one compensation pass) over the local vertices.
pub struct WorkerJob<V, E, M> {
    pub mode: JobMode,
    pub gss: GlobalSuperstep,
    pub computation: Box<dyn VertexComputation<V, E, M>>,
    pub read_cache: Option<Arc<dyn IncomingCache<M>>>,
    pub out_cache: Box<dyn OutgoingCache<M>>,
    pub interrupt: Arc<AtomicBool>,
    pub local_aggregators: Aggregators,
    pub global_aggregators: Arc<Aggregators>,
}

impl<V, E, M> WorkerJob<V, E, M> {
    pub fn run(self, store: &mut dyn GraphStore<V, E>) -> PregelResult<JobOutput> {
        let WorkerJob {
            mode,
            gss,
            mut computation,
            read_cache,
            mut out_cache,
            interrupt,
            mut local_aggregators,
            global_aggregators,
        } = self;
        let mut computed = 0u64;
        let mut interrupted = false;

        for index in 0..store.vertex_count() {
            // checked between vertices only, an in-flight compute always finishes
            if interrupt.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }
            let Some(entry) = store.vertex_entry(index) else {
                break;
            };
            let was_active = entry.active;
            let messages = match (&read_cache, mode) {
                (Some(cache), JobMode::Compute) => cache.take_messages(&entry.id),
                _ => Vec::new(),
            };
            if mode == JobMode::Compute && gss > 0 && messages.is_empty() && !was_active {
                continue;
            }
            let Some(vertex) = store.vertex_parts(index) else {
                break;
            };

            // a message wakes a halted vertex for this superstep only
            let mut ctx = JobVertexContext {
                gss,
                vertex,
                out_cache: out_cache.as_mut(),
                local_aggregators: &mut local_aggregators,
                global_aggregators: &global_aggregators,
                active: was_active,
            };
            match mode {
                JobMode::Compute => computation.compute(&mut messages.into_iter(), &mut ctx)?,
                JobMode::Compensate => computation.compensate(&mut ctx)?,
            }
            let active = ctx.active;
            store.set_active(index, active);
            computed += 1;
        }

        out_cache.flush_messages()?;

        Ok(JobOutput {
            active_count: store.active_count() as u64,
            vertex_count: store.vertex_count() as u64,
            computed_count: computed,
            send_count: out_cache.send_count() + out_cache.local_count(),
            aggregators: local_aggregators,
            deliveries: out_cache.take_deliveries(),
            interrupted,
        })
    }
}

struct JobVertexContext<'a, V, E, M> {
    gss: GlobalSuperstep,
    vertex: VertexParts<'a, V, E>,
    out_cache: &'a mut dyn OutgoingCache<M>,
    local_aggregators: &'a mut Aggregators,
    global_aggregators: &'a Aggregators,
    active: bool,
}

impl<V, E, M> VertexContext<V, E, M> for JobVertexContext<'_, V, E, M> {
    fn global_superstep(&self) -> GlobalSuperstep {
        self.gss
    }

    fn vertex_id(&self) -> &VertexId {
        &self.vertex.entry.id
    }

    fn vertex_data(&self) -> &V {
        &*self.vertex.data
    }

    fn vertex_data_mut(&mut self) -> &mut V {
        &mut *self.vertex.data
    }

    fn set_vertex_data(&mut self, value: V) {
        *self.vertex.data = value;
    }

    fn edges(&self) -> Box<dyn Iterator<Item = &Edge<E>> + '_> {
        Box::new(self.vertex.edges.iter())
    }

    fn edge_count(&self) -> usize {
        self.vertex.edges.len()
    }

    fn send_message(&mut self, target: &VertexId, message: M) -> PregelResult<()> {
        self.out_cache.append_message(target, message)
    }

    fn vote_halt(&mut self) {
        self.active = false;
    }

    fn vote_active(&mut self) {
        self.active = true;
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn aggregate(&mut self, name: &str, value: AggregatorValue) -> PregelResult<()> {
        self.local_aggregators.aggregate(name, value)
    }

    fn aggregated_value(&self, name: &str) -> Option<AggregatorValue> {
        self.global_aggregators.value(name)
    }
}
