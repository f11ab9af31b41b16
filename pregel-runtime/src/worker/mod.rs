//! One worker of one execution: owns the local partition and the incoming
//! caches and runs a job per superstep on the conductor's command.

pub mod context;
pub mod job;
pub mod state;

use crate::distributed::protocol::{
    CompensateStep, CompensationSummary, FinalizeExecution, FinalizeResponse, LocalSummary,
    MessageBatch, PrepareGss, PrepareResponse, StartGss, StartRecovery, WorkerRequest,
    WorkerResponse,
};
use crate::distributed::transport::Transport;
use crate::graph::results::ResultWriter;
use crate::graph::store::GraphStore;
use crate::messaging::new_outgoing_cache;
use context::{WorkerConfig, WorkerContext};
use futures::future::BoxFuture;
use futures::FutureExt;
use job::{JobMode, JobOutput, WorkerJob};
use pregel_api::aggregator::Aggregators;
use pregel_api::{Algorithm, MessageValue};
use pregel_common::error::{PregelError, PregelResult};
use pregel_common::types::{ExecutionNumber, GlobalSuperstep, WorkerId};
use state::{WorkerEvent, WorkerState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Object-safe face of a [`Worker`], used by the job mapping and transports.
pub trait WorkerHandle: Send + Sync {
    fn execution_number(&self) -> ExecutionNumber;

    fn worker_id(&self) -> &WorkerId;

    fn state(&self) -> WorkerState;

    /// Deposits a remote batch into the write cache. Safe during COMPUTING.
    fn received_messages(&self, batch: MessageBatch) -> PregelResult<()>;

    fn handle(
        self: Arc<Self>,
        request: WorkerRequest,
    ) -> BoxFuture<'static, PregelResult<WorkerResponse>>;
}

pub struct Worker<V, E, M> {
    config: Arc<WorkerConfig>,
    algorithm: Arc<dyn Algorithm<V, E, M>>,
    context: WorkerContext<M>,
    state: Mutex<WorkerState>,
    store: Arc<tokio::sync::Mutex<Box<dyn GraphStore<V, E>>>>,
    transport: Arc<dyn Transport>,
    results: tokio::sync::Mutex<Box<dyn ResultWriter<V>>>,
    interrupt: Arc<AtomicBool>,
    declared: Aggregators,
    completed_gss: Mutex<Option<GlobalSuperstep>>,
}

impl<V, E, M> Worker<V, E, M>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
    M: MessageValue,
{
    pub fn new(
        config: Arc<WorkerConfig>,
        algorithm: Arc<dyn Algorithm<V, E, M>>,
        store: Box<dyn GraphStore<V, E>>,
        transport: Arc<dyn Transport>,
        results: Box<dyn ResultWriter<V>>,
    ) -> PregelResult<Self> {
        if let Some(stray) = store
            .vertex_iterator()
            .find(|e| !config.local_vertex_shards.contains(&e.id.shard))
        {
            return Err(PregelError::Config(format!(
                "vertex {} is not on a shard owned by {}",
                stray.id, config.worker_id
            )));
        }
        let context = WorkerContext::new(config.clone(), algorithm.combiner());
        let declared = Aggregators::from_declarations(&algorithm.aggregators());
        let state = WorkerState::Default.transition(WorkerEvent::Registered)?;
        info!(
            execution = %config.execution,
            worker = %config.worker_id,
            algorithm = algorithm.name(),
            vertices = store.vertex_count(),
            edges = store.edge_count(),
            "worker registered"
        );
        Ok(Self {
            config,
            algorithm,
            context,
            state: Mutex::new(state),
            store: Arc::new(tokio::sync::Mutex::new(store)),
            transport,
            results: tokio::sync::Mutex::new(results),
            interrupt: Arc::new(AtomicBool::new(false)),
            declared,
            completed_gss: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Arc<WorkerConfig> {
        &self.config
    }

    pub fn current_state(&self) -> WorkerState {
        *lock(&self.state)
    }

    pub fn global_superstep(&self) -> GlobalSuperstep {
        self.context.global_superstep()
    }

    pub async fn prepare_global_step(&self, msg: PrepareGss) -> PregelResult<PrepareResponse> {
        self.check_execution(msg.execution)?;
        let expected = lock(&self.completed_gss).map_or(0, |g| g + 1);
        if msg.gss != expected {
            return Err(PregelError::SuperstepMismatch {
                expected,
                actual: msg.gss,
            });
        }
        self.apply(WorkerEvent::PrepareGlobalStep)?;
        if msg.gss > 0 {
            self.context.swap_incoming_caches();
        }
        self.context.set_global_superstep(msg.gss);
        self.interrupt.store(false, Ordering::SeqCst);

        let store = self.store.lock().await;
        Ok(PrepareResponse {
            sender: self.config.worker_id.clone(),
            gss: msg.gss,
            active_count: store.active_count() as u64,
            vertex_count: store.vertex_count() as u64,
            edge_count: store.edge_count() as u64,
            pending_messages: self.context.read_cache().pending_vertices(),
        })
    }

    pub async fn start_global_step(&self, msg: StartGss) -> PregelResult<LocalSummary> {
        self.check_execution(msg.execution)?;
        self.check_superstep(msg.gss)?;
        self.apply(WorkerEvent::StartGlobalStep)?;

        let started = Instant::now();
        let output = self
            .run_job(JobMode::Compute, msg.gss, msg.aggregators)
            .await?;
        if output.interrupted {
            return Err(PregelError::Cancelled(self.config.execution.0));
        }
        let received_count = self.context.write_cache().received_count();
        self.finish(WorkerEvent::JobFinished, msg.gss)?;

        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        metrics::counter!("pregel_worker_vertices_computed_total")
            .increment(output.computed_count);
        metrics::counter!("pregel_worker_messages_sent_total").increment(output.send_count);
        metrics::histogram!("pregel_worker_superstep_duration_ms").record(elapsed);
        debug!(
            execution = %self.config.execution,
            worker = %self.config.worker_id,
            gss = msg.gss,
            computed = output.computed_count,
            active = output.active_count,
            sent = output.send_count,
            received = received_count,
            elapsed_ms = elapsed,
            "superstep finished"
        );

        Ok(LocalSummary {
            sender: self.config.worker_id.clone(),
            gss: msg.gss,
            active_count: output.active_count,
            computed_count: output.computed_count,
            send_count: output.send_count,
            received_count,
            aggregators: output.aggregators,
        })
    }

    /// Idempotent; a worker that is already DONE stays DONE.
    pub fn cancel_global_step(&self) -> PregelResult<()> {
        self.interrupt.store(true, Ordering::SeqCst);
        {
            let mut state = lock(&self.state);
            if state.is_terminal() {
                return Ok(());
            }
            *state = state.transition(WorkerEvent::Cancel)?;
        }
        self.context.clear_all();
        info!(
            execution = %self.config.execution,
            worker = %self.config.worker_id,
            "worker cancelled"
        );
        Ok(())
    }

    pub fn receive_batch(&self, batch: MessageBatch) -> PregelResult<()> {
        if self.current_state().is_terminal() {
            return Err(PregelError::IllegalTransition {
                from: WorkerState::Done.to_string(),
                event: "ReceivedMessages".to_string(),
            });
        }
        self.check_execution(batch.execution)?;
        self.check_superstep(batch.gss)?;
        if !self.config.is_local_vertex_shard(&batch.shard)? {
            return Err(PregelError::UnknownShard(format!(
                "{} is not owned by {}",
                batch.shard, self.config.worker_id
            )));
        }
        self.context
            .write_cache_for(batch.epoch)?
            .parse_messages(&batch)
    }

    pub async fn finalize_execution(&self, msg: FinalizeExecution) -> PregelResult<FinalizeResponse> {
        self.check_execution(msg.execution)?;
        self.apply(WorkerEvent::Finalize)?;

        let mut written = 0u64;
        if msg.store_results && self.config.params.store_results {
            let store = self.store.lock().await;
            let mut results = self.results.lock().await;
            for entry in store.vertex_iterator() {
                results.write_vertex(&entry.id, store.vertex_data(entry))?;
                written += 1;
            }
            results.finish()?;
        }
        self.context.clear_all();
        info!(
            execution = %self.config.execution,
            worker = %self.config.worker_id,
            written,
            "worker finalized"
        );
        Ok(FinalizeResponse {
            sender: self.config.worker_id.clone(),
            vertices_written: written,
        })
    }

    /// Stops the running job, drops every buffered message and reactivates
    /// all local vertices.
    pub async fn start_recovery(&self, msg: StartRecovery) -> PregelResult<()> {
        self.check_execution(msg.execution)?;
        self.interrupt.store(true, Ordering::SeqCst);
        self.apply(WorkerEvent::StartRecovery)?;

        // waits for an in-flight job to release the partition
        let mut store = self.store.lock().await;
        for index in 0..store.vertex_count() {
            store.set_active(index, true);
        }
        drop(store);

        self.context.begin_epoch(msg.epoch);
        self.context.set_global_superstep(msg.gss);
        warn!(
            execution = %self.config.execution,
            worker = %self.config.worker_id,
            gss = msg.gss,
            epoch = msg.epoch,
            "worker entering recovery"
        );
        Ok(())
    }

    pub async fn compensate_step(&self, msg: CompensateStep) -> PregelResult<CompensationSummary> {
        self.check_execution(msg.execution)?;
        self.check_superstep(msg.gss)?;
        let state = self.current_state();
        if state != WorkerState::Recovering {
            return Err(PregelError::IllegalTransition {
                from: state.to_string(),
                event: "CompensateStep".to_string(),
            });
        }
        if !self.algorithm.supports_compensation() {
            return Err(PregelError::Algorithm(format!(
                "{} does not support compensation",
                self.algorithm.name()
            )));
        }
        self.interrupt.store(false, Ordering::SeqCst);

        let output = self
            .run_job(JobMode::Compensate, msg.gss, msg.aggregators)
            .await?;
        if output.interrupted {
            return Err(PregelError::Cancelled(self.config.execution.0));
        }
        self.finish(WorkerEvent::Compensated, msg.gss)?;
        info!(
            execution = %self.config.execution,
            worker = %self.config.worker_id,
            gss = msg.gss,
            compensated = output.computed_count,
            "worker compensated"
        );
        Ok(CompensationSummary {
            sender: self.config.worker_id.clone(),
            gss: msg.gss,
            active_count: output.active_count,
            send_count: output.send_count,
            aggregators: output.aggregators,
        })
    }

    /// Runs one job on the blocking pool and waits until every batch it
    /// produced was acknowledged.
    async fn run_job(
        &self,
        mode: JobMode,
        gss: GlobalSuperstep,
        global: Aggregators,
    ) -> PregelResult<JobOutput> {
        let combiner = self.algorithm.combiner();
        let job = WorkerJob {
            mode,
            gss,
            computation: self.algorithm.create_computation(gss),
            read_cache: match mode {
                JobMode::Compute => Some(self.context.read_cache()),
                JobMode::Compensate => None,
            },
            out_cache: new_outgoing_cache(
                self.config.clone(),
                self.context.write_cache(),
                self.transport.clone(),
                gss,
                self.context.epoch(),
                combiner,
            ),
            interrupt: self.interrupt.clone(),
            local_aggregators: self.declared.empty_like(),
            global_aggregators: Arc::new(global),
        };

        let mut store = self.store.clone().lock_owned().await;
        let mut output = tokio::task::spawn_blocking(move || job.run(&mut **store))
            .await
            .map_err(|e| PregelError::Internal(format!("worker job panicked: {e}")))??;

        let deliveries = std::mem::take(&mut output.deliveries);
        futures::future::try_join_all(deliveries).await?;
        Ok(output)
    }

    fn finish(&self, event: WorkerEvent, gss: GlobalSuperstep) -> PregelResult<()> {
        {
            let mut state = lock(&self.state);
            if state.is_terminal() {
                return Err(PregelError::Cancelled(self.config.execution.0));
            }
            *state = state.transition(event)?;
        }
        *lock(&self.completed_gss) = Some(gss);
        Ok(())
    }

    fn apply(&self, event: WorkerEvent) -> PregelResult<WorkerState> {
        let mut state = lock(&self.state);
        let next = state.transition(event)?;
        debug!(
            execution = %self.config.execution,
            worker = %self.config.worker_id,
            from = %*state,
            to = %next,
            "worker transition"
        );
        *state = next;
        Ok(next)
    }

    fn check_execution(&self, execution: ExecutionNumber) -> PregelResult<()> {
        if execution != self.config.execution {
            return Err(PregelError::InvalidArgument(format!(
                "request for execution {execution} reached worker of execution {}",
                self.config.execution
            )));
        }
        Ok(())
    }

    fn check_superstep(&self, gss: GlobalSuperstep) -> PregelResult<()> {
        let current = self.context.global_superstep();
        if gss != current {
            return Err(PregelError::SuperstepMismatch {
                expected: current,
                actual: gss,
            });
        }
        Ok(())
    }
}

impl<V, E, M> WorkerHandle for Worker<V, E, M>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
    M: MessageValue,
{
    fn execution_number(&self) -> ExecutionNumber {
        self.config.execution
    }

    fn worker_id(&self) -> &WorkerId {
        &self.config.worker_id
    }

    fn state(&self) -> WorkerState {
        self.current_state()
    }

    fn received_messages(&self, batch: MessageBatch) -> PregelResult<()> {
        self.receive_batch(batch)
    }

    fn handle(
        self: Arc<Self>,
        request: WorkerRequest,
    ) -> BoxFuture<'static, PregelResult<WorkerResponse>> {
        async move {
            match request {
                WorkerRequest::PrepareGlobalStep(msg) => {
                    Ok(WorkerResponse::Prepared(self.prepare_global_step(msg).await?))
                }
                WorkerRequest::StartGlobalStep(msg) => {
                    Ok(WorkerResponse::Finished(self.start_global_step(msg).await?))
                }
                WorkerRequest::CancelGlobalStep { execution } => {
                    self.check_execution(execution)?;
                    self.cancel_global_step()?;
                    Ok(WorkerResponse::Ack)
                }
                WorkerRequest::ReceivedMessages(batch) => {
                    self.receive_batch(batch)?;
                    Ok(WorkerResponse::Ack)
                }
                WorkerRequest::FinalizeExecution(msg) => {
                    Ok(WorkerResponse::Finalized(self.finalize_execution(msg).await?))
                }
                WorkerRequest::StartRecovery(msg) => {
                    self.start_recovery(msg).await?;
                    Ok(WorkerResponse::Ack)
                }
                WorkerRequest::CompensateStep(msg) => {
                    Ok(WorkerResponse::Compensated(self.compensate_step(msg).await?))
                }
                other => Err(PregelError::InvalidArgument(format!(
                    "{} is not a worker request",
                    other.name()
                ))),
            }
        }
        .boxed()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
