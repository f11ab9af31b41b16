//! Ways to stand up an execution: every worker in this process, or worker
//! servers reached over TCP.

use crate::algorithms::AlgorithmSpec;
use crate::conductor::{Conductor, ConductorConfig, ConductorSetup, ExecutionOutcome};
use crate::distributed::endpoint::{LocalEndpoint, TcpWorkerEndpoint, WorkerEndpoint};
use crate::distributed::protocol::{LoadExecution, WorkerRequest, WorkerResponse};
use crate::distributed::transport::{LocalTransport, Transport};
use crate::graph::mem_store::InMemoryGraphStore;
use crate::graph::results::{ResultSink, ResultWriter};
use crate::graph::GraphInput;
use crate::job_mapping::JobMapping;
use crate::shuffle::partitioner::ShardLayout;
use crate::worker::context::{WorkerConfig, WorkerParams};
use crate::worker::Worker;
use pregel_api::{Algorithm, MessageValue};
use pregel_common::config::{self, Configuration};
use pregel_common::error::{PregelError, PregelResult};
use pregel_common::types::{ExecutionNumber, WorkerId};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// N workers in one process, each behind its own job mapping as if it were
/// a separate server.
pub struct LocalCluster {
    coordinator: Arc<JobMapping>,
    servers: BTreeMap<WorkerId, Arc<JobMapping>>,
    layout: ShardLayout,
    config: Configuration,
    transport: Arc<LocalTransport>,
}

impl LocalCluster {
    pub fn new(
        worker_count: usize,
        shards_per_worker: usize,
        config: Configuration,
    ) -> PregelResult<Self> {
        let workers: Vec<WorkerId> = (0..worker_count)
            .map(|i| WorkerId::new(format!("w{i}")))
            .collect();
        let layout = ShardLayout::round_robin(&workers, shards_per_worker)?;
        let servers: BTreeMap<WorkerId, Arc<JobMapping>> = workers
            .into_iter()
            .map(|w| (w, Arc::new(JobMapping::new())))
            .collect();
        let routes: HashMap<WorkerId, Arc<JobMapping>> = servers
            .iter()
            .map(|(w, m)| (w.clone(), m.clone()))
            .collect();
        Ok(Self {
            coordinator: Arc::new(JobMapping::new()),
            servers,
            layout,
            config,
            transport: Arc::new(LocalTransport::new(routes)),
        })
    }

    pub fn layout(&self) -> &ShardLayout {
        &self.layout
    }

    pub fn coordinator(&self) -> &Arc<JobMapping> {
        &self.coordinator
    }

    pub fn server(&self, worker: &WorkerId) -> Option<&Arc<JobMapping>> {
        self.servers.get(worker)
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.servers.keys().cloned().collect()
    }

    pub fn submit<V, E, M>(
        &self,
        algorithm: Arc<dyn Algorithm<V, E, M>>,
        input: GraphInput<V, E>,
        results: impl Fn(&WorkerId) -> Box<dyn ResultWriter<V>>,
    ) -> PregelResult<Arc<Conductor>>
    where
        V: Send + Sync + 'static,
        E: Send + Sync + 'static,
        M: MessageValue,
    {
        self.submit_with(algorithm, input, results, |e| {
            Arc::new(e) as Arc<dyn WorkerEndpoint>
        })
    }

    /// Like [`LocalCluster::submit`], with a hook that decides how the
    /// conductor reaches each worker.
    pub fn submit_with<V, E, M>(
        &self,
        algorithm: Arc<dyn Algorithm<V, E, M>>,
        input: GraphInput<V, E>,
        results: impl Fn(&WorkerId) -> Box<dyn ResultWriter<V>>,
        endpoint: impl Fn(LocalEndpoint) -> Arc<dyn WorkerEndpoint>,
    ) -> PregelResult<Arc<Conductor>>
    where
        V: Send + Sync + 'static,
        E: Send + Sync + 'static,
        M: MessageValue,
    {
        let execution = self.coordinator.next_execution_number();
        let params = WorkerParams::from_config(&self.config)?;
        let conductor_config = ConductorConfig::from_config(&self.config)?;
        let mut partitions = input.partition(&self.layout)?;

        let mut endpoints = Vec::with_capacity(self.servers.len());
        let loaded = (|| -> PregelResult<()> {
            for (worker_id, mapping) in &self.servers {
                let partition = partitions.remove(worker_id).unwrap_or_default();
                let store = InMemoryGraphStore::from_partition(partition)?;
                let config = Arc::new(WorkerConfig::new(
                    execution,
                    worker_id.clone(),
                    self.layout.clone(),
                    params.clone(),
                )?);
                let transport: Arc<dyn Transport> = self.transport.clone();
                let worker = Worker::new(
                    config,
                    algorithm.clone(),
                    Box::new(store),
                    transport,
                    results(worker_id),
                )?;
                mapping.add_worker(Arc::new(worker))?;
                endpoints.push(endpoint(LocalEndpoint::new(
                    worker_id.clone(),
                    mapping.clone(),
                )));
            }
            Ok(())
        })();
        if let Err(e) = loaded {
            self.release(execution);
            return Err(e);
        }

        let setup = ConductorSetup::from_algorithm(&*algorithm);
        let conductor = Arc::new(Conductor::new(
            execution,
            endpoints,
            conductor_config,
            setup,
        )?);
        self.coordinator.add_conductor(conductor.clone());
        Ok(conductor)
    }

    /// Submits a built-in algorithm over a plain edge list.
    pub fn submit_spec(
        &self,
        spec: &AlgorithmSpec,
        input: GraphInput<(), u64>,
        sink: impl Fn(ExecutionNumber, &WorkerId) -> ResultSink,
    ) -> PregelResult<Arc<Conductor>> {
        let execution = self.coordinator.next_execution_number();
        let params = WorkerParams::from_config(&self.config)?;
        let conductor_config = ConductorConfig::from_config(&self.config)?;
        let mut partitions = spec.prepare_input(input).partition(&self.layout)?;

        let mut endpoints: Vec<Arc<dyn WorkerEndpoint>> = Vec::new();
        let loaded = (|| -> PregelResult<()> {
            for (worker_id, mapping) in &self.servers {
                let config = Arc::new(WorkerConfig::new(
                    execution,
                    worker_id.clone(),
                    self.layout.clone(),
                    params.clone(),
                )?);
                let worker = spec.build_worker(
                    config,
                    partitions.remove(worker_id).unwrap_or_default(),
                    self.transport.clone(),
                    &sink(execution, worker_id),
                )?;
                mapping.add_worker(worker)?;
                endpoints.push(Arc::new(LocalEndpoint::new(
                    worker_id.clone(),
                    mapping.clone(),
                )));
            }
            Ok(())
        })();
        if let Err(e) = loaded {
            self.release(execution);
            return Err(e);
        }
        let conductor = Arc::new(Conductor::new(
            execution,
            endpoints,
            conductor_config,
            spec.conductor_setup(),
        )?);
        self.coordinator.add_conductor(conductor.clone());
        Ok(conductor)
    }

    pub async fn run<V, E, M>(
        &self,
        algorithm: Arc<dyn Algorithm<V, E, M>>,
        input: GraphInput<V, E>,
        results: impl Fn(&WorkerId) -> Box<dyn ResultWriter<V>>,
    ) -> PregelResult<ExecutionOutcome>
    where
        V: Send + Sync + 'static,
        E: Send + Sync + 'static,
        M: MessageValue,
    {
        let conductor = self.submit(algorithm, input, results)?;
        self.drive(conductor).await
    }

    /// Runs a submitted conductor and drops its bookkeeping afterwards.
    pub async fn drive(&self, conductor: Arc<Conductor>) -> PregelResult<ExecutionOutcome> {
        let outcome = conductor.run().await;
        self.release(conductor.execution());
        outcome
    }

    /// Forgets an execution on the coordinator and every server.
    pub fn release(&self, execution: ExecutionNumber) {
        self.coordinator.remove_conductor(execution);
        for mapping in self.servers.values() {
            mapping.remove_worker(execution);
        }
    }
}

/// Coordinator for worker servers started with `pregel-worker`.
pub struct RemoteCluster {
    workers: Vec<(WorkerId, SocketAddr)>,
    shards_per_worker: usize,
    config: Configuration,
    coordinator: Arc<JobMapping>,
}

impl RemoteCluster {
    pub fn new(addrs: &[SocketAddr], shards_per_worker: usize, config: Configuration) -> Self {
        Self {
            workers: addrs
                .iter()
                .enumerate()
                .map(|(i, addr)| (WorkerId::new(format!("w{i}")), *addr))
                .collect(),
            shards_per_worker,
            config,
            coordinator: Arc::new(JobMapping::new()),
        }
    }

    pub fn coordinator(&self) -> &Arc<JobMapping> {
        &self.coordinator
    }

    fn endpoints(&self) -> PregelResult<Vec<Arc<dyn WorkerEndpoint>>> {
        let attempts = self.config.get_u64(config::TRANSPORT_RETRIES, 3)? as u32;
        Ok(self
            .workers
            .iter()
            .map(|(id, addr)| {
                Arc::new(TcpWorkerEndpoint::new(id.clone(), *addr, attempts))
                    as Arc<dyn WorkerEndpoint>
            })
            .collect())
    }

    /// Ships every worker its partition and returns the conductor, not yet
    /// running.
    pub async fn submit(
        &self,
        spec: &AlgorithmSpec,
        input: GraphInput<(), u64>,
    ) -> PregelResult<Arc<Conductor>> {
        let ids: Vec<WorkerId> = self.workers.iter().map(|(id, _)| id.clone()).collect();
        let layout = ShardLayout::round_robin(&ids, self.shards_per_worker)?;
        let conductor_config = ConductorConfig::from_config(&self.config)?;
        let execution = self.coordinator.next_execution_number();
        let mut partitions = spec.prepare_input(input).partition(&layout)?;
        let peers: Vec<(WorkerId, String)> = self
            .workers
            .iter()
            .map(|(id, addr)| (id.clone(), addr.to_string()))
            .collect();
        let config: Vec<(String, String)> = self
            .config
            .entries()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let endpoints = self.endpoints()?;
        for endpoint in &endpoints {
            let worker_id = endpoint.worker_id().clone();
            let load = LoadExecution {
                execution,
                worker_id: worker_id.clone(),
                layout: layout.clone(),
                algorithm: spec.clone(),
                config: config.clone(),
                peers: peers.clone(),
                partition: partitions.remove(&worker_id).unwrap_or_default(),
            };
            let loaded = match endpoint
                .call(WorkerRequest::LoadExecution(Box::new(load)))
                .await
            {
                Ok(WorkerResponse::Ack) => Ok(()),
                Ok(WorkerResponse::Error { message, .. }) => Err(PregelError::Config(format!(
                    "worker {worker_id} refused execution {execution}: {message}"
                ))),
                Ok(other) => Err(PregelError::Internal(format!(
                    "unexpected load reply from {worker_id}: {other:?}"
                ))),
                Err(e) => Err(e),
            };
            if let Err(e) = loaded {
                warn!(%execution, error = %e, "load failed, releasing workers");
                for ep in &endpoints {
                    let _ = ep
                        .call(WorkerRequest::CancelGlobalStep { execution })
                        .await;
                }
                return Err(e);
            }
        }
        info!(
            %execution,
            algorithm = spec.name(),
            workers = endpoints.len(),
            "execution loaded on all workers"
        );

        let conductor = Arc::new(Conductor::new(
            execution,
            endpoints,
            conductor_config,
            spec.conductor_setup(),
        )?);
        self.coordinator.add_conductor(conductor.clone());
        Ok(conductor)
    }

    pub async fn run(
        &self,
        spec: &AlgorithmSpec,
        input: GraphInput<(), u64>,
    ) -> PregelResult<ExecutionOutcome> {
        let conductor = self.submit(spec, input).await?;
        let outcome = conductor.run().await;
        self.coordinator.remove_conductor(conductor.execution());
        outcome
    }

    /// Stops every worker server.
    pub async fn shutdown_workers(&self) -> PregelResult<()> {
        for endpoint in self.endpoints()? {
            endpoint.call(WorkerRequest::Shutdown).await?;
        }
        Ok(())
    }
}
