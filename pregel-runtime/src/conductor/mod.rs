//! Cluster-wide coordination of one execution.
//!
//! The conductor drives every worker through prepare/start for each global
//! superstep, merges their summaries and aggregators, and decides between
//! the next superstep, finalization, recovery and failure.

use crate::distributed::endpoint::WorkerEndpoint;
use crate::distributed::protocol::{
    CompensateStep, FinalizeExecution, LocalSummary, PrepareGss, StartGss, StartRecovery,
    WorkerRequest, WorkerResponse,
};
use futures::future::join_all;
use pregel_api::aggregator::{AggregatorKind, Aggregators};
use pregel_api::{Algorithm, MasterContext};
use pregel_common::config::{self, Configuration};
use pregel_common::error::{PregelError, PregelResult};
use pregel_common::types::{ExecutionNumber, GlobalSuperstep};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ConductorConfig {
    pub max_gss: u64,
    pub superstep_timeout: Duration,
    pub max_recovery_attempts: u32,
    pub store_results: bool,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            max_gss: 500,
            superstep_timeout: Duration::from_millis(60_000),
            max_recovery_attempts: 1,
            store_results: true,
        }
    }
}

impl ConductorConfig {
    pub fn from_config(conf: &Configuration) -> PregelResult<Self> {
        let defaults = Self::default();
        let timeout_ms = conf.get_u64(
            config::SUPERSTEP_TIMEOUT_MS,
            defaults.superstep_timeout.as_millis() as u64,
        )?;
        if timeout_ms == 0 {
            return Err(PregelError::Config(format!(
                "{} must be positive",
                config::SUPERSTEP_TIMEOUT_MS
            )));
        }
        let attempts = conf.get_u64(
            config::MAX_RECOVERY_ATTEMPTS,
            defaults.max_recovery_attempts as u64,
        )?;
        Ok(Self {
            max_gss: conf.get_u64(config::MAX_GSS, defaults.max_gss)?,
            superstep_timeout: Duration::from_millis(timeout_ms),
            max_recovery_attempts: u32::try_from(attempts).map_err(|_| {
                PregelError::Config(format!("{} out of range", config::MAX_RECOVERY_ATTEMPTS))
            })?,
            store_results: conf.get_bool(config::STORE_RESULTS, defaults.store_results)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionState {
    Default,
    Running,
    Recovering,
    Done,
    Canceled,
    Failed(String),
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Done | ExecutionState::Canceled | ExecutionState::Failed(_)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStats {
    pub supersteps: u64,
    pub computed: u64,
    pub sent: u64,
    pub received: u64,
    pub recoveries: u64,
}

/// Algorithm facts the conductor needs without knowing its payload types.
pub struct ConductorSetup {
    pub algorithm: String,
    pub aggregators: Vec<(String, AggregatorKind)>,
    pub master: Option<Box<dyn MasterContext>>,
}

impl ConductorSetup {
    pub fn from_algorithm<V, E, M, A>(algorithm: &A) -> Self
    where
        A: Algorithm<V, E, M> + ?Sized,
    {
        Self {
            algorithm: algorithm.name().to_string(),
            aggregators: algorithm.aggregators(),
            master: algorithm.create_master_context(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub execution: ExecutionNumber,
    pub state: ExecutionState,
    /// Last superstep that every worker completed.
    pub gss: Option<GlobalSuperstep>,
    pub stats: ExecutionStats,
    pub vertices_written: u64,
}

struct Status {
    state: ExecutionState,
    history: Vec<ExecutionState>,
    completed_gss: Option<GlobalSuperstep>,
    stats: ExecutionStats,
    vertices_written: u64,
}

enum Phase {
    Superstep(GlobalSuperstep),
    Recover {
        gss: GlobalSuperstep,
        reason: String,
    },
    Finalize,
    Cancel,
    Fail(String),
    Finished,
}

enum StepResult {
    Continue,
    Converged,
}

pub struct Conductor {
    execution: ExecutionNumber,
    algorithm: String,
    workers: Vec<Arc<dyn WorkerEndpoint>>,
    config: ConductorConfig,
    declared: Aggregators,
    master: tokio::sync::Mutex<Option<Box<dyn MasterContext>>>,
    cancelled: AtomicBool,
    status: Mutex<Status>,
}

impl Conductor {
    pub fn new(
        execution: ExecutionNumber,
        workers: Vec<Arc<dyn WorkerEndpoint>>,
        config: ConductorConfig,
        setup: ConductorSetup,
    ) -> PregelResult<Self> {
        if workers.is_empty() {
            return Err(PregelError::Config(format!(
                "execution {execution} has no workers"
            )));
        }
        Ok(Self {
            execution,
            algorithm: setup.algorithm,
            workers,
            config,
            declared: Aggregators::from_declarations(&setup.aggregators),
            master: tokio::sync::Mutex::new(setup.master),
            cancelled: AtomicBool::new(false),
            status: Mutex::new(Status {
                state: ExecutionState::Default,
                history: vec![ExecutionState::Default],
                completed_gss: None,
                stats: ExecutionStats::default(),
                vertices_written: 0,
            }),
        })
    }

    pub fn execution(&self) -> ExecutionNumber {
        self.execution
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn state(&self) -> ExecutionState {
        self.status().state.clone()
    }

    pub fn history(&self) -> Vec<ExecutionState> {
        self.status().history.clone()
    }

    pub fn stats(&self) -> ExecutionStats {
        self.status().stats.clone()
    }

    pub fn outcome(&self) -> ExecutionOutcome {
        let status = self.status();
        ExecutionOutcome {
            execution: self.execution,
            state: status.state.clone(),
            gss: status.completed_gss,
            stats: status.stats.clone(),
            vertices_written: status.vertices_written,
        }
    }

    /// Drives the execution to a terminal state. Failures of the execution
    /// are reported in the outcome, not as `Err`.
    pub async fn run(&self) -> PregelResult<ExecutionOutcome> {
        {
            let status = self.status();
            if status.state != ExecutionState::Default {
                return Err(PregelError::InvalidArgument(format!(
                    "execution {} already started",
                    self.execution
                )));
            }
        }
        self.set_state(ExecutionState::Running);
        info!(
            execution = %self.execution,
            algorithm = %self.algorithm,
            workers = self.workers.len(),
            "execution started"
        );

        let mut master = self.master.lock().await.take();
        let mut global = self.declared.empty_like();
        let mut recoveries = 0u32;
        let mut phase = Phase::Superstep(0);

        loop {
            phase = match phase {
                Phase::Superstep(gss) => {
                    if self.is_cancelled() {
                        Phase::Cancel
                    } else if gss >= self.config.max_gss {
                        info!(execution = %self.execution, gss, "superstep limit reached");
                        Phase::Finalize
                    } else {
                        self.superstep_phase(gss, &mut global, &mut master).await
                    }
                }
                Phase::Recover { gss, reason } => {
                    if recoveries >= self.config.max_recovery_attempts {
                        Phase::Fail(format!("superstep {gss} failed: {reason}"))
                    } else {
                        recoveries += 1;
                        warn!(
                            execution = %self.execution,
                            gss,
                            attempt = recoveries,
                            %reason,
                            "starting recovery"
                        );
                        self.set_state(ExecutionState::Recovering);
                        self.status().stats.recoveries += 1;
                        metrics::counter!("pregel_conductor_recoveries_total").increment(1);
                        match self.recover(gss, recoveries, &global).await {
                            Ok(()) => {
                                self.status().completed_gss = Some(gss);
                                self.set_state(ExecutionState::Running);
                                Phase::Superstep(gss + 1)
                            }
                            Err(_) if self.is_cancelled() => Phase::Cancel,
                            Err(e) => Phase::Fail(format!(
                                "recovery of superstep {gss} failed: {e} (after: {reason})"
                            )),
                        }
                    }
                }
                Phase::Finalize => match self.finalize().await {
                    Ok(written) => {
                        self.status().vertices_written = written;
                        self.set_state(ExecutionState::Done);
                        Phase::Finished
                    }
                    Err(e) => Phase::Fail(format!("finalize failed: {e}")),
                },
                Phase::Cancel => {
                    self.teardown().await;
                    self.set_state(ExecutionState::Canceled);
                    Phase::Finished
                }
                Phase::Fail(reason) => {
                    error!(execution = %self.execution, %reason, "execution failed");
                    self.teardown().await;
                    self.set_state(ExecutionState::Failed(reason));
                    Phase::Finished
                }
                Phase::Finished => break,
            };
        }

        let outcome = self.outcome();
        info!(
            execution = %self.execution,
            state = ?outcome.state,
            supersteps = outcome.stats.supersteps,
            "execution finished"
        );
        Ok(outcome)
    }

    /// Cooperative: workers stop between vertices and the running loop
    /// ends in CANCELED.
    pub async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        {
            let mut status = self.status();
            if status.state.is_terminal() {
                return;
            }
            if status.state == ExecutionState::Default {
                status.state = ExecutionState::Canceled;
                status.history.push(ExecutionState::Canceled);
                return;
            }
        }
        info!(execution = %self.execution, "cancelling execution");
        self.teardown().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn superstep_phase(
        &self,
        gss: GlobalSuperstep,
        global: &mut Aggregators,
        master: &mut Option<Box<dyn MasterContext>>,
    ) -> Phase {
        if let Some(m) = master.as_mut() {
            if let Err(e) = m.pre_global_superstep(gss, global) {
                return Phase::Fail(format!(
                    "master context failed before superstep {gss}: {e}"
                ));
            }
        }
        match self.global_step(gss, global, master).await {
            Ok(StepResult::Continue) => Phase::Superstep(gss + 1),
            Ok(StepResult::Converged) => Phase::Finalize,
            Err(_) if self.is_cancelled() => Phase::Cancel,
            // routing and configuration errors repeat on every retry
            Err(e) if e.is_configuration() => {
                Phase::Fail(format!("superstep {gss} failed: {e}"))
            }
            Err(e) => Phase::Recover {
                gss,
                reason: e.to_string(),
            },
        }
    }

    async fn global_step(
        &self,
        gss: GlobalSuperstep,
        global: &mut Aggregators,
        master: &mut Option<Box<dyn MasterContext>>,
    ) -> PregelResult<StepResult> {
        let snapshot = global.clone();
        self.broadcast(
            "prepareGlobalStep",
            |_| {
                WorkerRequest::PrepareGlobalStep(PrepareGss {
                    execution: self.execution,
                    gss,
                    aggregators: snapshot.clone(),
                })
            },
            |resp| match resp {
                WorkerResponse::Prepared(p) if p.gss == gss => Some(p),
                _ => None,
            },
        )
        .await?;

        let summaries: Vec<LocalSummary> = self
            .broadcast(
                "startGlobalStep",
                |_| {
                    WorkerRequest::StartGlobalStep(StartGss {
                        execution: self.execution,
                        gss,
                        aggregators: snapshot.clone(),
                    })
                },
                |resp| match resp {
                    WorkerResponse::Finished(s) if s.gss == gss => Some(s),
                    _ => None,
                },
            )
            .await?;

        let mut merged = global.empty_like();
        let mut all_done = true;
        {
            let mut status = self.status();
            for summary in &summaries {
                merged.merge(&summary.aggregators)?;
                all_done &= summary.is_locally_done();
                status.stats.computed += summary.computed_count;
                status.stats.sent += summary.send_count;
                status.stats.received += summary.received_count;
            }
            status.stats.supersteps += 1;
            status.completed_gss = Some(gss);
        }
        *global = merged;
        metrics::counter!("pregel_conductor_supersteps_total").increment(1);

        let keep_going = match master.as_mut() {
            Some(m) => m.post_global_superstep(gss, global),
            None => true,
        };
        info!(
            execution = %self.execution,
            gss,
            all_done,
            keep_going,
            "superstep complete"
        );
        if all_done || !keep_going {
            Ok(StepResult::Converged)
        } else {
            Ok(StepResult::Continue)
        }
    }

    async fn recover(
        &self,
        gss: GlobalSuperstep,
        epoch: u32,
        global: &Aggregators,
    ) -> PregelResult<()> {
        self.broadcast(
            "startRecovery",
            |_| {
                WorkerRequest::StartRecovery(StartRecovery {
                    execution: self.execution,
                    gss,
                    epoch: u64::from(epoch),
                    aggregators: global.clone(),
                })
            },
            |resp| match resp {
                WorkerResponse::Ack => Some(()),
                _ => None,
            },
        )
        .await?;
        let summaries = self
            .broadcast(
                "compensateStep",
                |_| {
                    WorkerRequest::CompensateStep(CompensateStep {
                        execution: self.execution,
                        gss,
                        aggregators: global.clone(),
                    })
                },
                |resp| match resp {
                    WorkerResponse::Compensated(s) if s.gss == gss => Some(s),
                    _ => None,
                },
            )
            .await?;
        let sent: u64 = summaries.iter().map(|s| s.send_count).sum();
        info!(execution = %self.execution, gss, sent, "recovery compensated");
        Ok(())
    }

    async fn finalize(&self) -> PregelResult<u64> {
        let responses = self
            .broadcast(
                "finalizeExecution",
                |_| {
                    WorkerRequest::FinalizeExecution(FinalizeExecution {
                        execution: self.execution,
                        store_results: self.config.store_results,
                    })
                },
                |resp| match resp {
                    WorkerResponse::Finalized(f) => Some(f),
                    _ => None,
                },
            )
            .await?;
        Ok(responses.iter().map(|r| r.vertices_written).sum())
    }

    /// Best effort; workers that are already gone are ignored.
    async fn teardown(&self) {
        let results = self
            .broadcast(
                "cancelGlobalStep",
                |_| WorkerRequest::CancelGlobalStep {
                    execution: self.execution,
                },
                |resp| match resp {
                    WorkerResponse::Ack => Some(()),
                    _ => None,
                },
            )
            .await;
        if let Err(e) = results {
            warn!(execution = %self.execution, error = %e, "cancel not acknowledged by every worker");
        }
    }

    /// Sends one request per worker and waits for all of them, each bounded by
    /// the superstep timeout.
    async fn broadcast<T>(
        &self,
        name: &'static str,
        request: impl Fn(usize) -> WorkerRequest,
        extract: impl Fn(WorkerResponse) -> Option<T>,
    ) -> PregelResult<Vec<T>> {
        let timeout = self.config.superstep_timeout;
        let calls = self.workers.iter().enumerate().map(|(i, worker)| {
            let call = worker.call(request(i));
            let id = worker.worker_id().clone();
            async move {
                match tokio::time::timeout(timeout, call).await {
                    Err(_) => Err(PregelError::Timeout(format!(
                        "worker {id} did not answer {name} within {timeout:?}"
                    ))),
                    Ok(Err(e)) => Err(e),
                    Ok(Ok(resp)) => Ok((id, resp)),
                }
            }
        });

        let mut out = Vec::with_capacity(self.workers.len());
        let mut first_error = None;
        for result in join_all(calls).await {
            let outcome = result.and_then(|(id, resp)| {
                match resp.into_error(|m| format!("worker {id} failed {name}: {m}")) {
                    Ok(e) => Err(e),
                    Err(other) => extract(other).ok_or_else(|| {
                        PregelError::Internal(format!("unexpected {name} reply from {id}"))
                    }),
                }
            });
            match outcome {
                Ok(v) => out.push(v),
                Err(e) => {
                    warn!(execution = %self.execution, request = name, error = %e, "worker call failed");
                    // a configuration error anywhere outranks timeouts elsewhere
                    let replace = first_error
                        .as_ref()
                        .map_or(true, |f: &PregelError| !f.is_configuration() && e.is_configuration());
                    if replace {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    fn set_state(&self, state: ExecutionState) {
        let mut status = self.status();
        status.state = state.clone();
        status.history.push(state);
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_rejects_zero_timeout() {
        let conf = Configuration::new().with(config::SUPERSTEP_TIMEOUT_MS, 0);
        assert!(ConductorConfig::from_config(&conf)
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn config_defaults() {
        let cfg = ConductorConfig::from_config(&Configuration::new()).unwrap();
        assert_eq!(cfg, ConductorConfig::default());
        assert_eq!(cfg.max_gss, 500);
    }

    #[test]
    fn conductor_needs_workers() {
        let setup = ConductorSetup {
            algorithm: "noop".to_string(),
            aggregators: Vec::new(),
            master: None,
        };
        assert!(Conductor::new(
            ExecutionNumber(1),
            Vec::new(),
            ConductorConfig::default(),
            setup
        )
        .is_err());
    }

    use crate::distributed::protocol::{CompensationSummary, FinalizeResponse, PrepareResponse};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use pregel_common::types::WorkerId;

    /// (active, sent, received) reported for a superstep; `None` never answers.
    type Script = Box<dyn Fn(GlobalSuperstep) -> Option<(u64, u64, u64)> + Send + Sync>;

    struct ScriptedWorker {
        id: WorkerId,
        script: Script,
        requests: Arc<Mutex<Vec<&'static str>>>,
    }

    impl WorkerEndpoint for ScriptedWorker {
        fn worker_id(&self) -> &WorkerId {
            &self.id
        }

        fn call(&self, request: WorkerRequest) -> BoxFuture<'static, PregelResult<WorkerResponse>> {
            self.requests.lock().unwrap().push(request.name());
            let sender = self.id.clone();
            let response = match request {
                WorkerRequest::PrepareGlobalStep(m) => WorkerResponse::Prepared(PrepareResponse {
                    sender,
                    gss: m.gss,
                    active_count: 1,
                    vertex_count: 1,
                    edge_count: 0,
                    pending_messages: 0,
                }),
                WorkerRequest::StartGlobalStep(m) => match (self.script)(m.gss) {
                    Some((active_count, send_count, received_count)) => {
                        WorkerResponse::Finished(LocalSummary {
                            sender,
                            gss: m.gss,
                            active_count,
                            computed_count: 1,
                            send_count,
                            received_count,
                            aggregators: Aggregators::new(),
                        })
                    }
                    None => return futures::future::pending().boxed(),
                },
                WorkerRequest::StartRecovery(_) | WorkerRequest::CancelGlobalStep { .. } => {
                    WorkerResponse::Ack
                }
                WorkerRequest::CompensateStep(m) => {
                    WorkerResponse::Compensated(CompensationSummary {
                        sender,
                        gss: m.gss,
                        active_count: 1,
                        send_count: 0,
                        aggregators: Aggregators::new(),
                    })
                }
                WorkerRequest::FinalizeExecution(_) => WorkerResponse::Finalized(FinalizeResponse {
                    sender,
                    vertices_written: 1,
                }),
                other => {
                    let err = PregelError::InvalidArgument(format!("unexpected {}", other.name()));
                    return futures::future::ready(Err(err)).boxed();
                }
            };
            futures::future::ready(Ok(response)).boxed()
        }
    }

    fn scripted(
        id: &str,
        script: impl Fn(GlobalSuperstep) -> Option<(u64, u64, u64)> + Send + Sync + 'static,
    ) -> (Arc<dyn WorkerEndpoint>, Arc<Mutex<Vec<&'static str>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let worker = ScriptedWorker {
            id: WorkerId::new(id),
            script: Box::new(script),
            requests: requests.clone(),
        };
        (Arc::new(worker), requests)
    }

    fn scripted_conductor(workers: Vec<Arc<dyn WorkerEndpoint>>) -> Conductor {
        let config = ConductorConfig {
            superstep_timeout: Duration::from_millis(100),
            ..ConductorConfig::default()
        };
        let setup = ConductorSetup {
            algorithm: "scripted".to_string(),
            aggregators: Vec::new(),
            master: None,
        };
        Conductor::new(ExecutionNumber(7), workers, config, setup).unwrap()
    }

    #[tokio::test]
    async fn silent_worker_at_a_quiet_superstep_recovers_instead_of_finishing() {
        // busy until superstep 4, where two workers report nothing left
        let quiet = |gss: GlobalSuperstep| -> Option<(u64, u64, u64)> {
            Some(if gss < 4 { (1, 0, 0) } else { (0, 0, 0) })
        };
        let stalled = Arc::new(AtomicBool::new(false));
        let (w0, _) = scripted("w0", quiet);
        let (w1, _) = scripted("w1", quiet);
        let (w2, requests) = scripted("w2", move |gss| {
            if gss == 4 && !stalled.swap(true, Ordering::SeqCst) {
                None
            } else {
                quiet(gss)
            }
        });

        let conductor = scripted_conductor(vec![w0, w1, w2]);
        let outcome = conductor.run().await.unwrap();

        assert_eq!(
            conductor.history(),
            vec![
                ExecutionState::Default,
                ExecutionState::Running,
                ExecutionState::Recovering,
                ExecutionState::Running,
                ExecutionState::Done,
            ]
        );
        assert_eq!(outcome.stats.recoveries, 1);
        // superstep 4 never completed, so it is not counted
        assert_eq!(outcome.stats.supersteps, 5);
        assert_eq!(outcome.gss, Some(5));
        let requests = requests.lock().unwrap();
        assert!(requests.contains(&"startRecovery"));
        assert!(requests.contains(&"compensateStep"));
    }

    #[tokio::test]
    async fn any_nonzero_counter_prevents_termination() {
        for counters in [(1u64, 0u64, 0u64), (0, 1, 0), (0, 0, 1)] {
            let (w0, _) = scripted("w0", |_| Some((0, 0, 0)));
            let (w1, _) = scripted("w1", |_| Some((0, 0, 0)));
            let (w2, _) = scripted("w2", move |gss| {
                Some(if gss == 0 { counters } else { (0, 0, 0) })
            });

            let outcome = scripted_conductor(vec![w0, w1, w2]).run().await.unwrap();
            assert_eq!(outcome.state, ExecutionState::Done);
            assert_eq!(outcome.stats.supersteps, 2, "counters {counters:?}");
            assert_eq!(outcome.gss, Some(1));
        }
    }

    #[tokio::test]
    async fn all_quiet_workers_finish_after_one_superstep() {
        let (w0, _) = scripted("w0", |_| Some((0, 0, 0)));
        let (w1, requests) = scripted("w1", |_| Some((0, 0, 0)));

        let outcome = scripted_conductor(vec![w0, w1]).run().await.unwrap();
        assert_eq!(outcome.state, ExecutionState::Done);
        assert_eq!(outcome.stats.supersteps, 1);
        assert_eq!(outcome.vertices_written, 2);
        assert_eq!(
            *requests.lock().unwrap(),
            vec!["prepareGlobalStep", "startGlobalStep", "finalizeExecution"]
        );
    }
}
