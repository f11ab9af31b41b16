use crate::conductor::Conductor;
use crate::worker::WorkerHandle;
use dashmap::DashMap;
use pregel_common::error::{PregelError, PregelResult};
use pregel_common::types::ExecutionNumber;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Registry of the conductors and workers living in this process, keyed by
/// execution number.
///
/// Handed to servers and transports explicitly; there is no process-global
/// instance.
#[derive(Default)]
pub struct JobMapping {
    next_execution: AtomicU64,
    conductors: DashMap<ExecutionNumber, Arc<Conductor>>,
    workers: DashMap<ExecutionNumber, Arc<dyn WorkerHandle>>,
}

impl JobMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_execution_number(&self) -> ExecutionNumber {
        ExecutionNumber(self.next_execution.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn add_conductor(&self, conductor: Arc<Conductor>) {
        self.conductors.insert(conductor.execution(), conductor);
    }

    pub fn conductor(&self, execution: ExecutionNumber) -> Option<Arc<Conductor>> {
        self.conductors.get(&execution).map(|c| c.value().clone())
    }

    pub fn remove_conductor(&self, execution: ExecutionNumber) -> Option<Arc<Conductor>> {
        self.conductors.remove(&execution).map(|(_, c)| c)
    }

    /// Fails if a worker for the same execution is already registered.
    pub fn add_worker(&self, worker: Arc<dyn WorkerHandle>) -> PregelResult<()> {
        let execution = worker.execution_number();
        match self.workers.entry(execution) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(PregelError::InvalidArgument(
                format!("execution {execution} already has a worker"),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(worker);
                Ok(())
            }
        }
    }

    pub fn worker(&self, execution: ExecutionNumber) -> PregelResult<Arc<dyn WorkerHandle>> {
        self.workers
            .get(&execution)
            .map(|w| w.value().clone())
            .ok_or(PregelError::ExecutionNotFound(execution.0))
    }

    pub fn remove_worker(&self, execution: ExecutionNumber) -> Option<Arc<dyn WorkerHandle>> {
        self.workers.remove(&execution).map(|(_, w)| w)
    }

    pub fn worker_executions(&self) -> Vec<ExecutionNumber> {
        let mut out: Vec<_> = self.workers.iter().map(|e| *e.key()).collect();
        out.sort();
        out
    }

    pub fn conductor_executions(&self) -> Vec<ExecutionNumber> {
        let mut out: Vec<_> = self.conductors.iter().map(|e| *e.key()).collect();
        out.sort();
        out
    }
}
