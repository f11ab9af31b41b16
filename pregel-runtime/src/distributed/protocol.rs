use crate::algorithms::AlgorithmSpec;
use crate::graph::GraphPartition;
use crate::shuffle::partitioner::ShardLayout;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pregel_api::aggregator::Aggregators;
use pregel_common::error::{PregelError, PregelResult};
use pregel_common::types::{ExecutionNumber, GlobalSuperstep, ShardId, WorkerId};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Messages for one destination shard, produced by one Out Cache flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBatch {
    pub execution: ExecutionNumber,
    pub gss: GlobalSuperstep,
    /// Recovery epoch of the sending job; batches from an older epoch are stale.
    pub epoch: u64,
    pub sender: WorkerId,
    pub shard: ShardId,
    pub messages: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareGss {
    pub execution: ExecutionNumber,
    pub gss: GlobalSuperstep,
    pub aggregators: Aggregators,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub sender: WorkerId,
    pub gss: GlobalSuperstep,
    pub active_count: u64,
    pub vertex_count: u64,
    pub edge_count: u64,
    pub pending_messages: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartGss {
    pub execution: ExecutionNumber,
    pub gss: GlobalSuperstep,
    pub aggregators: Aggregators,
}

/// A worker's report at the end of its superstep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSummary {
    pub sender: WorkerId,
    pub gss: GlobalSuperstep,
    pub active_count: u64,
    pub computed_count: u64,
    pub send_count: u64,
    pub received_count: u64,
    pub aggregators: Aggregators,
}

impl LocalSummary {
    pub fn is_locally_done(&self) -> bool {
        self.active_count == 0 && self.send_count == 0 && self.received_count == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRecovery {
    pub execution: ExecutionNumber,
    pub gss: GlobalSuperstep,
    pub epoch: u64,
    pub aggregators: Aggregators,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensateStep {
    pub execution: ExecutionNumber,
    pub gss: GlobalSuperstep,
    pub aggregators: Aggregators,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationSummary {
    pub sender: WorkerId,
    pub gss: GlobalSuperstep,
    pub active_count: u64,
    pub send_count: u64,
    pub aggregators: Aggregators,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeExecution {
    pub execution: ExecutionNumber,
    pub store_results: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub sender: WorkerId,
    pub vertices_written: u64,
}

/// Creates a worker for a built-in algorithm on a remote worker server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadExecution {
    pub execution: ExecutionNumber,
    pub worker_id: WorkerId,
    pub layout: ShardLayout,
    pub algorithm: AlgorithmSpec,
    pub config: Vec<(String, String)>,
    pub peers: Vec<(WorkerId, String)>,
    pub partition: GraphPartition<(), u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerRequest {
    LoadExecution(Box<LoadExecution>),
    PrepareGlobalStep(PrepareGss),
    StartGlobalStep(StartGss),
    CancelGlobalStep { execution: ExecutionNumber },
    ReceivedMessages(MessageBatch),
    FinalizeExecution(FinalizeExecution),
    StartRecovery(StartRecovery),
    CompensateStep(CompensateStep),
    Shutdown,
}

impl WorkerRequest {
    pub fn execution(&self) -> Option<ExecutionNumber> {
        match self {
            WorkerRequest::LoadExecution(m) => Some(m.execution),
            WorkerRequest::PrepareGlobalStep(m) => Some(m.execution),
            WorkerRequest::StartGlobalStep(m) => Some(m.execution),
            WorkerRequest::CancelGlobalStep { execution } => Some(*execution),
            WorkerRequest::ReceivedMessages(m) => Some(m.execution),
            WorkerRequest::FinalizeExecution(m) => Some(m.execution),
            WorkerRequest::StartRecovery(m) => Some(m.execution),
            WorkerRequest::CompensateStep(m) => Some(m.execution),
            WorkerRequest::Shutdown => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkerRequest::LoadExecution(_) => "loadExecution",
            WorkerRequest::PrepareGlobalStep(_) => "prepareGlobalStep",
            WorkerRequest::StartGlobalStep(_) => "startGlobalStep",
            WorkerRequest::CancelGlobalStep { .. } => "cancelGlobalStep",
            WorkerRequest::ReceivedMessages(_) => "receivedMessages",
            WorkerRequest::FinalizeExecution(_) => "finalizeExecution",
            WorkerRequest::StartRecovery(_) => "startRecovery",
            WorkerRequest::CompensateStep(_) => "compensateStep",
            WorkerRequest::Shutdown => "shutdown",
        }
    }

    /// Requests after which the worker is torn down on success.
    pub fn is_teardown(&self) -> bool {
        matches!(
            self,
            WorkerRequest::FinalizeExecution(_) | WorkerRequest::CancelGlobalStep { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerResponse {
    Ack,
    Prepared(PrepareResponse),
    Finished(LocalSummary),
    Finalized(FinalizeResponse),
    Compensated(CompensationSummary),
    Error { kind: ErrorKind, message: String },
}

/// Coarse error class that survives the wire, so the conductor can tell
/// fatal configuration errors from retryable ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Configuration,
    Other,
}

impl WorkerResponse {
    pub fn error(e: &PregelError) -> Self {
        let kind = if e.is_configuration() {
            ErrorKind::Configuration
        } else {
            ErrorKind::Other
        };
        WorkerResponse::Error {
            kind,
            message: e.to_string(),
        }
    }

    /// Turns an `Error` reply back into a typed error and hands any other reply back.
    pub fn into_error(self, context: impl FnOnce(&str) -> String) -> Result<PregelError, Self> {
        match self {
            WorkerResponse::Error {
                kind: ErrorKind::Configuration,
                message,
            } => Ok(PregelError::Config(context(&message))),
            WorkerResponse::Error { message, .. } => Ok(PregelError::Internal(context(&message))),
            other => Err(other),
        }
    }
}

pub type WireFramed = Framed<TcpStream, LengthDelimitedCodec>;

pub fn framed(stream: TcpStream) -> WireFramed {
    Framed::new(stream, LengthDelimitedCodec::new())
}

pub fn encode<T: Serialize>(v: &T) -> PregelResult<Vec<u8>> {
    bincode::serialize(v).map_err(|e| PregelError::Internal(format!("bincode encode: {e}")))
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> PregelResult<T> {
    bincode::deserialize(bytes).map_err(|e| PregelError::Internal(format!("bincode decode: {e}")))
}

pub async fn send_msg<T: Serialize>(framed: &mut WireFramed, msg: &T) -> PregelResult<()> {
    let bytes = encode(msg)?;
    framed
        .send(Bytes::from(bytes))
        .await
        .map_err(|e| PregelError::Transport(format!("send failed: {e}")))?;
    Ok(())
}

pub async fn recv_msg<T: for<'de> Deserialize<'de>>(framed: &mut WireFramed) -> PregelResult<T> {
    let bytes = framed
        .next()
        .await
        .ok_or_else(|| PregelError::Transport("connection closed".to_string()))?
        .map_err(|e| PregelError::Transport(format!("recv failed: {e}")))?;
    decode::<T>(&bytes)
}
