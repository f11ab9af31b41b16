use crate::distributed::protocol::{framed, recv_msg, send_msg, MessageBatch, WorkerRequest, WorkerResponse};
use crate::job_mapping::JobMapping;
use futures::future::BoxFuture;
use futures::FutureExt;
use pregel_common::error::{PregelError, PregelResult};
use pregel_common::types::WorkerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration};
use tracing::warn;

/// A batch handed to the transport. Resolves once the receiver acknowledged it.
pub type Delivery = BoxFuture<'static, PregelResult<()>>;

/// Moves message batches between workers of one execution.
///
/// `send` must not block the computing thread; the returned future is
/// awaited before the worker reports its superstep as finished.
pub trait Transport: Send + Sync {
    fn send(&self, target: &WorkerId, batch: MessageBatch) -> Delivery;
}

/// In-process delivery to workers registered on local job mappings.
#[derive(Clone, Default)]
pub struct LocalTransport {
    servers: HashMap<WorkerId, Arc<JobMapping>>,
}

impl LocalTransport {
    pub fn new(servers: HashMap<WorkerId, Arc<JobMapping>>) -> Self {
        Self { servers }
    }
}

impl Transport for LocalTransport {
    fn send(&self, target: &WorkerId, batch: MessageBatch) -> Delivery {
        let res = match self.servers.get(target) {
            Some(mapping) => mapping
                .worker(batch.execution)
                .and_then(|worker| worker.received_messages(batch)),
            None => Err(PregelError::Transport(format!("no route to worker {target}"))),
        };
        futures::future::ready(res).boxed()
    }
}

/// Delivers batches over the worker wire protocol, one connection per batch.
#[derive(Clone)]
pub struct TcpTransport {
    peers: Arc<HashMap<WorkerId, SocketAddr>>,
    retries: u32,
}

impl TcpTransport {
    pub fn new(peers: HashMap<WorkerId, SocketAddr>, retries: u32) -> Self {
        Self {
            peers: Arc::new(peers),
            retries: retries.max(1),
        }
    }
}

impl Transport for TcpTransport {
    fn send(&self, target: &WorkerId, batch: MessageBatch) -> Delivery {
        let Some(addr) = self.peers.get(target).copied() else {
            let err = PregelError::Transport(format!("no address for worker {target}"));
            return futures::future::ready(Err(err)).boxed();
        };
        let retries = self.retries;
        let target = target.clone();
        let handle = tokio::spawn(async move {
            let request = WorkerRequest::ReceivedMessages(batch);
            let mut attempt = 0;
            loop {
                attempt += 1;
                match call_once(addr, &request).await {
                    Ok(WorkerResponse::Ack) => return Ok(()),
                    Ok(reply) => {
                        return Err(match reply.into_error(|m| {
                            format!("worker {target} rejected batch: {m}")
                        }) {
                            Ok(e) => e,
                            Err(other) => PregelError::Transport(format!(
                                "unexpected reply from {target}: {other:?}"
                            )),
                        })
                    }
                    Err(e) if attempt < retries => {
                        warn!(%target, attempt, error = %e, "batch delivery failed, retrying");
                        sleep(Duration::from_millis(50 * attempt as u64)).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        });
        async move {
            handle
                .await
                .map_err(|e| PregelError::Internal(format!("delivery task: {e}")))?
        }
        .boxed()
    }
}

/// One request/response exchange on a fresh connection.
async fn call_once(addr: SocketAddr, request: &WorkerRequest) -> PregelResult<WorkerResponse> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| PregelError::Transport(format!("connect {addr}: {e}")))?;
    let mut framed = framed(stream);
    send_msg(&mut framed, request).await?;
    recv_msg(&mut framed).await
}
