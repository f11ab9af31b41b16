use crate::distributed::protocol::{framed, recv_msg, send_msg, WorkerRequest, WorkerResponse};
use crate::job_mapping::JobMapping;
use futures::future::BoxFuture;
use futures::FutureExt;
use pregel_common::error::{PregelError, PregelResult};
use pregel_common::types::WorkerId;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration};

/// How the conductor reaches one worker.
pub trait WorkerEndpoint: Send + Sync {
    fn worker_id(&self) -> &WorkerId;

    fn call(&self, request: WorkerRequest) -> BoxFuture<'static, PregelResult<WorkerResponse>>;
}

/// Routes a request to the worker of its execution. Workers are dropped from
/// the mapping once finalized or cancelled.
pub async fn dispatch(mapping: &JobMapping, request: WorkerRequest) -> PregelResult<WorkerResponse> {
    let execution = request.execution().ok_or_else(|| {
        PregelError::InvalidArgument(format!("{} has no execution", request.name()))
    })?;
    let worker = mapping.worker(execution)?;
    let teardown = request.is_teardown();
    let response = worker.handle(request).await?;
    if teardown {
        mapping.remove_worker(execution);
    }
    Ok(response)
}

/// A worker in the same process, reached through its server's mapping.
#[derive(Clone)]
pub struct LocalEndpoint {
    worker_id: WorkerId,
    mapping: Arc<JobMapping>,
}

impl LocalEndpoint {
    pub fn new(worker_id: WorkerId, mapping: Arc<JobMapping>) -> Self {
        Self { worker_id, mapping }
    }
}

impl WorkerEndpoint for LocalEndpoint {
    fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    fn call(&self, request: WorkerRequest) -> BoxFuture<'static, PregelResult<WorkerResponse>> {
        let mapping = self.mapping.clone();
        async move { dispatch(&mapping, request).await }.boxed()
    }
}

/// A worker server reached over TCP, one connection per call.
#[derive(Clone)]
pub struct TcpWorkerEndpoint {
    worker_id: WorkerId,
    addr: SocketAddr,
    connect_attempts: u32,
}

impl TcpWorkerEndpoint {
    pub fn new(worker_id: WorkerId, addr: SocketAddr, connect_attempts: u32) -> Self {
        Self {
            worker_id,
            addr,
            connect_attempts: connect_attempts.max(1),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl WorkerEndpoint for TcpWorkerEndpoint {
    fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    fn call(&self, request: WorkerRequest) -> BoxFuture<'static, PregelResult<WorkerResponse>> {
        let addr = self.addr;
        let attempts = self.connect_attempts;
        async move {
            let stream = connect(addr, attempts).await?;
            let mut framed = framed(stream);
            send_msg(&mut framed, &request).await?;
            recv_msg(&mut framed).await
        }
        .boxed()
    }
}

pub async fn connect(addr: SocketAddr, attempts: u32) -> PregelResult<TcpStream> {
    let mut tried: u32 = 0;
    loop {
        tried += 1;
        match TcpStream::connect(addr).await {
            Ok(s) => return Ok(s),
            Err(e) => {
                if tried >= attempts {
                    return Err(PregelError::Transport(format!("connect {addr} failed: {e}")));
                }
                sleep(Duration::from_millis(30)).await;
            }
        }
    }
}
