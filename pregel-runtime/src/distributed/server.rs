use crate::distributed::endpoint::dispatch;
use crate::distributed::protocol::{
    framed, recv_msg, send_msg, LoadExecution, WorkerRequest, WorkerResponse,
};
use crate::distributed::transport::TcpTransport;
use crate::graph::results::ResultSink;
use crate::job_mapping::JobMapping;
use crate::worker::context::{WorkerConfig, WorkerParams};
use pregel_common::config::{self, Configuration};
use pregel_common::error::{PregelError, PregelResult};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerServerConfig {
    pub listen_addr: SocketAddr,
    /// Results go to `<output_dir>/execution-<n>-<worker>.jsonl`; none means discard.
    pub output_dir: Option<PathBuf>,
}

/// Accepts conductor RPCs and peer message batches for every execution
/// hosted in this process.
#[derive(Clone)]
pub struct WorkerServer {
    config: WorkerServerConfig,
    mapping: Arc<JobMapping>,
    shutdown: Arc<Notify>,
}

impl WorkerServer {
    pub fn new(config: WorkerServerConfig, mapping: Arc<JobMapping>) -> Self {
        Self {
            config,
            mapping,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn mapping(&self) -> &Arc<JobMapping> {
        &self.mapping
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub async fn bind(&self) -> PregelResult<TcpListener> {
        TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| PregelError::Internal(format!("bind worker server: {e}")))
    }

    pub async fn run(&self) -> PregelResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Runs until a `Shutdown` request or [`WorkerServer::shutdown`].
    pub async fn serve(&self, listener: TcpListener) -> PregelResult<()> {
        let local = listener
            .local_addr()
            .map_err(|e| PregelError::Internal(format!("local addr: {e}")))?;
        info!(addr = %local, "worker server listening");
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(addr = %local, "worker server stopped");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted
                        .map_err(|e| PregelError::Internal(format!("accept: {e}")))?;
                    let svc = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = svc.handle_connection(stream).await {
                            debug!(%peer, error = %e, "connection closed");
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> PregelResult<()> {
        let mut framed = framed(stream);
        loop {
            let req: WorkerRequest = recv_msg(&mut framed).await?;
            let name = req.name();
            let response = match req {
                WorkerRequest::Shutdown => {
                    send_msg(&mut framed, &WorkerResponse::Ack).await?;
                    self.shutdown();
                    return Ok(());
                }
                WorkerRequest::LoadExecution(load) => {
                    self.load_execution(*load).map(|()| WorkerResponse::Ack)
                }
                other => dispatch(&self.mapping, other).await,
            };
            let response = response.unwrap_or_else(|e| {
                warn!(request = name, error = %e, "request failed");
                WorkerResponse::error(&e)
            });
            send_msg(&mut framed, &response).await?;
        }
    }

    fn load_execution(&self, load: LoadExecution) -> PregelResult<()> {
        let conf = load
            .config
            .iter()
            .fold(Configuration::new(), |c, (k, v)| c.with(k.clone(), v));
        let params = WorkerParams::from_config(&conf)?;
        let retries = conf.get_u64(config::TRANSPORT_RETRIES, 3)? as u32;

        let mut peers = HashMap::with_capacity(load.peers.len());
        for (worker, addr) in &load.peers {
            let addr: SocketAddr = addr.parse().map_err(|e| {
                PregelError::Config(format!("bad address {addr} for worker {worker}: {e}"))
            })?;
            peers.insert(worker.clone(), addr);
        }

        let worker_config = Arc::new(WorkerConfig::new(
            load.execution,
            load.worker_id.clone(),
            load.layout,
            params,
        )?);
        let sink = match &self.config.output_dir {
            Some(dir) => ResultSink::JsonLines(
                dir.join(format!("execution-{}-{}.jsonl", load.execution, load.worker_id)),
            ),
            None => ResultSink::Discard,
        };
        let worker = load.algorithm.build_worker(
            worker_config,
            load.partition,
            Arc::new(TcpTransport::new(peers, retries)),
            &sink,
        )?;
        self.mapping.add_worker(worker)?;
        info!(
            execution = %load.execution,
            worker = %load.worker_id,
            algorithm = load.algorithm.name(),
            "execution loaded"
        );
        Ok(())
    }
}
