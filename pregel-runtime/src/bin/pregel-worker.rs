use clap::Parser;
use pregel_runtime::distributed::server::{WorkerServer, WorkerServerConfig};
use pregel_runtime::http::serve_status;
use pregel_runtime::job_mapping::JobMapping;
use pregel_runtime::observability::{init_prometheus, init_tracing};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
struct Args {
    #[arg(long)]
    listen: SocketAddr,

    /// Directory for per-execution result files; results are dropped if unset.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    metrics_listen: Option<SocketAddr>,

    /// Log filter directives, e.g. `pregel_runtime::conductor=debug`.
    #[arg(long)]
    log: Option<String>,

    #[arg(long)]
    status_listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log.as_deref());
    if let Some(addr) = args.metrics_listen {
        let _handle = init_prometheus(addr)?;
    }

    let mapping = Arc::new(JobMapping::new());
    if let Some(addr) = args.status_listen {
        let mapping = mapping.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_status(addr, mapping).await {
                tracing::error!(error = %e, "status endpoint stopped");
            }
        });
    }

    let server = WorkerServer::new(
        WorkerServerConfig {
            listen_addr: args.listen,
            output_dir: args.output_dir,
        },
        mapping,
    );
    server.run().await?;
    Ok(())
}
