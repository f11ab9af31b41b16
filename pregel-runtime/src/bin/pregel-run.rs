use clap::{Parser, ValueEnum};
use pregel_runtime::algorithms::AlgorithmSpec;
use pregel_runtime::cluster::{LocalCluster, RemoteCluster};
use pregel_runtime::conductor::{ExecutionOutcome, ExecutionState};
use pregel_runtime::graph::results::ResultSink;
use pregel_runtime::io::file::read_graph;
use pregel_runtime::observability::{init_prometheus, init_tracing};
use pregel_common::config::{self, Configuration};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Mode {
    Local,
    Distributed,
}

#[derive(Debug, Parser)]
struct Args {
    #[arg(long, value_enum, default_value_t = Mode::Local)]
    mode: Mode,

    /// pagerank, sssp or wcc.
    #[arg(long)]
    algorithm: String,

    /// CSV edge list: src,dst[,weight].
    #[arg(long)]
    edges: PathBuf,

    #[arg(long, default_value_t = 0.85)]
    damping: f64,

    #[arg(long, default_value_t = 1e-4)]
    threshold: f64,

    #[arg(long)]
    source: Option<String>,

    /// In-process workers for local mode.
    #[arg(long, default_value_t = 4)]
    parallelism: usize,

    #[arg(long, default_value_t = 2)]
    shards_per_worker: usize,

    #[arg(long, value_delimiter = ',')]
    workers: Vec<SocketAddr>,

    /// Local mode writes `<output_dir>/execution-<n>-<worker>.jsonl`.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 500)]
    max_gss: u64,

    #[arg(long, default_value_t = 60_000)]
    superstep_timeout_ms: u64,

    #[arg(long, default_value_t = 4096)]
    message_batch_size: usize,

    #[arg(long)]
    metrics_listen: Option<SocketAddr>,

    /// Log filter directives, e.g. `pregel_runtime::conductor=debug`.
    #[arg(long)]
    log: Option<String>,

    /// Stop the remote worker servers after the run.
    #[arg(long)]
    shutdown_workers: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log.as_deref());
    if let Some(addr) = args.metrics_listen {
        let _handle = init_prometheus(addr)?;
    }

    let mut params = Configuration::new()
        .with("pagerank.damping", args.damping)
        .with("pagerank.threshold", args.threshold);
    if let Some(source) = &args.source {
        params.put("sssp.source", source.clone());
    }
    let spec = AlgorithmSpec::parse(&args.algorithm, &params)?;
    let conf = Configuration::new()
        .with(config::MAX_GSS, args.max_gss)
        .with(config::SUPERSTEP_TIMEOUT_MS, args.superstep_timeout_ms)
        .with(config::MESSAGE_BATCH_SIZE, args.message_batch_size)
        .with(config::STORE_RESULTS, args.output_dir.is_some());
    let input = read_graph(&args.edges)?;
    tracing::info!(
        vertices = input.vertex_count(),
        edges = input.edges.len(),
        algorithm = spec.name(),
        "graph loaded"
    );

    let outcome = match args.mode {
        Mode::Local => {
            let cluster = LocalCluster::new(args.parallelism, args.shards_per_worker, conf)?;
            let output_dir = args.output_dir.clone();
            let conductor = cluster.submit_spec(&spec, input, |execution, worker| {
                match &output_dir {
                    Some(dir) => ResultSink::JsonLines(
                        dir.join(format!("execution-{execution}-{worker}.jsonl")),
                    ),
                    None => ResultSink::Discard,
                }
            })?;
            cluster.drive(conductor).await?
        }
        Mode::Distributed => {
            if args.workers.is_empty() {
                return Err("--workers is required in distributed mode".into());
            }
            let cluster = RemoteCluster::new(&args.workers, args.shards_per_worker, conf);
            let outcome = cluster.run(&spec, input).await?;
            if args.shutdown_workers {
                cluster.shutdown_workers().await?;
            }
            outcome
        }
    };

    report(&outcome);
    match outcome.state {
        ExecutionState::Done => Ok(()),
        other => Err(format!("execution ended in {other:?}").into()),
    }
}

fn report(outcome: &ExecutionOutcome) {
    println!(
        "execution={} state={:?} supersteps={} computed={} sent={} recoveries={} written={}",
        outcome.execution,
        outcome.state,
        outcome.stats.supersteps,
        outcome.stats.computed,
        outcome.stats.sent,
        outcome.stats.recoveries,
        outcome.vertices_written
    );
}
