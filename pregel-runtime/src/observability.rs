//! Process-wide logging and metrics setup for the `pregel-*` binaries.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use pregel_common::error::{PregelError, PregelResult};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// Checked before `RUST_LOG`.
pub const LOG_ENV: &str = "PREGEL_LOG";

/// Engine crates at `info`, dependencies only when they warn.
pub const DEFAULT_LOG_DIRECTIVES: &str =
    "warn,pregel_runtime=info,pregel_api=info,pregel_common=info";

/// An explicit `--log` value wins, then `PREGEL_LOG`, then `RUST_LOG`, then
/// [`DEFAULT_LOG_DIRECTIVES`]. Unparsable sources are skipped.
pub fn log_filter(explicit: Option<&str>) -> EnvFilter {
    explicit
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_env(LOG_ENV).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_DIRECTIVES))
}

/// Safe to call twice; the second subscriber is ignored.
pub fn init_tracing(explicit: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(explicit))
        .with_target(true)
        .try_init();
}

pub fn init_prometheus(addr: SocketAddr) -> PregelResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| PregelError::Internal(format!("prometheus init on {addr}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_parse() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_DIRECTIVES).is_ok());
    }

    #[test]
    fn explicit_directives_win() {
        let filter = log_filter(Some("pregel_runtime::conductor=debug"));
        assert!(filter.to_string().contains("pregel_runtime::conductor=debug"));
    }
}
