//! Minimal read-only HTTP status endpoint for a worker server or a
//! coordinator.

use crate::job_mapping::JobMapping;
use pregel_common::error::{PregelError, PregelResult};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.as_bytes().to_vec(),
        }
    }
}

/// Serves `/healthz` and `/executions` for `mapping` until the task is dropped.
pub async fn serve_status(addr: SocketAddr, mapping: Arc<JobMapping>) -> PregelResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| PregelError::Internal(format!("bind status listener: {e}")))?;
    info!(%addr, "status endpoint listening");
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| PregelError::Internal(format!("accept status connection: {e}")))?;
        let mapping = mapping.clone();
        tokio::spawn(async move {
            if let Err(e) = answer(stream, &mapping).await {
                debug!(%peer, error = %e, "status request dropped");
            }
        });
    }
}

async fn answer(mut stream: TcpStream, mapping: &JobMapping) -> PregelResult<()> {
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }
    let request = String::from_utf8_lossy(&buf[..n]);
    let response = match parse_path(&request) {
        Some(path) => route(mapping, &path),
        None => HttpResponse::text(405, "only GET is served"),
    };
    write_response(&mut stream, response).await
}

#[derive(Serialize)]
struct WorkerStatus {
    execution: u64,
    worker: String,
    state: String,
}

#[derive(Serialize)]
struct ConductorStatus {
    execution: u64,
    algorithm: String,
    state: String,
    supersteps: u64,
}

fn route(mapping: &JobMapping, path: &str) -> HttpResponse {
    match path {
        "/healthz" => HttpResponse::text(200, "ok"),
        "/executions" => {
            let workers: Vec<WorkerStatus> = mapping
                .worker_executions()
                .into_iter()
                .filter_map(|e| mapping.worker(e).ok())
                .map(|w| WorkerStatus {
                    execution: w.execution_number().0,
                    worker: w.worker_id().to_string(),
                    state: w.state().to_string(),
                })
                .collect();
            let conductors: Vec<ConductorStatus> = mapping
                .conductor_executions()
                .into_iter()
                .filter_map(|e| mapping.conductor(e))
                .map(|c| ConductorStatus {
                    execution: c.execution().0,
                    algorithm: c.algorithm().to_string(),
                    state: format!("{:?}", c.state()),
                    supersteps: c.stats().supersteps,
                })
                .collect();
            let body = serde_json::json!({ "workers": workers, "conductors": conductors });
            HttpResponse {
                status: 200,
                content_type: "application/json",
                body: body.to_string().into_bytes(),
            }
        }
        _ => HttpResponse::text(404, "not found"),
    }
}

/// Path of a `GET` request line, without any query string.
fn parse_path(request: &str) -> Option<String> {
    let mut parts = request.lines().next()?.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let target = parts.next()?;
    Some(target.split('?').next().unwrap_or(target).to_string())
}

async fn write_response(stream: &mut TcpStream, resp: HttpResponse) -> PregelResult<()> {
    let reason = match resp.status {
        200 => "OK",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Internal Server Error",
    };
    let header = format!(
        "HTTP/1.1 {} {reason}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        resp.status,
        resp.content_type,
        resp.body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(&resp.body).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_yields_path() {
        assert_eq!(
            parse_path("GET /executions?pretty=1 HTTP/1.1\r\nHost: x\r\n\r\n").as_deref(),
            Some("/executions")
        );
        assert_eq!(parse_path("POST / HTTP/1.1"), None);
    }

    #[test]
    fn empty_mapping_reports_no_executions() {
        let mapping = JobMapping::new();
        let resp = route(&mapping, "/executions");
        assert_eq!(resp.status, 200);
        let v: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(v["workers"].as_array().map(|a| a.len()), Some(0));
        assert_eq!(route(&mapping, "/nope").status, 404);
    }
}
