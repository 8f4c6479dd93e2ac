//! Cache status HTTP server
//!
//! Read-only JSON views of the caches plus Prometheus metrics:
//!
//! - `GET /cache/status`   capacity, size and counters per cache
//! - `GET /cache/contents` first path parameter of every cached call
//! - `GET /metrics`        Prometheus text format
//! - `GET /healthz`        liveness

use std::convert::Infallible;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::cache::CacheStats;
use crate::error::Result;
use crate::session::ProxyShared;

/// Body of `GET /cache/status`
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub caches: Vec<CacheStats>,
    pub generated_at: DateTime<Utc>,
}

/// One cache in `GET /cache/contents`
#[derive(Debug, Serialize)]
pub struct CacheContents {
    pub name: &'static str,
    pub identifiers: Vec<String>,
}

/// Body of `GET /cache/contents`
#[derive(Debug, Serialize)]
pub struct ContentsReport {
    pub caches: Vec<CacheContents>,
}

pub fn status_report(shared: &ProxyShared) -> StatusReport {
    StatusReport {
        caches: shared.caches.stats(),
        generated_at: Utc::now(),
    }
}

pub fn contents_report(shared: &ProxyShared) -> ContentsReport {
    ContentsReport {
        caches: shared
            .caches
            .caches()
            .iter()
            .map(|cache| CacheContents {
                name: cache.name(),
                identifiers: cache.identifiers(),
            })
            .collect(),
    }
}

fn respond(status: StatusCode, content_type: HeaderValue, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}

fn json<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec_pretty(value) {
        Ok(body) => respond(
            StatusCode::OK,
            HeaderValue::from_static("application/json"),
            body,
        ),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {}", e)),
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    respond(status, HeaderValue::from_static("text/plain"), body)
}

/// Answer one request
pub fn route(method: &Method, path: &str, shared: &ProxyShared) -> Response<Full<Bytes>> {
    if method != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }
    match path {
        "/cache/status" => json(&status_report(shared)),
        "/cache/contents" => json(&contents_report(shared)),
        "/metrics" => match shared.metrics.encode() {
            Ok((content_type, body)) => respond(
                StatusCode::OK,
                HeaderValue::from_str(&content_type)
                    .unwrap_or_else(|_| HeaderValue::from_static("text/plain")),
                body,
            ),
            Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        "/healthz" | "/livez" => text(StatusCode::OK, "ok"),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

/// Serve status requests until the listener fails
pub async fn run_status_server(listener: TcpListener, shared: Arc<ProxyShared>) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Status server listening on {}", addr);
    }

    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(peer = %peer, "Status connection");
        let io = TokioIo::new(stream);
        let shared = shared.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = route(req.method(), req.uri().path(), &shared);
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Status server connection error: {}", e);
            }
        });
    }
}
