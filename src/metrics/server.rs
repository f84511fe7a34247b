//! HTTP server for the Prometheus endpoint and health probes

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::Metrics;

/// Serves `/metrics`, `/health` and `/ready`
///
/// `/ready` answers 503 until the readiness flag is set, which the runtime
/// does while both bridge channels are connected.
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    addr: SocketAddr,
    ready: Arc<AtomicBool>,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, addr: SocketAddr, ready: Arc<AtomicBool>) -> Self {
        Self {
            metrics,
            addr,
            ready,
        }
    }

    /// Serve until a shutdown signal is received
    pub async fn run(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics server listening on http://{}/metrics", self.addr);

        loop {
            let stream = tokio::select! {
                accepted = listener.accept() => accepted?.0,
                _ = shutdown.recv() => {
                    debug!("Metrics server shutting down");
                    return Ok(());
                }
            };

            let io = TokioIo::new(stream);
            let metrics = self.metrics.clone();
            let ready = self.ready.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let metrics = metrics.clone();
                    let ready = ready.load(Ordering::Relaxed);
                    async move { Ok::<_, Infallible>(route(&req, &metrics, ready)) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn route<B>(req: &Request<B>, metrics: &Metrics, ready: bool) -> Response<Full<Bytes>> {
    match req.uri().path() {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            match encoder.encode(&metrics.registry.gather(), &mut buffer) {
                Ok(()) => {
                    let mut response = text(StatusCode::OK, buffer);
                    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
                        response.headers_mut().insert(CONTENT_TYPE, value);
                    }
                    response
                }
                Err(e) => {
                    error!("Failed to encode metrics: {}", e);
                    text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics")
                }
            }
        }
        "/health" | "/healthz" => text(StatusCode::OK, "OK"),
        "/ready" | "/readyz" if ready => text(StatusCode::OK, "OK"),
        "/ready" | "/readyz" => text(StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    }
}
