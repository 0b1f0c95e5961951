//! Prometheus metrics for keenetic-proxy.
//!
//! Tracks final responses, authentication outcomes and router call latency.

use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::proxy::error_response;

lazy_static! {
    /// Final responses sent to clients
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "keenetic_proxy_requests_total",
        "Total number of requests answered by the proxy",
        &["method", "status"]
    )
    .unwrap();

    /// Authentication sub-cycles by outcome
    pub static ref AUTH_ATTEMPTS_TOTAL: CounterVec = register_counter_vec!(
        "keenetic_proxy_auth_attempts_total",
        "Authentication attempts triggered by a 401 from the router",
        &["outcome"]  // session_valid|login_ok|login_failed|probe_aborted|missing_challenge
    )
    .unwrap();

    /// Router calls that failed at the transport level
    pub static ref UPSTREAM_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "keenetic_proxy_upstream_errors_total",
        "Router calls that failed before a response was read",
        &["kind"]  // forward|auth
    )
    .unwrap();

    /// Router call duration
    pub static ref UPSTREAM_REQUEST_DURATION_MS: HistogramVec = register_histogram_vec!(
        "keenetic_proxy_upstream_request_duration_ms",
        "Duration of router calls in milliseconds",
        &["kind"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Whole forwarding cycle duration
    pub static ref PROXY_REQUEST_DURATION_MS: HistogramVec = register_histogram_vec!(
        "keenetic_proxy_request_duration_ms",
        "Total request duration including authentication",
        &["method"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub fn record_request(method: &str, status: u16) {
    REQUESTS_TOTAL
        .with_label_values(&[method, &status.to_string()])
        .inc();
}

pub fn record_auth_attempt(outcome: &str) {
    AUTH_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_upstream_error(kind: &str) {
    UPSTREAM_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_upstream_duration(kind: &str, duration_ms: f64) {
    UPSTREAM_REQUEST_DURATION_MS
        .with_label_values(&[kind])
        .observe(duration_ms);
}

pub fn record_proxy_duration(method: &str, duration_ms: f64) {
    PROXY_REQUEST_DURATION_MS
        .with_label_values(&[method])
        .observe(duration_ms);
}

async fn metrics_route<B>(req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET || req.uri().path() != "/metrics" {
        return Ok(error_response(StatusCode::NOT_FOUND, "Not Found"));
    }

    match collect_metrics() {
        Ok(text) => {
            let mut response = Response::new(Full::new(Bytes::from(text)));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            Ok(response)
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            Ok(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics",
            ))
        }
    }
}

/// Serve `GET /metrics` on `listener` until the task is dropped.
pub async fn serve_metrics(listener: TcpListener) -> Result<(), anyhow::Error> {
    info!("Metrics listening on http://{}/metrics", listener.local_addr()?);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_route))
                .await
            {
                debug!("Metrics connection error: {}", e);
            }
        });
    }
}
