//! Conversion between hyper requests/responses and the forwarding engine.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::{Method, Request, Response};
use tracing::{debug, error};

use super::headers::headers_to_map;
use super::{ForwardingEngine, ProxyError, ProxyRequest, ProxyResponse, RouterTransport};
use crate::metrics;

/// Handle one inbound request end to end.
///
/// Errors never escape: they are logged and turned into a JSON error
/// response (`502` when the router could not be reached).
///
/// Once the body is buffered, the forwarding cycle runs on its own task, so
/// a client that hangs up does not cut off a login or retry in flight.
pub async fn handle_request<T, B>(
    engine: Arc<ForwardingEngine<T>>,
    req: Request<B>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    T: RouterTransport + 'static,
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let start_time = Instant::now();
    let method = req.method().clone();
    debug!("Received request: {} {}", method, req.uri());

    let result = match into_proxy_request(req).await {
        Ok(proxy_request) => {
            tokio::spawn(async move { engine.handle(&proxy_request).await })
                .await
                .unwrap_or_else(|e| Err(ProxyError::from(e)))
        }
        Err(e) => Err(e),
    };

    let response = match result {
        Ok(proxy_response) => into_hyper_response(proxy_response),
        Err(e) => {
            error!("Request {} failed: {}", method, e);
            e.into_response()
        }
    };

    let status = response.status().as_u16();
    let duration_ms = start_time.elapsed().as_secs_f64() * 1000.0;
    metrics::record_request(method.as_str(), status);
    metrics::record_proxy_duration(method.as_str(), duration_ms);
    Ok(response)
}

/// Build a `ProxyRequest`, buffering the whole body unless the method is GET.
pub async fn into_proxy_request<B>(req: Request<B>) -> Result<ProxyRequest, ProxyError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let headers = headers_to_map(&parts.headers)?;

    let body = if parts.method == Method::GET {
        None
    } else {
        let collected = body
            .collect()
            .await
            .map_err(|e| ProxyError::RequestBody(e.into()))?;
        Some(collected.to_bytes())
    };

    Ok(ProxyRequest {
        method: parts.method,
        path,
        headers,
        body,
    })
}

/// Reproduce a router response for the client: same status, same body,
/// every header value including repeated names.
///
/// `HeaderMap` groups values by name: names keep the order of their first
/// appearance and repeated values keep their relative order, but values of
/// different names that were interleaved upstream come out grouped.
pub fn into_hyper_response(response: ProxyResponse) -> Response<Full<Bytes>> {
    let mut hyper_response = Response::new(Full::new(response.body));
    *hyper_response.status_mut() = response.status;
    let headers = hyper_response.headers_mut();
    for (name, value) in response.headers {
        headers.append(name, value);
    }
    hyper_response
}
