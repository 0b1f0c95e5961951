//! Errors that end a forwarding cycle abnormally.
//!
//! Router-side authentication refusals are not errors: the engine recovers
//! from them by returning the original `401`. What remains here either
//! prevented talking to the router at all or left the cycle without an
//! answer.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};

use crate::auth::AuthError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("router authentication challenge unusable: {0}")]
    Challenge(#[from] AuthError),
    #[error("invalid request header '{0}'")]
    InvalidHeader(String),
    #[error("failed to read request body: {0}")]
    RequestBody(#[source] BoxError),
    #[error("forwarding cycle finished without a router response")]
    IncompleteCycle,
    #[error("forwarding task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ProxyError {
    pub fn transport(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Status returned to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Transport { .. } | Self::Challenge(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidHeader(_) | Self::RequestBody(_) => StatusCode::BAD_REQUEST,
            Self::IncompleteCycle | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        error_response(self.status_code(), &self.to_string())
    }
}

/// JSON error response generated by the proxy itself.
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
