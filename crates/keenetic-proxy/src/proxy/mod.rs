//! Proxy server module.
//!
//! This module provides the authenticating reverse proxy:
//! - Forwarding of any request to the router's REST API
//! - Transparent NDM challenge/response login on `401`
//! - A single shared cookie session for all requests
//!
//! # Module Structure
//!
//! - `types` - `ProxyRequest` / `ProxyResponse`
//! - `client` - Router transport trait and the shared HTTP client
//! - `engine` - Forwarding state machine (forward, probe, login, retry)
//! - `handler` - Conversion between hyper requests/responses and the engine
//! - `server` - ProxyServer struct and main run loop
//! - `network` - Listener creation
//! - `headers` - Header names and header conversion helpers
//! - `error` - Request-level errors

mod client;
mod engine;
mod error;
mod handler;
pub mod headers;
mod network;
mod server;
mod types;

pub use client::{RouterTransport, UpstreamClient};
pub use engine::{transition, CycleState, ForwardingEngine};
pub use error::{error_response, ProxyError};
pub use handler::{handle_request, into_hyper_response, into_proxy_request};
pub use network::create_listener;
pub use server::ProxyServer;
pub use types::{ProxyRequest, ProxyResponse};
