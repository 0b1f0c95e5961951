//! Transparent reverse proxy for the Keenetic router REST API.
//!
//! Clients talk plain HTTP to the proxy; whenever the router answers `401`
//! the proxy performs the NDM challenge/response login with the configured
//! account and retries the request once.

pub mod auth;
pub mod config;
pub mod metrics;
pub mod proxy;

pub use config::Config;
pub use proxy::ProxyServer;
