//! Router HTTP client.
//!
//! All calls to the router go through one `reqwest::Client` that owns the
//! session cookie jar, so a cookie obtained by one request's login is
//! presented by every later request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hyper::header::{HeaderMap, HeaderValue, COOKIE};
use hyper::Method;
use once_cell::sync::OnceCell;
use reqwest::cookie::{CookieStore, Jar};
use serde_json::Value;
use tracing::{debug, error, info};

use super::headers::map_to_headers;
use super::{ProxyError, ProxyRequest, ProxyResponse};
use crate::config::{Config, ConnectionPoolConfig};
use crate::metrics;

/// What the forwarding engine needs from the router connection.
#[async_trait]
pub trait RouterTransport: Send + Sync {
    /// Replay a client request against the router.
    async fn send(&self, request: &ProxyRequest) -> Result<ProxyResponse, ProxyError>;

    /// Call an authentication endpoint, optionally with a JSON body.
    async fn send_auth(
        &self,
        method: Method,
        path: &str,
        json: Option<&Value>,
    ) -> Result<ProxyResponse, ProxyError>;
}

/// The single shared connection to the router.
///
/// The underlying client is built on first use. The cookie jar exists from
/// construction on and is never replaced; it accepts cookies from bare IP
/// hosts and performs no public-suffix filtering.
pub struct UpstreamClient {
    base_url: String,
    pool: ConnectionPoolConfig,
    session: Arc<Jar>,
    client: OnceCell<reqwest::Client>,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>, pool: ConnectionPoolConfig) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            pool,
            session: Arc::new(Jar::default()),
            client: OnceCell::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.router_base_url(), config.connection_pool.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The shared cookie jar.
    pub fn session(&self) -> &Arc<Jar> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Append the session cookies to a client-supplied `Cookie` header.
    ///
    /// reqwest only consults the jar when the request carries no `Cookie`
    /// header of its own, so the merge has to happen here. The client's pairs
    /// come first and are left as they are.
    fn merge_session_cookies(
        &self,
        url: &str,
        headers: &mut HeaderMap,
    ) -> Result<(), ProxyError> {
        let Some(client_cookies) = headers.get(COOKIE) else {
            return Ok(());
        };
        let parsed = reqwest::Url::parse(url).map_err(|e| ProxyError::transport(url, e))?;
        let Some(session_cookies) = self.session.cookies(&parsed) else {
            return Ok(());
        };

        let mut merged = client_cookies.as_bytes().to_vec();
        merged.extend_from_slice(b"; ");
        merged.extend_from_slice(session_cookies.as_bytes());
        let merged = HeaderValue::from_bytes(&merged)
            .map_err(|_| ProxyError::InvalidHeader(COOKIE.to_string()))?;
        headers.insert(COOKIE, merged);
        Ok(())
    }

    fn client(&self) -> Result<&reqwest::Client, ProxyError> {
        self.client.get_or_try_init(|| {
            info!(
                "Creating shared router client for {} (max_idle={}, idle_timeout={}s, connect_timeout={}s)",
                self.base_url,
                self.pool.max_idle_per_host,
                self.pool.idle_timeout_secs,
                self.pool.connect_timeout_secs
            );
            reqwest::Client::builder()
                .cookie_provider(Arc::clone(&self.session))
                .pool_max_idle_per_host(self.pool.max_idle_per_host)
                .pool_idle_timeout(Duration::from_secs(self.pool.idle_timeout_secs))
                .connect_timeout(Duration::from_secs(self.pool.connect_timeout_secs))
                // Redirects are the client's business, not ours.
                .redirect(reqwest::redirect::Policy::none())
                .no_proxy()
                .build()
                .map_err(|e| ProxyError::transport(self.base_url.clone(), e))
        })
    }

    async fn execute(
        &self,
        kind: &'static str,
        url: String,
        builder: reqwest::RequestBuilder,
    ) -> Result<ProxyResponse, ProxyError> {
        let start = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Router request to {} failed: {}", url, e);
                metrics::record_upstream_error(kind);
                return Err(ProxyError::transport(url, e));
            }
        };

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to read router response body from {}: {}", url, e);
                metrics::record_upstream_error(kind);
                return Err(ProxyError::transport(url, e));
            }
        };

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::record_upstream_duration(kind, duration_ms);
        debug!("Router answered {} for {} in {:.1}ms", status, url, duration_ms);

        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl RouterTransport for UpstreamClient {
    async fn send(&self, request: &ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let url = self.url(&request.path);
        debug!("Forwarding {} {}", request.method, url);

        let mut headers = map_to_headers(&request.headers)?;
        self.merge_session_cookies(&url, &mut headers)?;

        let mut builder = self
            .client()?
            .request(request.method.clone(), &url)
            .headers(headers);
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        self.execute("forward", url, builder).await
    }

    async fn send_auth(
        &self,
        method: Method,
        path: &str,
        json: Option<&Value>,
    ) -> Result<ProxyResponse, ProxyError> {
        let url = self.url(path);
        debug!("Authentication call {} {}", method, url);

        let mut builder = self.client()?.request(method, &url);
        if let Some(json) = json {
            builder = builder.json(json);
        }

        self.execute("auth", url, builder).await
    }
}
