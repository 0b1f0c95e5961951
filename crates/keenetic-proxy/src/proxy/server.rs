//! ProxyServer struct and main run loop.
//!
//! This module contains the ProxyServer struct, which owns the shared
//! forwarding engine, and the loop that accepts connections and hands each
//! request to it.

use super::client::UpstreamClient;
use super::engine::ForwardingEngine;
use super::handler::handle_request;
use super::network::create_listener;
use crate::config::{resolve_addr, Config};
use crate::metrics::serve_metrics;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// The main proxy server struct.
pub struct ProxyServer {
    config: Arc<Config>,
    engine: Arc<ForwardingEngine<UpstreamClient>>,
}

impl ProxyServer {
    /// Create a new ProxyServer from configuration.
    ///
    /// The router client and its cookie session are created here once and
    /// shared by every connection.
    pub fn new(config: Config) -> Self {
        let transport = UpstreamClient::from_config(&config);
        let engine = ForwardingEngine::new(transport, config.credentials());

        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
        }
    }

    /// Bind the configured addresses and serve until Ctrl-C.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let addr = self.config.listen_addr()?;
        let listener = create_listener(addr)?;

        let metrics_task = match self.config.metrics {
            Some(ref metrics) => {
                let metrics_addr = resolve_addr(&metrics.host, metrics.port)?;
                let metrics_listener = create_listener(metrics_addr)?;
                Some(tokio::spawn(async move {
                    if let Err(e) = serve_metrics(metrics_listener).await {
                        error!("Metrics listener stopped: {}", e);
                    }
                }))
            }
            None => None,
        };

        let result = tokio::select! {
            result = self.serve(listener) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                Ok(())
            }
        };

        if let Some(task) = metrics_task {
            task.abort();
        }
        result
    }

    /// Accept connections on `listener` and proxy their requests.
    pub async fn serve(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        info!("Listening on http://{}", listener.local_addr()?);
        info!(
            "Proxying to {} as '{}'",
            self.engine.transport().base_url(),
            self.config.login
        );

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let engine = Arc::clone(&self.engine);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| handle_request(Arc::clone(&engine), req));

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }
}
