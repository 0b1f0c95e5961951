//! Configuration types for the Keenetic proxy.

mod listen;
mod upstream;

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::auth::Credentials;

pub use listen::{MetricsConfig, DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT};
pub use upstream::ConnectionPoolConfig;

/// File name looked up next to the executable when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Proxy configuration, read once at startup.
///
/// The file is parsed with `serde_yaml`, so both YAML and the JSON layout
/// used by existing `config.json` files are accepted.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Router address, `host` or `host:port`, without scheme.
    pub router_host: String,
    pub login: String,
    pub password: String,

    /// Address the proxy listens on.
    #[serde(default = "listen::default_host")]
    pub host: String,
    #[serde(default = "listen::default_port")]
    pub port: u16,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,

    /// Prometheus endpoint; disabled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

impl Config {
    /// Minimal configuration with default listen address and pool settings.
    pub fn new(
        router_host: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            router_host: router_host.into(),
            login: login.into(),
            password: password.into(),
            host: listen::default_host(),
            port: listen::default_port(),
            connection_pool: ConnectionPoolConfig::default(),
            metrics: None,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_str_contents(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse and validate configuration text.
    pub fn from_str_contents(contents: &str) -> Result<Self, anyhow::Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// `config.json` beside the running executable, or in the working
    /// directory if the executable path is unavailable.
    pub fn default_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let router_host = self.router_host.trim();
        if router_host.is_empty() {
            anyhow::bail!("'router_host' must not be empty");
        }
        if router_host.contains("://") {
            anyhow::bail!(
                "'router_host' must be a bare host or host:port without scheme, got '{}'",
                self.router_host
            );
        }
        if router_host.contains('/') {
            anyhow::bail!(
                "'router_host' must not contain a path, got '{}'",
                self.router_host
            );
        }
        if self.login.is_empty() {
            anyhow::bail!("'login' must not be empty");
        }
        if self.host.trim().is_empty() {
            anyhow::bail!("'host' must not be empty");
        }

        self.connection_pool.validate()?;

        if let Some(ref metrics) = self.metrics {
            if metrics.port == self.port && metrics.host == self.host {
                anyhow::bail!(
                    "'metrics.port' {} collides with the proxy listener on {}",
                    metrics.port,
                    self.host
                );
            }
        }

        Ok(())
    }

    /// Router base URL every upstream call is routed to.
    pub fn router_base_url(&self) -> String {
        format!("http://{}", self.router_host.trim())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.login.clone(), self.password.clone())
    }

    /// Resolve the configured listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, anyhow::Error> {
        resolve_addr(&self.host, self.port)
    }
}

pub(crate) fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, anyhow::Error> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve listen address {host}:{port}"))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("No address found for {host}:{port}"))
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("router_host", &self.router_host)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connection_pool", &self.connection_pool)
            .field("metrics", &self.metrics)
            .finish()
    }
}
