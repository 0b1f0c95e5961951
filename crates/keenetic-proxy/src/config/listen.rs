//! Listen and metrics configuration.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
pub const DEFAULT_LISTEN_PORT: u16 = 8000;

pub(super) fn default_host() -> String {
    DEFAULT_LISTEN_HOST.to_string()
}

pub(super) fn default_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_metrics_port(),
        }
    }
}
