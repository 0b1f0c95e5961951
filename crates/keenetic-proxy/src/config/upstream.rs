//! Connection pool settings for the shared router client.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl ConnectionPoolConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("'connection_pool.connect_timeout_secs' must be greater than zero");
        }
        Ok(())
    }
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            idle_timeout_secs: default_pool_idle_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

// A single router backend never needs a large pool.
fn default_pool_max_idle_per_host() -> usize {
    16
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_connect_timeout() -> u64 {
    5
}
