use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use keenetic_proxy::{Config, ProxyServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Authenticating reverse proxy for the Keenetic REST API
#[derive(Parser, Debug)]
#[command(name = "keenetic-proxy")]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON or YAML). Defaults to config.json next to the executable.
    #[arg(short, long, env = "KEENETIC_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen host from the configuration
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port from the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate()?;

    info!("Loaded configuration from {}", config_path.display());

    ProxyServer::new(config).run().await
}
