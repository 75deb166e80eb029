//! S3 gateway binary.
//!
//! ```text
//!     Client ──▶ net::Listener ──▶ http::server ──▶ gateway::controller
//!                                                     │
//!                        rewrite (addressing, headers, query)
//!                                                     │
//!                        upstream (pool, deadline, retries) ──▶ S3 backend
//!                                                     │
//!     Client ◀── http::response (streamed body) ◀─────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use s3_gateway::backend::resolve;
use s3_gateway::config::{read_config, validate_config, ConfigError, GatewayConfig};
use s3_gateway::lifecycle::{spawn_signal_handler, Shutdown};
use s3_gateway::net::Listener;
use s3_gateway::observability::{init_logging, metrics};
use s3_gateway::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "s3-gateway", version, about = "Reverse proxy gateway for S3-compatible storage")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "S3_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(long)]
    bind: Option<String>,

    /// Override `upstream.host`.
    #[arg(long)]
    upstream_host: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

fn load(cli: &Cli) -> Result<GatewayConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(host) = &cli.upstream_host {
        config.upstream.host = host.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    resolve(&config.upstream)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("s3-gateway: invalid configuration: {e}");
            return ExitCode::from(2);
        }
    };
    if cli.check {
        println!("configuration ok");
        return ExitCode::SUCCESS;
    }

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("s3-gateway: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Gateway failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "s3-gateway starting");

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let server = HttpServer::new(config)?;
    let listener = Listener::bind(&server.config().listener).await?;

    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();
    spawn_signal_handler(shutdown);

    server.run(listener, shutdown_rx).await?;
    Ok(())
}
