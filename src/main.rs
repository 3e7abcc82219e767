//! Users gateway.
//!
//! Serves the probe and exercise endpoints behind the admission pipeline.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ request id ──▶ instrumentation ──▶ logging ──▶ rate limit
//!                                                                   │
//!                                                                   ▼
//!     Client ◀── response ◀── circuit breaker ◀── panic recovery ◀── tracing
//!                                 │
//!                                 ▼
//!                         chaos ─▶ handlers
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use users_gateway::config::{load_config, GatewayConfig};
use users_gateway::lifecycle::{shutdown_signal, Shutdown};
use users_gateway::observability::{logging, metrics};
use users_gateway::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "users-gateway", version, about = "Request admission and fault-isolation gateway")]
struct Args {
    /// Path to a TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        "users-gateway starting"
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        requests_per_second = config.rate_limit.requests_per_second,
        burst_size = config.rate_limit.burst_size,
        breaker = %config.circuit_breaker.name,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    HttpServer::new(config).run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
