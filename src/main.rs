//! Backend service.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                   BACKEND SERVICE                     │
//!   HTTP / WS      │  ┌────────┐   ┌─────────┐   ┌──────────────────────┐  │
//!  ────────────────┼─▶│  http  │──▶│ health  │   │ realtime (ChatGateway│  │
//!                  │  │ server │──▶│ admin   │   │  rooms, events)      │  │
//!                  │  └────────┘   └─────────┘   └──────────────────────┘  │
//!                  │                                                       │
//!                  │  ┌───────────┐   ┌────────┐   ┌───────┐   ┌───────┐  │
//!                  │  │ scheduler │──▶│  lock  │──▶│ cache │   │ queue │  │
//!                  │  │ cron jobs │   │ SET NX │   │ redis │   │workers│  │
//!                  │  └───────────┘   └────────┘   └───────┘   └───────┘  │
//!                  │                                                       │
//!   SIGTERM/INT    │  ┌─────────────────────────────────────────────────┐  │
//!  ────────────────┼─▶│ lifecycle: ordered teardown under a deadline     │  │
//!                  │  └─────────────────────────────────────────────────┘  │
//!                  └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use backend_service::config;
use backend_service::lifecycle::{self, signals};
use backend_service::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "backend-service", version, about = "Backend service with graceful shutdown")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = config::load(args.config.as_deref())?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "backend-service starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        cache = ?config.cache.backend,
        shutdown_timeout_ms = config.shutdown.timeout_ms,
        queue_drain_timeout_ms = config.shutdown.queue_drain_timeout().as_millis() as u64,
        websocket_close_timeout_ms = config.shutdown.websocket_close_timeout().as_millis() as u64,
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

    let app = lifecycle::build(config).await?;
    tracing::info!(address = %app.local_addr()?, "Listening for connections");

    let coordinator = app.coordinator.clone();
    tokio::spawn(async move {
        if let Err(e) = app.serve().await {
            tracing::error!(error = %e, "HTTP server failed");
        }
    });

    let outcome = signals::wait_for_shutdown(coordinator).await?;
    std::process::exit(outcome.exit_code());
}
