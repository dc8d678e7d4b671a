//! Edge proxy
//!
//! Launches the backend as a child process, waits for it to answer its
//! health endpoint, then fronts it on a single public port.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌────────────────────────────────────────────┐
//!                     │                 EDGE PROXY                 │
//!   Client request    │  ┌──────────┐    ┌───────────────────┐     │
//!  ───────────────────┼─▶│  server  │───▶│ RequestForwarder  │─────┼──▶ Backend
//!                     │  │ (axum)   │    └───────────────────┘     │    (child
//!   WebSocket         │  │          │    ┌───────────────────┐     │     process)
//!  ◀──────────────────┼─▶│          │◀──▶│   StreamRelay     │◀────┼──▶
//!                     │  └──────────┘    └───────────────────┘     │      ▲
//!                     │        │                                   │      │
//!                     │        ▼                                   │      │
//!                     │  ┌──────────┐    ┌───────────────────┐     │      │
//!                     │  │  health  │───▶│ ProcessSupervisor │─────┼──────┘
//!                     │  │ aggregate│    │ spawn / stop      │     │
//!                     │  └──────────┘    └───────────────────┘     │
//!                     └────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use edge_proxy::config::{self, validation::validate_config, EdgeConfig};
use edge_proxy::lifecycle::startup;
use edge_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "edge-proxy")]
#[command(about = "Edge proxy and backend supervisor", long_about = None)]
struct Args {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => EdgeConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Err(errors) = validate_config(&config) {
        return Err(config::ConfigError::Validation(errors).into());
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = %config.backend.url,
        managed = config.backend.managed,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    startup::run(config).await
}
