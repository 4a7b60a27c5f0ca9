//! RPC resilience daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller ──submit──▶ queue ──dispatch──▶ retry executor ──▶ provider selector
//!                        ▲                       │                    │
//!                        │ park (no capacity)    │ outcome            │ quota / breaker / health
//!                        └───────────────────────┤                    ▼
//!                                                ▼             provider registry
//!                                        outcome recorder ──────────▲
//!                                                │
//!                                                ▼
//!                                      outcomes-YYYY-MM-DD.jsonl
//!
//!   background: quota windows · health probes · pruner · config watcher
//!   surfaces:   /admin status API · Prometheus metrics
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use rpc_resilience::admin::{self, AdminState};
use rpc_resilience::config::load_config;
use rpc_resilience::config::watcher::ConfigWatcher;
use rpc_resilience::lifecycle::signals::shutdown_signal;
use rpc_resilience::observability::{logging, metrics};
use rpc_resilience::ResilienceLayer;

#[derive(Parser)]
#[command(name = "rpc-resilience")]
#[command(about = "Resilience layer for JSON-RPC provider pools", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "resilience.toml")]
    config: PathBuf,

    /// Do not reload the configuration when the file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init_tracing(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "rpc-resilience starting"
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

    let admin_config = config.admin.clone();
    let layer = Arc::new(ResilienceLayer::new(config)?);
    layer.start();

    let mut admin_task = None;
    if admin_config.enabled {
        let listener = TcpListener::bind(&admin_config.bind_address).await?;
        let state = AdminState::new(Arc::clone(&layer), admin_config.api_key.as_str());
        admin_task = Some(tokio::spawn(admin::serve(listener, state, layer.shutdown_signal())));
    }

    // keep the watcher alive for the life of the process
    let mut _watcher = None;
    if !args.no_watch {
        let (watcher, mut updates) = ConfigWatcher::new(&args.config);
        match watcher.run() {
            Ok(handle) => {
                _watcher = Some(handle);
                let layer = Arc::clone(&layer);
                tokio::spawn(async move {
                    while let Some(next) = updates.recv().await {
                        if let Err(e) = layer.reload(next) {
                            tracing::error!(error = %e, "Rejected reloaded configuration");
                        }
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled"),
        }
    }

    shutdown_signal().await;
    layer.shutdown().await;
    if let Some(task) = admin_task {
        match task.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "Admin API stopped with error"),
            Err(e) => tracing::warn!(error = %e, "Admin API task failed"),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
