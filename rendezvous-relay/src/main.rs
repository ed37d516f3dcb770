//! Rendezvous relay: pairs two WebRTC peers per room and forwards their
//! signaling messages.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8089
//! cargo run --bin rendezvous-relay
//!
//! # Custom address and room server
//! cargo run --bin rendezvous-relay -- --bind 127.0.0.1:9000 --room-server https://rooms.example
//!
//! # Or via environment variables
//! RENDEZVOUS_ADDR=127.0.0.1:9000 cargo run --bin rendezvous-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use rendezvous_relay::config::{RelayCliArgs, RelayConfig};
use rendezvous_relay::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        room_server = %config.room_server,
        register_timeout_secs = config.register_timeout_secs,
        "starting rendezvous relay"
    );

    let state = Arc::new(RelayState::with_config(&config));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutting down");
    };

    match relay::start_server_with_shutdown(&config.bind_addr, state, shutdown).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
