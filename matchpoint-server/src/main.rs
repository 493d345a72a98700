//! Matchpoint signaling server -- pairs two players into a room and relays
//! WebRTC negotiation and game-state frames between them.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin matchpoint-server
//!
//! # Run on custom address
//! cargo run --bin matchpoint-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! MATCHPOINT_ADDR=127.0.0.1:8080 cargo run --bin matchpoint-server
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use matchpoint_server::config::{CliArgs, ServerConfig};
use matchpoint_server::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
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

    tracing::info!(addr = %config.bind_addr, "starting matchpoint signaling server");

    let state = Arc::new(RelayState::new());

    match relay::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "signaling server listening");
            let _sweeper =
                relay::spawn_sweeper(state, Duration::from_secs(config.sweep_interval_secs));
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "signaling server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start signaling server");
            std::process::exit(1);
        }
    }
}
