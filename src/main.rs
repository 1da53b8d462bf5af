//! This file defines the dapwire binary entry point.

use dapwire::app;
use dapwire::app_state::AppState;
use dapwire::cli;
use dapwire::metrics;
use dapwire::server;
use dapwire::tracing;

use std::process::exit;

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing();
    if let Err(err) = metrics::register_metrics() {
        eprintln!("failed to register metrics: {}", err);
        exit(1)
    }
    let state = match AppState::new(&args) {
        Ok(state) => state,
        Err(err) => {
            eprintln!("failed to load datasets from {}: {}", args.data_dir, err);
            exit(1)
        }
    };
    if let Err(err) = server::serve(&args, app::service(state)).await {
        eprintln!("server error: {}", err);
        exit(1)
    }
}
