//! This file defines the airmetrics binary entry point.

use airmetrics::app;
use airmetrics::app_state::AppState;
use airmetrics::cli;
use airmetrics::metrics;
use airmetrics::server;
use airmetrics::tracing;

use std::process::exit;
use std::sync::Arc;

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing(&args);
    metrics::register_metrics();
    let state = match AppState::new(&args) {
        Ok(state) => Arc::new(state),
        Err(err) => {
            ::tracing::error!("failed to initialise: {}", err);
            exit(1)
        }
    };
    app::init(&state).await;
    let service = app::service(state);
    if let Err(err) = server::serve(&args, service).await {
        ::tracing::error!("server error: {}", err);
        tracing::shutdown_tracing();
        exit(1)
    }
    tracing::shutdown_tracing();
}
