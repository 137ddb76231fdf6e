mod api;
mod auth;
mod config;
mod engine;
mod error;
mod geo;
mod models;
mod observability;
mod providers;
mod state;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::providers::payments::SimulatedProcessor;
use crate::providers::routing::{RoutingProvider, SimulatedRouting};

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let routing: Option<Arc<dyn RoutingProvider>> = if config.routing_enabled {
        Some(Arc::new(SimulatedRouting {
            road_speed_kmh: config.fallback_speed_kmh,
        }))
    } else {
        None
    };

    let app_state = state::AppState::new(config.clone(), routing, Arc::new(SimulatedProcessor));
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(engine::payouts::run_payout_retry(shared_state.clone()));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
