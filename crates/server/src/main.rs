//! Dairy AI Server - milk yield and mastitis prediction service
//!
//! Loads model artifacts once at startup and serves predictions, model
//! health and metrics over HTTP. Models that fail to load are reported as
//! unavailable; the server starts regardless.

use anyhow::{Context, Result};
use dairy_ai_server::{api, config::ServerConfig};
use serving_lib::{
    ModelHealthReporter, ModelRegistry, PredictionService, ServingMetrics, StructuredLogger,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting dairy-ai-server");

    let config = ServerConfig::load()?;
    info!(
        api_port = config.api_port,
        model_dir = %config.serving.model_dir.display(),
        batch_mode = ?config.serving.batch_mode,
        "Server configured"
    );

    let logger = StructuredLogger::new("dairy-ai-server");

    // One-time artifact load before the listener binds
    let registry = Arc::new(ModelRegistry::load(&config.serving, &logger));
    let service = PredictionService::new(Arc::clone(&registry), config.serving.batch_mode)
        .context("Failed to initialize prediction service")?
        .with_logger(logger.clone());
    let health = ModelHealthReporter::new(Arc::clone(&registry)).with_logger(logger.clone());

    logger.log_startup(
        SERVER_VERSION,
        registry.yield_model().is_available(),
        registry.mastitis_model().is_available(),
    );

    let state = Arc::new(api::AppState::new(
        Arc::new(service),
        health,
        ServingMetrics::new(),
    ));

    let mut api_handle = tokio::spawn(api::serve(config.api_port, state));

    tokio::select! {
        result = &mut api_handle => {
            match result {
                Ok(Ok(())) => info!("API server stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    return Err(e);
                }
                Err(e) => return Err(e).context("API server task panicked"),
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
            api_handle.abort();
        }
    }

    info!("Shutting down");
    Ok(())
}
