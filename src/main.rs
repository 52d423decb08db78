//! Paynotify payment-fulfilled notification service.
//!
//! Main entry point. Wires the delivery engine to the HTTP API and
//! coordinates graceful startup and shutdown.

use anyhow::{Context, Result};
use paynotify_api::{AppState, ServiceConfig};
use paynotify_delivery::{DeliveryEngine, DeliveryPolicy};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::load()?;
    init_tracing(&config.rust_log)?;

    info!("Starting paynotify service");

    let addr = config.parse_server_addr()?;
    let policy = DeliveryPolicy::from_env().context("Failed to resolve webhook delivery policy")?;

    let mut engine = DeliveryEngine::new(policy).context("Failed to create delivery engine")?;
    engine.start().await.context("Failed to start delivery engine")?;

    info!(
        %addr,
        webhook_url = %engine.policy().url,
        request_timeout_secs = config.request_timeout,
        "Paynotify is ready to accept fulfilled payments"
    );

    let state = AppState::new(engine.handle(), config);
    let served = paynotify_api::start_server(state, addr).await;

    // The server has drained its requests; nothing can submit any more.
    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "Delivery engine did not shut down cleanly");
    }

    served.context("HTTP server failed")?;

    info!("Paynotify shutdown complete");
    Ok(())
}

/// Initializes tracing, preferring `RUST_LOG` directives from the
/// environment over the configured default.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("Invalid RUST_LOG filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to install tracing subscriber")
}
