//! Practicum Admin server binary

use anyhow::Context;
use practicum_admin::{config::LoggingConfig, jobs::JobScheduler, server, AppContext, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ServerConfig::from_env().context("Failed to load configuration")?;

    init_logging(&config.logging);
    tracing::info!(
        "Practicum Admin v{} starting (database {})",
        config.service.version,
        config.storage.database.display()
    );

    // Create application context
    let ctx = AppContext::new(config)
        .await
        .context("Failed to initialize application context")?;

    ctx.bootstrap()
        .await
        .context("Failed to issue bootstrap registration key")?;

    // Start background jobs
    let ctx = Arc::new(ctx);
    let scheduler = Arc::new(JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        shutdown.cancel();
    });

    // Start server
    server::serve((*ctx).clone()).await.context("Server failed")?;

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level)
        .unwrap_or_else(|_| "practicum_admin=debug,tower_http=debug".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(config.json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}
