//! Background jobs
use crate::context::AppContext;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

/// Health check period in seconds
const HEALTH_CHECK_INTERVAL_SECS: u64 = 300;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs. Jobs stop when the context's shutdown token
    /// is cancelled.
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        let sweep_secs = self.context.config.jobs.key_sweep_interval_secs;
        if sweep_secs > 0 {
            tokio::spawn(Self::exhausted_key_sweep_job(
                Arc::clone(&self),
                Duration::from_secs(sweep_secs),
            ));
        } else {
            info!("Exhausted key sweep disabled");
        }

        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Invalidate exhausted keys
    async fn exhausted_key_sweep_job(scheduler: Arc<Self>, period: Duration) {
        let mut interval = interval(period);
        let shutdown = scheduler.context.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            info!("Running exhausted key sweep");

            match tasks::sweep_exhausted_keys(&scheduler.context).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Invalidated {} exhausted registration keys", count);
                    }
                }
                Err(e) => error!("Failed to sweep exhausted keys: {}", e),
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(HEALTH_CHECK_INTERVAL_SECS));
        let shutdown = scheduler.context.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = tasks::health_check(&scheduler.context).await {
                error!("Health check failed: {}", e);
            }
        }
    }
}
