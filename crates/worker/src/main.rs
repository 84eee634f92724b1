//! Glowlab maintenance worker
//!
//! Runs scheduled jobs against the ledger. Currently one job: expiring stale
//! pending orders the provider never confirmed.

mod expiry;

use std::sync::Arc;

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::EnvFilter;

use glowlab_billing::{Ledger, PgLedger};

/// Sweep every 10 minutes
const EXPIRY_SCHEDULE: &str = "0 */10 * * * *";
const DEFAULT_MAX_AGE_HOURS: i64 = 24;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let max_age_hours = std::env::var("ORDER_EXPIRY_HOURS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_AGE_HOURS);

    let pool = glowlab_shared::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    let ledger: Arc<dyn Ledger> = Arc::new(PgLedger::new(pool));

    tracing::info!(
        schedule = EXPIRY_SCHEDULE,
        max_age_hours = max_age_hours,
        "Glowlab worker starting"
    );

    let scheduler = JobScheduler::new()
        .await
        .context("Failed to create scheduler")?;

    let job_ledger = ledger.clone();
    let expiry_job = Job::new_async(EXPIRY_SCHEDULE, move |_id, _scheduler| {
        let ledger = job_ledger.clone();
        Box::pin(async move {
            expiry::expire_stale_orders(ledger, max_age_hours).await;
        })
    })
    .context("Failed to create expiry job")?;

    scheduler
        .add(expiry_job)
        .await
        .context("Failed to schedule expiry job")?;
    scheduler.start().await.context("Failed to start scheduler")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Glowlab worker shutting down");

    Ok(())
}
