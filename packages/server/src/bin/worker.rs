//! Worker process: runs the claim→execute→finalize loop plus the
//! scheduled materializer and reaper.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use server::config::Config;
use server::domains::jobs::JobWorker;
use server::kernel::portal_client::PortalDriverFactory;
use server::kernel::scheduled_tasks::start_scheduler;
use server::kernel::ServerDeps;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("connecting to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running migrations")?;

    let drivers = Arc::new(PortalDriverFactory::new(&config.portal_driver_url));
    let sire = Arc::new(sire_client::SireClient::new());
    let deps = ServerDeps::new(pool.clone(), config.clone(), drivers, sire);

    let _scheduler = start_scheduler(pool.clone(), config.job_max_runtime_secs).await?;

    // Seed today's jobs once on startup; the cron covers the rest.
    if let Err(e) = server::domains::jobs::materialize_daily_jobs(&pool).await {
        tracing::error!(error = %e, "startup materialization failed");
    }

    let worker = JobWorker::new(deps);
    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    worker.run().await
}
