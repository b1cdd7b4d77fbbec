//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! Two tasks run alongside the worker loop:
//! - the daily materializer seeds one job per (account, scope) each day
//! - the reaper reclaims jobs stuck in RUNNING after a worker crash

use anyhow::Result;
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::domains::jobs::{materialize_daily_jobs, reap_stale_jobs};

pub async fn start_scheduler(pool: PgPool, job_max_runtime_secs: i64) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Daily materializer - 06:00 UTC every day
    let materialize_pool = pool.clone();
    let materialize_job = Job::new_async("0 0 6 * * *", move |_uuid, _lock| {
        let pool = materialize_pool.clone();
        Box::pin(async move {
            if let Err(e) = materialize_daily_jobs(&pool).await {
                tracing::error!("Daily materializer failed: {}", e);
            }
        })
    })?;
    scheduler.add(materialize_job).await?;

    // Stale-job reaper - every 10 minutes
    let reap_pool = pool.clone();
    let reap_job = Job::new_async("0 */10 * * * *", move |_uuid, _lock| {
        let pool = reap_pool.clone();
        Box::pin(async move {
            if let Err(e) = reap_stale_jobs(job_max_runtime_secs, &pool).await {
                tracing::error!("Stale-job reaper failed: {}", e);
            }
        })
    })?;
    scheduler.add(reap_job).await?;

    scheduler.start().await?;
    tracing::info!("Scheduled tasks started (daily materializer at 06:00, reaper every 10 min)");
    Ok(scheduler)
}
