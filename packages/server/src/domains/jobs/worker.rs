//! Worker loop: claim → execute → finalize, one job at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::kernel::ServerDeps;

use super::executor::execute_job;
use super::job::{resolve_status, FetchJob};

pub struct JobWorker {
    deps: ServerDeps,
    shutdown: Arc<AtomicBool>,
}

impl JobWorker {
    pub fn new(deps: ServerDeps) -> Self {
        Self {
            deps,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for signaling graceful shutdown from outside the loop.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run until shutdown. The claim is the only cross-worker
    /// synchronization point; external I/O happens with no row lock or
    /// open transaction held.
    pub async fn run(&self) -> Result<()> {
        let poll = Duration::from_secs(self.deps.config.poll_interval_secs);
        tracing::info!(poll_secs = poll.as_secs(), "worker started");

        while !self.shutdown.load(Ordering::Relaxed) {
            let job = match FetchJob::claim_next(&self.deps.pool).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::time::sleep(poll).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "claim failed");
                    tokio::time::sleep(poll).await;
                    continue;
                }
            };

            self.run_one(job).await;
        }

        tracing::info!("worker stopped");
        Ok(())
    }

    async fn run_one(&self, job: FetchJob) {
        tracing::info!(
            job_id = %job.id,
            kind = ?job.kind,
            scope = %job.scope_key,
            "job claimed"
        );

        let report = execute_job(&self.deps, &job).await;
        let status = resolve_status(
            report.cancelled,
            report.fatal_error.is_some(),
            &report.stats,
        );

        if let Err(e) = FetchJob::finalize(
            job.id,
            status,
            &report.stats,
            report.fatal_error.as_deref(),
            &self.deps.pool,
        )
        .await
        {
            tracing::error!(job_id = %job.id, error = %e, "finalize failed");
            return;
        }

        tracing::info!(
            job_id = %job.id,
            status = ?status,
            ok = report.stats.ok,
            error = report.stats.error,
            auth = report.stats.auth,
            not_found = report.stats.not_found,
            skipped = report.stats.skipped,
            "job finished"
        );
    }
}
