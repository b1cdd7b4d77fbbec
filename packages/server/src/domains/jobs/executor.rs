//! Dispatches a claimed job to its job family.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domains::accounts::Account;
use crate::domains::documents;
use crate::domains::notifications::{
    run_mailbox_fetch, PgNotificationLedger, ProtocolError, ProtocolOptions,
};
use crate::kernel::traits::CancelCheck;
use crate::kernel::ServerDeps;

use super::job::{FetchJob, JobKind, JobStats};

/// What a job run produced, before status resolution.
#[derive(Debug, Default)]
pub struct ExecReport {
    pub stats: JobStats,
    pub cancelled: bool,
    /// Job-level failure (login, unreadable list, unrecovered error).
    pub fatal_error: Option<String>,
}

/// Polls the claimed job's durable stop flag.
struct JobCancelCheck {
    pool: PgPool,
    job_id: Uuid,
}

#[async_trait]
impl CancelCheck for JobCancelCheck {
    async fn should_stop(&self) -> Result<bool> {
        FetchJob::is_stop_requested(self.job_id, &self.pool).await
    }
}

/// Run one claimed job to completion. Job-level failures come back in
/// the report rather than as an `Err`, so the worker can always
/// finalize.
pub async fn execute_job(deps: &ServerDeps, job: &FetchJob) -> ExecReport {
    let cancel = JobCancelCheck {
        pool: deps.pool.clone(),
        job_id: job.id,
    };

    let result = match job.kind {
        JobKind::Mailbox => run_mailbox(deps, job, &cancel).await,
        JobKind::Documents => run_documents(deps, job, &cancel).await,
    };

    match result {
        Ok(report) => report,
        Err(e) => ExecReport {
            fatal_error: Some(format!("{e:#}")),
            ..Default::default()
        },
    }
}

async fn run_mailbox(
    deps: &ServerDeps,
    job: &FetchJob,
    cancel: &dyn CancelCheck,
) -> Result<ExecReport> {
    let account = Account::find_by_id(job.account_id, &deps.pool).await?;
    let ledger = PgNotificationLedger::new(deps.pool.clone(), account.id);
    let dest_dir = deps.config.artifacts_dir.join(&account.ruc).join("buzon");

    let options = ProtocolOptions {
        max_scan: deps.config.mailbox_max_scan,
        date_from: job.date_from,
        date_to: job.date_to,
        ..Default::default()
    };

    let mut driver = deps
        .drivers
        .mailbox_session(job.headless)
        .await
        .context("opening mailbox driver session")?;

    match run_mailbox_fetch(
        driver.as_mut(),
        &ledger,
        cancel,
        &account.portal_credentials(),
        &dest_dir,
        &options,
    )
    .await
    {
        Ok(report) => Ok(ExecReport {
            stats: report.stats,
            cancelled: report.cancelled,
            fatal_error: None,
        }),
        Err(ProtocolError::Login(msg)) => Ok(ExecReport {
            fatal_error: Some(format!("login failed: {msg}")),
            ..Default::default()
        }),
        Err(ProtocolError::ListUnreadable(msg)) => Ok(ExecReport {
            fatal_error: Some(format!("mailbox unreadable: {msg}")),
            ..Default::default()
        }),
        Err(ProtocolError::Internal(e)) => Err(e),
    }
}

async fn run_documents(
    deps: &ServerDeps,
    job: &FetchJob,
    cancel: &dyn CancelCheck,
) -> Result<ExecReport> {
    let report = documents::run_document_job(deps, job, cancel).await?;
    Ok(ExecReport {
        stats: report.stats,
        cancelled: report.cancelled,
        fatal_error: None,
    })
}
