//! Daily job materializer and stale-job reaper.

use anyhow::Result;
use chrono::{Datelike, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domains::accounts::Account;

use super::job::{EnqueueOptions, EnqueueOutcome, FetchJob, JobKind};

/// Mailbox scans look back this many days from today.
const MAILBOX_LOOKBACK_DAYS: i64 = 3;

/// Seed today's jobs: one mailbox job and one current-period document
/// job per active account, skipping scopes that already have a live job
/// or already ran today.
pub async fn materialize_daily_jobs(pool: &PgPool) -> Result<usize> {
    let today = Utc::now().date_naive();
    let period = format!("{:04}{:02}", today.year(), today.month());
    let mut created = 0;

    for account in Account::list_active(pool).await? {
        let mailbox_scope = today.to_string();
        if should_materialize(account.id, JobKind::Mailbox, &mailbox_scope, pool).await? {
            let options = EnqueueOptions {
                headless: true,
                date_from: Some(today - Duration::days(MAILBOX_LOOKBACK_DAYS)),
                date_to: Some(today),
                ..Default::default()
            };
            if enqueue_counted(account.id, JobKind::Mailbox, &mailbox_scope, options, pool).await? {
                created += 1;
            }
        }

        if should_materialize(account.id, JobKind::Documents, &period, pool).await? {
            let options = EnqueueOptions {
                headless: true,
                ..Default::default()
            };
            if enqueue_counted(account.id, JobKind::Documents, &period, options, pool).await? {
                created += 1;
            }
        }
    }

    if created > 0 {
        tracing::info!(created, "materialized daily jobs");
    }
    Ok(created)
}

/// No duplicate work: skip when a job for the scope is live or was
/// already created today.
async fn should_materialize(
    account_id: Uuid,
    kind: JobKind,
    scope_key: &str,
    pool: &PgPool,
) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM fetch_jobs
            WHERE account_id = $1 AND kind = $2 AND scope_key = $3
              AND (status IN ('pending', 'running') OR created_at::date = CURRENT_DATE)
        )
        "#,
    )
    .bind(account_id)
    .bind(kind)
    .bind(scope_key)
    .fetch_one(pool)
    .await?;
    Ok(!exists)
}

async fn enqueue_counted(
    account_id: Uuid,
    kind: JobKind,
    scope_key: &str,
    options: EnqueueOptions,
    pool: &PgPool,
) -> Result<bool> {
    match FetchJob::enqueue(account_id, kind, scope_key, options, pool).await? {
        EnqueueOutcome::Created(_) | EnqueueOutcome::Adopted(_) => Ok(true),
        EnqueueOutcome::RejectedRunning(_) => Ok(false),
    }
}

/// Reclaim jobs stuck in RUNNING past the max runtime (crashed worker).
/// They go to ERROR but stay queued, so a healthy worker retries them.
pub async fn reap_stale_jobs(max_runtime_secs: i64, pool: &PgPool) -> Result<u64> {
    let reaped = sqlx::query(
        r#"
        UPDATE fetch_jobs
        SET status = 'error',
            queued = TRUE,
            last_error = 'reclaimed: exceeded max runtime',
            finished_at = NOW()
        WHERE status = 'running'
          AND started_at < NOW() - ($1 || ' seconds')::INTERVAL
        "#,
    )
    .bind(max_runtime_secs.to_string())
    .execute(pool)
    .await?
    .rows_affected();

    if reaped > 0 {
        tracing::warn!(reaped, "reclaimed stale running jobs");
    }
    Ok(reaped)
}
