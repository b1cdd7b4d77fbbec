//! Job model for queued retrieval work.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Bulk notification fetch from the portal mailbox.
    Mailbox,
    /// Per-item document evidence fetch for one period.
    Documents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Ok,
    Partial,
    Error,
    Stopped,
    StopRequested,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Ok | JobStatus::Partial | JobStatus::Error | JobStatus::Stopped
        )
    }

    /// Statuses the claim query may pick up from the queue.
    pub fn is_claimable(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Error | JobStatus::Partial
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "retry_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// Process every item the scope selects.
    #[default]
    Full,
    /// Only items with no evidence yet.
    OnlyPending,
    /// Only items whose last attempt failed.
    OnlyFailed,
}

// ============================================================================
// Stats
// ============================================================================

/// Per-item counters written back at job completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub ok: i32,
    pub error: i32,
    pub auth: i32,
    pub not_found: i32,
    pub skipped: i32,
}

impl JobStats {
    pub fn had_failures(&self) -> bool {
        self.error > 0 || self.auth > 0
    }
}

/// Status resolution at finalization: STOPPED beats ERROR beats
/// PARTIAL beats OK.
pub fn resolve_status(cancelled: bool, fatal_error: bool, stats: &JobStats) -> JobStatus {
    if cancelled {
        JobStatus::Stopped
    } else if fatal_error {
        JobStatus::Error
    } else if stats.had_failures() {
        JobStatus::Partial
    } else {
        JobStatus::Ok
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct FetchJob {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: JobKind,
    pub scope_key: String,
    pub status: JobStatus,
    /// Eligible to run; terminal jobs leave the queue and only re-enter
    /// through an explicit enqueue or the materializer.
    pub queued: bool,
    pub stop_requested: bool,
    pub headless: bool,
    pub retry_mode: RetryMode,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub stats: Option<Json<JobStats>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub headless: bool,
    pub retry_mode: RetryMode,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug)]
pub enum EnqueueOutcome {
    Created(FetchJob),
    /// An existing non-running job for the same scope was reset to
    /// pending; the caller gets the same job id back.
    Adopted(FetchJob),
    /// A job for this scope is currently running.
    RejectedRunning(Uuid),
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub account_id: Option<Uuid>,
    pub kind: Option<JobKind>,
    pub scope_key: Option<String>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StopCounts {
    /// Jobs that were never claimed and went straight to STOPPED.
    pub stopped: u64,
    /// Running jobs flagged for cooperative stop.
    pub stop_requested: u64,
}

/// What `enqueue` does with the scope's existing live job, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeDecision {
    /// A running job owns the scope; the request is rejected.
    Reject(Uuid),
    /// A pending job exists; it is reset and keeps its id.
    Adopt(Uuid),
    Create,
}

fn scope_decision(existing: Option<(Uuid, JobStatus)>) -> ScopeDecision {
    match existing {
        Some((id, JobStatus::Running)) => ScopeDecision::Reject(id),
        Some((id, _)) => ScopeDecision::Adopt(id),
        None => ScopeDecision::Create,
    }
}

impl FetchJob {
    /// Mirror of the claim query's eligibility predicate, for
    /// introspection of unclaimed jobs.
    pub fn is_claim_eligible(&self) -> bool {
        self.queued && !self.stop_requested && self.status.is_claimable()
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>("SELECT * FROM fetch_jobs WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(job)
    }

    /// Enqueue work for one (account, kind, scope).
    ///
    /// At most one job per scope may be pending or running. A running
    /// job rejects the request; a pending one is adopted and reset with
    /// the new options.
    pub async fn enqueue(
        account_id: Uuid,
        kind: JobKind,
        scope_key: &str,
        options: EnqueueOptions,
        pool: &PgPool,
    ) -> Result<EnqueueOutcome> {
        let mut tx = pool.begin().await?;

        let existing = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM fetch_jobs
            WHERE account_id = $1 AND kind = $2 AND scope_key = $3
              AND status IN ('pending', 'running')
            FOR UPDATE
            "#,
        )
        .bind(account_id)
        .bind(kind)
        .bind(scope_key)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match scope_decision(existing.map(|j| (j.id, j.status))) {
            ScopeDecision::Reject(id) => EnqueueOutcome::RejectedRunning(id),
            ScopeDecision::Adopt(id) => {
                let adopted = sqlx::query_as::<_, Self>(
                    r#"
                    UPDATE fetch_jobs SET
                        status = 'pending',
                        queued = TRUE,
                        stop_requested = FALSE,
                        headless = $2,
                        retry_mode = $3,
                        date_from = $4,
                        date_to = $5,
                        stats = NULL,
                        last_error = NULL,
                        started_at = NULL,
                        finished_at = NULL
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(options.headless)
                .bind(options.retry_mode)
                .bind(options.date_from)
                .bind(options.date_to)
                .fetch_one(&mut *tx)
                .await?;
                EnqueueOutcome::Adopted(adopted)
            }
            ScopeDecision::Create => {
                let created = sqlx::query_as::<_, Self>(
                    r#"
                    INSERT INTO fetch_jobs (
                        id, account_id, kind, scope_key, status, queued,
                        headless, retry_mode, date_from, date_to
                    )
                    VALUES ($1, $2, $3, $4, 'pending', TRUE, $5, $6, $7, $8)
                    RETURNING *
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(account_id)
                .bind(kind)
                .bind(scope_key)
                .bind(options.headless)
                .bind(options.retry_mode)
                .bind(options.date_from)
                .bind(options.date_to)
                .fetch_one(&mut *tx)
                .await?;
                EnqueueOutcome::Created(created)
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Atomically claim the oldest runnable job, skipping rows locked
    /// by other workers, and mark it running in the same statement.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(
            r#"
            WITH next_job AS (
                SELECT id
                FROM fetch_jobs
                WHERE queued = TRUE
                  AND status IN ('pending', 'error', 'partial')
                  AND stop_requested = FALSE
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE fetch_jobs
            SET status = 'running',
                started_at = NOW(),
                finished_at = NULL,
                last_error = NULL
            WHERE id IN (SELECT id FROM next_job)
            RETURNING *
            "#,
        )
        .fetch_optional(pool)
        .await?;
        Ok(job)
    }

    /// Write the terminal status, stats, and finish timestamp, and take
    /// the job out of the queue.
    pub async fn finalize(
        id: Uuid,
        status: JobStatus,
        stats: &JobStats,
        last_error: Option<&str>,
        pool: &PgPool,
    ) -> Result<()> {
        debug_assert!(status.is_terminal());
        sqlx::query(
            r#"
            UPDATE fetch_jobs
            SET status = $2,
                stats = $3,
                last_error = $4,
                queued = FALSE,
                finished_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(Json(stats))
        .bind(last_error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Durable cooperative stop. Unclaimed jobs transition straight to
    /// STOPPED; running jobs are flagged and observed at the worker's
    /// next checkpoint.
    pub async fn request_stop(filter: &JobFilter, pool: &PgPool) -> Result<StopCounts> {
        let stopped = sqlx::query(
            r#"
            UPDATE fetch_jobs
            SET status = 'stopped',
                queued = FALSE,
                stop_requested = TRUE,
                finished_at = NOW()
            WHERE status IN ('pending', 'error', 'partial')
              AND queued = TRUE
              AND ($1::uuid IS NULL OR account_id = $1)
              AND ($2::job_kind IS NULL OR kind = $2)
              AND ($3::text IS NULL OR scope_key = $3)
            "#,
        )
        .bind(filter.account_id)
        .bind(filter.kind)
        .bind(filter.scope_key.as_deref())
        .execute(pool)
        .await?
        .rows_affected();

        let stop_requested = sqlx::query(
            r#"
            UPDATE fetch_jobs
            SET stop_requested = TRUE
            WHERE status = 'running'
              AND ($1::uuid IS NULL OR account_id = $1)
              AND ($2::job_kind IS NULL OR kind = $2)
              AND ($3::text IS NULL OR scope_key = $3)
            "#,
        )
        .bind(filter.account_id)
        .bind(filter.kind)
        .bind(filter.scope_key.as_deref())
        .execute(pool)
        .await?
        .rows_affected();

        Ok(StopCounts {
            stopped,
            stop_requested,
        })
    }

    /// Poll the durable stop flag for a claimed job.
    pub async fn is_stop_requested(id: Uuid, pool: &PgPool) -> Result<bool> {
        let flag =
            sqlx::query_scalar::<_, bool>("SELECT stop_requested FROM fetch_jobs WHERE id = $1")
                .bind(id)
                .fetch_one(pool)
                .await?;
        Ok(flag)
    }

    pub async fn list(filter: &JobFilter, limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM fetch_jobs
            WHERE ($1::uuid IS NULL OR account_id = $1)
              AND ($2::job_kind IS NULL OR kind = $2)
              AND ($3::text IS NULL OR scope_key = $3)
              AND ($4::job_status IS NULL OR status = $4)
            ORDER BY created_at DESC
            LIMIT $5
            "#,
        )
        .bind(filter.account_id)
        .bind(filter.kind)
        .bind(filter.scope_key.as_deref())
        .bind(filter.status)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_ok_when_clean() {
        let stats = JobStats {
            ok: 3,
            ..Default::default()
        };
        assert_eq!(resolve_status(false, false, &stats), JobStatus::Ok);
    }

    #[test]
    fn resolve_partial_on_item_failures() {
        let stats = JobStats {
            ok: 2,
            error: 1,
            ..Default::default()
        };
        assert_eq!(resolve_status(false, false, &stats), JobStatus::Partial);
    }

    #[test]
    fn resolve_partial_on_auth_failures() {
        let stats = JobStats {
            auth: 1,
            ..Default::default()
        };
        assert_eq!(resolve_status(false, false, &stats), JobStatus::Partial);
    }

    #[test]
    fn not_found_items_do_not_make_a_job_partial() {
        let stats = JobStats {
            ok: 2,
            not_found: 5,
            ..Default::default()
        };
        assert_eq!(resolve_status(false, false, &stats), JobStatus::Ok);
    }

    #[test]
    fn resolve_error_beats_partial() {
        let stats = JobStats {
            error: 2,
            ..Default::default()
        };
        assert_eq!(resolve_status(false, true, &stats), JobStatus::Error);
    }

    #[test]
    fn resolve_stopped_beats_everything() {
        let stats = JobStats {
            error: 2,
            ..Default::default()
        };
        assert_eq!(resolve_status(true, true, &stats), JobStatus::Stopped);
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Ok.is_terminal());
        assert!(JobStatus::Partial.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::StopRequested.is_terminal());
    }

    fn job(status: JobStatus, queued: bool, stop_requested: bool) -> FetchJob {
        FetchJob {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            kind: JobKind::Mailbox,
            scope_key: "202508".into(),
            status,
            queued,
            stop_requested,
            headless: true,
            retry_mode: RetryMode::Full,
            date_from: None,
            date_to: None,
            stats: None,
            last_error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn queued_pending_error_and_partial_jobs_are_claim_eligible() {
        assert!(job(JobStatus::Pending, true, false).is_claim_eligible());
        assert!(job(JobStatus::Error, true, false).is_claim_eligible());
        assert!(job(JobStatus::Partial, true, false).is_claim_eligible());
    }

    #[test]
    fn stopped_before_claim_is_never_claimed() {
        // request_stop on an unclaimed job sets stopped + unqueued +
        // the stop flag; each of the three alone already blocks a claim.
        assert!(!job(JobStatus::Stopped, false, true).is_claim_eligible());
        assert!(!job(JobStatus::Pending, true, true).is_claim_eligible());
        assert!(!job(JobStatus::Pending, false, false).is_claim_eligible());
    }

    #[test]
    fn finished_and_running_jobs_are_not_claim_eligible() {
        assert!(!job(JobStatus::Ok, true, false).is_claim_eligible());
        assert!(!job(JobStatus::Running, true, false).is_claim_eligible());
    }

    #[test]
    fn repeated_enqueue_while_pending_reuses_the_same_job() {
        let id = Uuid::new_v4();
        assert_eq!(
            scope_decision(Some((id, JobStatus::Pending))),
            ScopeDecision::Adopt(id)
        );
    }

    #[test]
    fn enqueue_against_a_running_scope_is_rejected() {
        let id = Uuid::new_v4();
        assert_eq!(
            scope_decision(Some((id, JobStatus::Running))),
            ScopeDecision::Reject(id)
        );
    }

    #[test]
    fn enqueue_on_a_free_scope_creates() {
        assert_eq!(scope_decision(None), ScopeDecision::Create);
    }
}
