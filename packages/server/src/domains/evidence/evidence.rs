//! Per-item retrieval outcome records.
//!
//! Evidence rows are the idempotency and backoff authority: one row per
//! (item, artifact kind), created lazily on first attempt, surviving
//! the job that created them. `ok` and `not_found` are terminal and are
//! only ever cleared by an explicit operator retry.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::domains::jobs::RetryMode;
use crate::domains::records::PurchaseRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "evidence_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Xml,
    Pdf,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::Xml => "xml",
            EvidenceKind::Pdf => "pdf",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "evidence_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStatus {
    #[default]
    Pending,
    Ok,
    Error,
    NotFound,
    Auth,
}

impl EvidenceStatus {
    /// Terminal states are never re-attempted without an explicit reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EvidenceStatus::Ok | EvidenceStatus::NotFound)
    }
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: Uuid,
    pub account_id: Uuid,
    pub item_id: String,
    pub kind: EvidenceKind,
    pub status: EvidenceStatus,
    pub attempt_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub storage_path: Option<String>,
    pub content_sha256: Option<String>,
    pub error_message: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything one attempt can report back.
#[derive(Debug, Clone, Default)]
pub struct AttemptUpdate {
    pub status: EvidenceStatus,
    pub error_message: Option<String>,
    pub storage_path: Option<String>,
    pub content_sha256: Option<String>,
    /// Backoff before automatic re-selection; only honored for
    /// retryable statuses (error, auth).
    pub backoff_seconds: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Progress {
    pub total: i64,
    pub ok: i64,
    pub error: i64,
    pub not_found: i64,
    pub auth: i64,
    pub pending: i64,
    pub remaining: i64,
}

impl Evidence {
    /// Idempotent create: concurrent callers converge on the single row
    /// behind the (item_id, kind) unique constraint.
    pub async fn get_or_create(
        account_id: Uuid,
        item_id: &str,
        kind: EvidenceKind,
        pool: &PgPool,
    ) -> Result<Self> {
        sqlx::query(
            r#"
            INSERT INTO evidence (id, account_id, item_id, kind)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (item_id, kind) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(item_id)
        .bind(kind)
        .execute(pool)
        .await?;

        let evidence = sqlx::query_as::<_, Self>(
            "SELECT * FROM evidence WHERE item_id = $1 AND kind = $2",
        )
        .bind(item_id)
        .bind(kind)
        .fetch_one(pool)
        .await?;
        Ok(evidence)
    }

    /// Record one attempt. Always increments the attempt counter and
    /// stamps `last_attempt_at`; `next_retry_at` is set only for
    /// retryable failures and cleared otherwise.
    pub async fn record_attempt(&self, update: AttemptUpdate, pool: &PgPool) -> Result<Self> {
        let next_retry_at = next_retry_after(update.status, update.backoff_seconds, Utc::now());

        let evidence = sqlx::query_as::<_, Self>(
            r#"
            UPDATE evidence SET
                attempt_count = attempt_count + 1,
                last_attempt_at = NOW(),
                status = $2,
                error_message = $3,
                storage_path = COALESCE($4, storage_path),
                content_sha256 = COALESCE($5, content_sha256),
                downloaded_at = CASE WHEN $2 = 'ok' THEN NOW() ELSE downloaded_at END,
                next_retry_at = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(update.status)
        .bind(update.error_message.as_deref())
        .bind(update.storage_path.as_deref())
        .bind(update.content_sha256.as_deref())
        .bind(next_retry_at)
        .fetch_one(pool)
        .await?;
        Ok(evidence)
    }

    /// Items of one (account, period) still owing an artifact of `kind`,
    /// in ascending item-id order. Terminal evidence is always excluded;
    /// retryable failures are gated by `next_retry_at` and the attempt
    /// cap.
    pub async fn select_pending(
        account_id: Uuid,
        period: &str,
        kind: EvidenceKind,
        retry_mode: RetryMode,
        max_attempts: i32,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<PurchaseRecord>> {
        let mode_clause = match retry_mode {
            RetryMode::Full => "TRUE",
            RetryMode::OnlyPending => "(e.id IS NULL OR e.status = 'pending')",
            RetryMode::OnlyFailed => "e.status IN ('error', 'auth')",
        };

        let sql = format!(
            r#"
            SELECT pr.*
            FROM purchase_records pr
            LEFT JOIN evidence e ON e.item_id = pr.item_id AND e.kind = $3
            WHERE pr.account_id = $1
              AND pr.period = $2
              AND (e.id IS NULL
                   OR (e.status NOT IN ('ok', 'not_found')
                       AND e.attempt_count < $4
                       AND (e.next_retry_at IS NULL OR e.next_retry_at <= NOW())))
              AND {mode_clause}
            ORDER BY pr.item_id
            LIMIT $5
            "#
        );

        let items = sqlx::query_as::<_, PurchaseRecord>(&sql)
            .bind(account_id)
            .bind(period)
            .bind(kind)
            .bind(max_attempts)
            .bind(limit)
            .fetch_all(pool)
            .await?;
        Ok(items)
    }

    /// Operator-initiated reset: a non-success row goes back to pending
    /// with a zeroed attempt counter. Returns how many rows were reset.
    pub async fn retry_item(item_id: &str, pool: &PgPool) -> Result<u64> {
        let affected = sqlx::query(
            r#"
            UPDATE evidence SET
                status = 'pending',
                attempt_count = 0,
                next_retry_at = NULL,
                error_message = NULL,
                updated_at = NOW()
            WHERE item_id = $1 AND status <> 'ok'
            "#,
        )
        .bind(item_id)
        .execute(pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    /// Per-scope progress counters for the introspection interface.
    pub async fn progress(
        account_id: Uuid,
        period: &str,
        kind: EvidenceKind,
        pool: &PgPool,
    ) -> Result<Progress> {
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE e.status = 'ok'),
                COUNT(*) FILTER (WHERE e.status = 'error'),
                COUNT(*) FILTER (WHERE e.status = 'not_found'),
                COUNT(*) FILTER (WHERE e.status = 'auth')
            FROM purchase_records pr
            LEFT JOIN evidence e ON e.item_id = pr.item_id AND e.kind = $3
            WHERE pr.account_id = $1 AND pr.period = $2
            "#,
        )
        .bind(account_id)
        .bind(period)
        .bind(kind)
        .fetch_one(pool)
        .await?;

        let (total, ok, error, not_found, auth) = row;
        let pending = total - ok - error - not_found - auth;
        Ok(Progress {
            total,
            ok,
            error,
            not_found,
            auth,
            pending,
            remaining: total - ok - not_found,
        })
    }
}

/// Backoff schedule for one recorded attempt: only retryable failures
/// with a positive backoff get a `next_retry_at`; every other outcome
/// clears it.
fn next_retry_after(
    status: EvidenceStatus,
    backoff_seconds: i64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match status {
        EvidenceStatus::Error | EvidenceStatus::Auth if backoff_seconds > 0 => {
            Some(now + chrono::Duration::seconds(backoff_seconds))
        }
        _ => None,
    }
}
