use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// One retrieved mailbox notification. The signature is the dedup
/// authority: re-scanning the same list never re-downloads a known item.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub account_id: Uuid,
    pub signature: String,
    pub subject: String,
    pub published_at: Option<NaiveDate>,
    pub storage_path: Option<String>,
    pub content_sha256: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub signature: String,
    pub subject: String,
    pub published_at: Option<NaiveDate>,
    pub storage_path: Option<String>,
    pub content_sha256: Option<String>,
}

impl Notification {
    pub async fn exists(account_id: Uuid, signature: &str, pool: &PgPool) -> Result<bool> {
        let found = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM notifications WHERE account_id = $1 AND signature = $2)",
        )
        .bind(account_id)
        .bind(signature)
        .fetch_one(pool)
        .await?;
        Ok(found)
    }

    pub async fn insert(account_id: Uuid, new: &NewNotification, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, account_id, signature, subject, published_at,
                storage_path, content_sha256
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (account_id, signature) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(&new.signature)
        .bind(&new.subject)
        .bind(new.published_at)
        .bind(&new.storage_path)
        .bind(&new.content_sha256)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_for_account(
        account_id: Uuid,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM notifications
            WHERE account_id = $1
            ORDER BY published_at DESC NULLS LAST, created_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}

/// Dedup ledger the fetch protocol consults before extracting an item.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    async fn is_known(&self, signature: &str) -> Result<bool>;
    async fn record(&self, new: NewNotification) -> Result<()>;
}

pub struct PgNotificationLedger {
    pool: PgPool,
    account_id: Uuid,
}

impl PgNotificationLedger {
    pub fn new(pool: PgPool, account_id: Uuid) -> Self {
        Self { pool, account_id }
    }
}

#[async_trait]
impl NotificationLedger for PgNotificationLedger {
    async fn is_known(&self, signature: &str) -> Result<bool> {
        Notification::exists(self.account_id, signature, &self.pool).await
    }

    async fn record(&self, new: NewNotification) -> Result<()> {
        Notification::insert(self.account_id, &new, &self.pool).await
    }
}
