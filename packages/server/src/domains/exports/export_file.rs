use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// The stored period export and its content hash, keyed one per
/// (account, period). The hash drives the change-detection
/// short-circuit on re-download.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ExportFile {
    pub id: Uuid,
    pub account_id: Uuid,
    pub period: String,
    pub ticket: Option<String>,
    pub file_name: Option<String>,
    pub content_sha256: String,
    pub byte_size: i64,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExportFile {
    pub async fn find_for_period(
        account_id: Uuid,
        period: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let file = sqlx::query_as::<_, Self>(
            "SELECT * FROM export_files WHERE account_id = $1 AND period = $2",
        )
        .bind(account_id)
        .bind(period)
        .fetch_optional(pool)
        .await?;
        Ok(file)
    }

    pub async fn upsert(
        account_id: Uuid,
        period: &str,
        ticket: Option<&str>,
        file_name: Option<&str>,
        content_sha256: &str,
        byte_size: i64,
        storage_path: &str,
        pool: &PgPool,
    ) -> Result<Self> {
        let file = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO export_files (
                id, account_id, period, ticket, file_name,
                content_sha256, byte_size, storage_path
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (account_id, period) DO UPDATE SET
                ticket = EXCLUDED.ticket,
                file_name = EXCLUDED.file_name,
                content_sha256 = EXCLUDED.content_sha256,
                byte_size = EXCLUDED.byte_size,
                storage_path = EXCLUDED.storage_path,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(period)
        .bind(ticket)
        .bind(file_name)
        .bind(content_sha256)
        .bind(byte_size)
        .bind(storage_path)
        .fetch_one(pool)
        .await?;
        Ok(file)
    }
}
