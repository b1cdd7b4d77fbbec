use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::kernel::traits::PortalCredentials;

/// One taxpayer account the pipeline retrieves documents for.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub ruc: String,
    pub business_name: Option<String>,
    pub sol_user: String,
    pub sol_key: String,
    pub api_client_id: Option<String>,
    pub api_client_secret: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Self> {
        let account = sqlx::query_as::<_, Self>("SELECT * FROM taxpayer_accounts WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(account)
    }

    pub async fn find_by_ruc(ruc: &str, pool: &PgPool) -> Result<Option<Self>> {
        let account = sqlx::query_as::<_, Self>(
            "SELECT * FROM taxpayer_accounts WHERE ruc = $1 AND active = TRUE",
        )
        .bind(ruc)
        .fetch_optional(pool)
        .await?;
        Ok(account)
    }

    pub async fn list_active(pool: &PgPool) -> Result<Vec<Self>> {
        let accounts = sqlx::query_as::<_, Self>(
            "SELECT * FROM taxpayer_accounts WHERE active = TRUE ORDER BY ruc",
        )
        .fetch_all(pool)
        .await?;
        Ok(accounts)
    }

    /// Insert or refresh an account keyed by RUC.
    pub async fn upsert(&self, pool: &PgPool) -> Result<Self> {
        let account = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO taxpayer_accounts (
                id, ruc, business_name, sol_user, sol_key,
                api_client_id, api_client_secret, active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (ruc) DO UPDATE SET
                business_name = EXCLUDED.business_name,
                sol_user = EXCLUDED.sol_user,
                sol_key = EXCLUDED.sol_key,
                api_client_id = EXCLUDED.api_client_id,
                api_client_secret = EXCLUDED.api_client_secret,
                active = EXCLUDED.active,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(&self.ruc)
        .bind(&self.business_name)
        .bind(&self.sol_user)
        .bind(&self.sol_key)
        .bind(&self.api_client_id)
        .bind(&self.api_client_secret)
        .bind(self.active)
        .fetch_one(pool)
        .await?;
        Ok(account)
    }

    pub fn portal_credentials(&self) -> PortalCredentials {
        PortalCredentials {
            ruc: self.ruc.clone(),
            sol_user: self.sol_user.clone(),
            sol_key: self.sol_key.clone(),
        }
    }
}
