use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One purchase document row from a period export. The stable
/// `item_id` is what the evidence tracker keys per-item outcomes on.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub period: String,
    pub item_id: String,
    pub doc_type: String,
    pub series: Option<String>,
    pub number: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub supplier_ruc: Option<String>,
    pub supplier_name: Option<String>,
    pub total: Option<f64>,
    pub raw: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
