//! Document evidence job: make sure the period export is loaded, then
//! fetch the per-item XML artifacts still owed for that period.

use anyhow::{Context, Result};

use crate::domains::accounts::Account;
use crate::domains::evidence::{AttemptUpdate, Evidence, EvidenceKind, EvidenceStatus};
use crate::domains::exports::{self, ExportOutcome};
use crate::domains::jobs::{FetchJob, JobStats};
use crate::domains::records::PurchaseRecord;
use crate::kernel::traits::{CancelCheck, DocumentOutcome, DocumentRequest, DriverError};
use crate::kernel::ServerDeps;

/// Document type with no downloadable artifact on the portal
/// (service receipts). Marked NOT_FOUND immediately, never retried.
const DOC_TYPE_SERVICES: &str = "14";

/// Items processed per job run; leftovers wait for the next run.
const ITEM_BATCH_LIMIT: i64 = 200;

#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentRunReport {
    pub stats: JobStats,
    pub cancelled: bool,
}

pub async fn run_document_job(
    deps: &ServerDeps,
    job: &FetchJob,
    cancel: &dyn CancelCheck,
) -> Result<DocumentRunReport> {
    let account = Account::find_by_id(job.account_id, &deps.pool).await?;
    let period = &job.scope_key;
    let mut report = DocumentRunReport::default();

    match exports::ensure_period_export(deps, &account, period).await? {
        ExportOutcome::Empty => {
            tracing::info!(ruc = %account.ruc, period, "no documents in period");
            return Ok(report);
        }
        ExportOutcome::Unchanged => {}
        ExportOutcome::Refreshed { records } => {
            tracing::info!(ruc = %account.ruc, period, records, "export refreshed");
        }
    }

    let items = Evidence::select_pending(
        account.id,
        period,
        EvidenceKind::Xml,
        job.retry_mode,
        deps.config.evidence_max_attempts,
        ITEM_BATCH_LIMIT,
        &deps.pool,
    )
    .await?;

    if items.is_empty() {
        return Ok(report);
    }
    tracing::info!(ruc = %account.ruc, period, pending = items.len(), "fetching item evidence");

    let mut driver = deps
        .drivers
        .document_session(job.headless)
        .await
        .context("opening document driver session")?;
    let credentials = account.portal_credentials();
    driver
        .login(&credentials)
        .await
        .map_err(|e| anyhow::anyhow!("portal login failed: {e}"))?;

    let dest_dir = deps.config.artifacts_dir.join(&account.ruc).join(period);
    let mut relogin_done = false;

    for item in &items {
        if cancel.should_stop().await? {
            report.cancelled = true;
            break;
        }

        let evidence =
            Evidence::get_or_create(account.id, &item.item_id, EvidenceKind::Xml, &deps.pool)
                .await?;
        if evidence.status.is_terminal() {
            report.stats.skipped += 1;
            continue;
        }

        if item.doc_type.trim() == DOC_TYPE_SERVICES {
            mark_services_not_found(deps, &evidence).await?;
            report.stats.not_found += 1;
            continue;
        }

        let request = to_request(item);
        match driver.fetch_document(&request, &dest_dir).await {
            Ok(DocumentOutcome::Fetched { path, sha256 }) => {
                evidence
                    .record_attempt(
                        AttemptUpdate {
                            status: EvidenceStatus::Ok,
                            storage_path: Some(path.to_string_lossy().into_owned()),
                            content_sha256: Some(sha256),
                            ..Default::default()
                        },
                        &deps.pool,
                    )
                    .await?;
                report.stats.ok += 1;
            }
            Ok(DocumentOutcome::NotFound) => {
                evidence
                    .record_attempt(
                        AttemptUpdate {
                            status: EvidenceStatus::NotFound,
                            error_message: Some("portal exposes no artifact for item".into()),
                            ..Default::default()
                        },
                        &deps.pool,
                    )
                    .await?;
                report.stats.not_found += 1;
            }
            Err(DriverError::Auth(msg)) => {
                evidence
                    .record_attempt(
                        AttemptUpdate {
                            status: EvidenceStatus::Auth,
                            error_message: Some(msg.clone()),
                            backoff_seconds: deps.config.evidence_backoff_secs,
                            ..Default::default()
                        },
                        &deps.pool,
                    )
                    .await?;
                report.stats.auth += 1;

                // One immediate re-login, then keep walking the batch.
                if !relogin_done {
                    relogin_done = true;
                    tracing::warn!(ruc = %account.ruc, %msg, "portal session lost, re-authenticating once");
                    if let Err(e) = driver.login(&credentials).await {
                        tracing::warn!(error = %e, "re-login failed, continuing");
                    }
                }
            }
            Err(e) => {
                evidence
                    .record_attempt(
                        AttemptUpdate {
                            status: EvidenceStatus::Error,
                            error_message: Some(e.to_string()),
                            backoff_seconds: deps.config.evidence_backoff_secs,
                            ..Default::default()
                        },
                        &deps.pool,
                    )
                    .await?;
                report.stats.error += 1;
            }
        }
    }

    Ok(report)
}

/// Service receipts never have a downloadable artifact; pin the row at
/// the attempt cap so automatic selection never picks it up again.
async fn mark_services_not_found(deps: &ServerDeps, evidence: &Evidence) -> Result<()> {
    evidence
        .record_attempt(
            AttemptUpdate {
                status: EvidenceStatus::NotFound,
                error_message: Some("services (doc_type=14): no downloadable artifact".into()),
                ..Default::default()
            },
            &deps.pool,
        )
        .await?;
    sqlx::query("UPDATE evidence SET attempt_count = $2 WHERE id = $1")
        .bind(evidence.id)
        .bind(deps.config.evidence_max_attempts)
        .execute(&deps.pool)
        .await?;
    Ok(())
}

fn to_request(item: &PurchaseRecord) -> DocumentRequest {
    DocumentRequest {
        item_id: item.item_id.clone(),
        doc_type: item.doc_type.clone(),
        series: item.series.clone(),
        number: item.number.clone(),
        supplier_ruc: item.supplier_ruc.clone(),
        kind: "xml".to_string(),
    }
}
