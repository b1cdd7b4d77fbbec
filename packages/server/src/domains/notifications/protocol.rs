//! Interactive fetch protocol for the portal mailbox.
//!
//! Drives one stateful session through login → list → select →
//! validate panel → extract, newest item first. The detail panel
//! updates asynchronously after a row click, so extraction is guarded
//! by a fingerprint check: the panel must show content consistent with
//! the selected row (or at least different from the previous item's
//! panel) before the download action is trusted. A panel that never
//! advances skips the item instead of risking a duplicate capture.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

use crate::common::utils::content_hash::{
    dedup_signature, normalize_display_text, panel_fingerprint, sha256_hex,
};
use crate::domains::jobs::JobStats;
use crate::kernel::traits::{
    CancelCheck, DriverError, MailboxDriver, PortalCredentials, RowSummary,
};

use super::{NewNotification, NotificationLedger};

/// Job-level failures; per-item failures only move counters.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("login failed: {0}")]
    Login(String),

    #[error("mailbox list unreadable: {0}")]
    ListUnreadable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct ProtocolOptions {
    /// Stop scanning the list after this many rows.
    pub max_scan: usize,
    /// Extraction attempts per item before it counts as failed.
    pub item_attempts: u32,
    /// Panel polls per attempt while waiting for fresh content.
    pub panel_tries: u32,
    pub panel_poll: Duration,
    /// Lower bound: the scan stops at the first older item (the list is
    /// newest first).
    pub date_from: Option<NaiveDate>,
    /// Upper bound: newer items are skipped but the scan continues.
    pub date_to: Option<NaiveDate>,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            max_scan: 50,
            item_attempts: 3,
            panel_tries: 10,
            panel_poll: Duration::from_millis(500),
            date_from: None,
            date_to: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchReport {
    pub stats: JobStats,
    pub cancelled: bool,
}

/// Run one mailbox fetch pass for one account.
pub async fn run_mailbox_fetch(
    driver: &mut dyn MailboxDriver,
    ledger: &dyn NotificationLedger,
    cancel: &dyn CancelCheck,
    credentials: &PortalCredentials,
    dest_dir: &Path,
    options: &ProtocolOptions,
) -> Result<FetchReport, ProtocolError> {
    let mut report = FetchReport::default();

    if cancel.should_stop().await? {
        report.cancelled = true;
        return Ok(report);
    }

    driver
        .login(credentials)
        .await
        .map_err(|e| ProtocolError::Login(e.to_string()))?;

    let rows = driver.open_mailbox().await.map_err(|e| match e {
        DriverError::Auth(msg) => ProtocolError::Login(msg),
        other => ProtocolError::ListUnreadable(other.to_string()),
    })?;

    tracing::info!(ruc = %credentials.ruc, rows, "mailbox opened");

    let mut prev_fingerprint: Option<String> = None;
    let mut relogin_done = false;

    for index in 0..rows.min(options.max_scan) {
        if cancel.should_stop().await? {
            report.cancelled = true;
            break;
        }

        let summary = match driver.row_summary(index).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(index, error = %e, "row unreadable");
                report.stats.error += 1;
                continue;
            }
        };

        if let Some(published) = summary.published_at {
            if let Some(lower) = options.date_from {
                // Rows are newest first; the first older item ends the scan.
                if published < lower {
                    break;
                }
            }
            if let Some(upper) = options.date_to {
                if published > upper {
                    report.stats.skipped += 1;
                    continue;
                }
            }
        }

        let signature = row_signature(&credentials.ruc, &summary);
        if ledger.is_known(&signature).await? {
            report.stats.skipped += 1;
            continue;
        }

        match extract_item(driver, cancel, index, &summary, prev_fingerprint.as_deref(), dest_dir, options)
            .await
        {
            ItemOutcome::Extracted { path, fingerprint } => {
                let bytes = std::fs::read(&path)
                    .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
                ledger
                    .record(NewNotification {
                        signature,
                        subject: summary.title.clone(),
                        published_at: summary.published_at,
                        storage_path: Some(path.to_string_lossy().into_owned()),
                        content_sha256: Some(sha256_hex(&bytes)),
                    })
                    .await?;
                report.stats.ok += 1;
                prev_fingerprint = Some(fingerprint);
            }
            ItemOutcome::StalePanel => {
                tracing::warn!(index, title = %summary.title, "panel never advanced, skipping item");
                report.stats.skipped += 1;
            }
            ItemOutcome::AuthFailure(msg) => {
                report.stats.auth += 1;
                if relogin_done {
                    tracing::warn!(index, %msg, "auth failure after relogin, continuing");
                    continue;
                }
                relogin_done = true;
                tracing::warn!(index, %msg, "session lost mid-scan, re-authenticating once");
                if let Err(e) = driver.login(credentials).await {
                    return Err(ProtocolError::Login(e.to_string()));
                }
                if driver.open_mailbox().await.is_err() {
                    return Err(ProtocolError::ListUnreadable(
                        "mailbox unreadable after relogin".into(),
                    ));
                }
                prev_fingerprint = None;
            }
            ItemOutcome::Failed(msg) => {
                tracing::warn!(index, title = %summary.title, %msg, "item failed");
                report.stats.error += 1;
            }
            ItemOutcome::Cancelled => {
                report.cancelled = true;
                break;
            }
        }
    }

    Ok(report)
}

enum ItemOutcome {
    Extracted {
        path: std::path::PathBuf,
        fingerprint: String,
    },
    StalePanel,
    AuthFailure(String),
    Failed(String),
    Cancelled,
}

/// Select one row and extract it once the panel proves fresh, retrying
/// the select up to the per-item attempt cap.
async fn extract_item(
    driver: &mut dyn MailboxDriver,
    cancel: &dyn CancelCheck,
    index: usize,
    summary: &RowSummary,
    prev_fingerprint: Option<&str>,
    dest_dir: &Path,
    options: &ProtocolOptions,
) -> ItemOutcome {
    let mut last_error = String::new();

    for attempt in 1..=options.item_attempts {
        if let Err(e) = driver.select_row(index).await {
            match e {
                DriverError::Auth(msg) => return ItemOutcome::AuthFailure(msg),
                other => {
                    last_error = other.to_string();
                    continue;
                }
            }
        }

        match wait_for_fresh_panel(driver, summary, prev_fingerprint, options).await {
            Ok(Some(fingerprint)) => {
                // Destructive action gate.
                match cancel.should_stop().await {
                    Ok(true) => return ItemOutcome::Cancelled,
                    Ok(false) => {}
                    Err(e) => return ItemOutcome::Failed(e.to_string()),
                }

                return match driver.download_current(dest_dir).await {
                    Ok(path) => ItemOutcome::Extracted { path, fingerprint },
                    Err(DriverError::Auth(msg)) => ItemOutcome::AuthFailure(msg),
                    Err(e) => {
                        last_error = e.to_string();
                        tracing::debug!(index, attempt, error = %last_error, "download failed");
                        continue;
                    }
                };
            }
            Ok(None) => return ItemOutcome::StalePanel,
            Err(DriverError::Auth(msg)) => return ItemOutcome::AuthFailure(msg),
            Err(e) => {
                last_error = e.to_string();
            }
        }
    }

    ItemOutcome::Failed(last_error)
}

/// Poll the panel until it shows content consistent with the selected
/// row. Returns the panel fingerprint once fresh, or `None` when the
/// panel never advances within the polling window.
async fn wait_for_fresh_panel(
    driver: &mut dyn MailboxDriver,
    summary: &RowSummary,
    prev_fingerprint: Option<&str>,
    options: &ProtocolOptions,
) -> Result<Option<String>, DriverError> {
    for _ in 0..options.panel_tries {
        let text = driver.panel_text().await?;
        let fingerprint = panel_fingerprint(&text);

        if panel_is_fresh(&text, &fingerprint, summary, prev_fingerprint) {
            return Ok(Some(fingerprint));
        }
        tokio::time::sleep(options.panel_poll).await;
    }
    Ok(None)
}

/// Freshness: the panel matches the row's expected metadata when we
/// have any, else it must at least differ from the previous item's
/// fingerprint.
fn panel_is_fresh(
    text: &str,
    fingerprint: &str,
    summary: &RowSummary,
    prev_fingerprint: Option<&str>,
) -> bool {
    let normalized = normalize_display_text(text);
    if normalized.is_empty() {
        return false;
    }

    let title_snippet = title_snippet(&summary.title);
    if !title_snippet.is_empty() {
        return normalized.contains(&title_snippet);
    }

    match prev_fingerprint {
        Some(prev) => fingerprint != prev,
        // First item with no metadata: any non-empty panel is accepted.
        None => true,
    }
}

/// Leading words of the normalized row title, enough to recognize the
/// item in the panel without requiring an exact match.
fn title_snippet(title: &str) -> String {
    normalize_display_text(title)
        .split_whitespace()
        .take(5)
        .collect::<Vec<_>>()
        .join(" ")
}

fn row_signature(ruc: &str, summary: &RowSummary) -> String {
    match &summary.external_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => {
            let date = summary
                .published_at
                .map(|d| d.to_string())
                .unwrap_or_default();
            dedup_signature(ruc, &format!("{} {date}", summary.title))
        }
    }
}
