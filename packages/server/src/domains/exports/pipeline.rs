//! Period export pipeline: submit → poll → download → load.
//!
//! The ticket is resumable: once submitted it is stored in the
//! account's session state, so a crashed or restarted worker picks the
//! ticket back up instead of submitting a duplicate export.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use sire_client::{SireError, TicketRecord};

use crate::common::utils::content_hash::sha256_hex;
use crate::domains::accounts::Account;
use crate::domains::records;
use crate::kernel::ServerDeps;

use super::ExportFile;

#[derive(Debug, Clone, Copy)]
pub enum ExportOutcome {
    /// Fresh export downloaded and its rows loaded.
    Refreshed { records: usize },
    /// Export content hash matches what is already stored; row loading
    /// skipped.
    Unchanged,
    /// The service reports no documents in the period. Valid empty
    /// result, not a failure.
    Empty,
}

/// Make sure the period export exists locally and its rows are loaded.
pub async fn ensure_period_export(
    deps: &ServerDeps,
    account: &Account,
    period: &str,
) -> Result<ExportOutcome> {
    let token = valid_token(deps, account).await?;

    let ticket = match resume_or_submit(deps, account, period, &token).await? {
        Some(ticket) => ticket,
        None => return Ok(ExportOutcome::Empty),
    };

    let (record, token) = poll_with_refresh(deps, account, period, &ticket, token).await?;

    let params = sire_client::report_params(&record)?;
    let bytes = deps
        .sire
        .download_report(&token, period, &ticket, &params)
        .await?;
    let sha256 = sha256_hex(&bytes);

    // Change-detection short-circuit: identical content means the
    // derived rows are already current.
    if let Some(existing) = ExportFile::find_for_period(account.id, period, &deps.pool).await? {
        if existing.content_sha256 == sha256 {
            tracing::info!(ruc = %account.ruc, period, "export unchanged, skipping reload");
            clear_ticket(deps, account)?;
            return Ok(ExportOutcome::Unchanged);
        }
    }

    let dir = deps.config.artifacts_dir.join(&account.ruc).join(period);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating artifact dir {}", dir.display()))?;
    let path = dir.join(&params.file_name);
    std::fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?;

    ExportFile::upsert(
        account.id,
        period,
        Some(&ticket),
        Some(&params.file_name),
        &sha256,
        bytes.len() as i64,
        &path.to_string_lossy(),
        &deps.pool,
    )
    .await?;

    let (rows, skipped) = records::parse_export_csv(&bytes)?;
    let summary = records::upsert_rows(account.id, period, &rows, &deps.pool).await?;
    clear_ticket(deps, account)?;

    tracing::info!(
        ruc = %account.ruc,
        period,
        upserted = summary.upserted,
        skipped,
        "export loaded"
    );
    Ok(ExportOutcome::Refreshed {
        records: summary.upserted,
    })
}

/// Poll the ticket until done. A token that goes stale mid-poll gets
/// one forced refresh; the returned token is the one the rest of the
/// pipeline must keep using.
async fn poll_with_refresh(
    deps: &ServerDeps,
    account: &Account,
    period: &str,
    ticket: &str,
    token: String,
) -> Result<(TicketRecord, String)> {
    match deps.sire.wait_until_done(&token, period, ticket).await {
        Ok(record) => Ok((record, token)),
        Err(SireError::Auth(_)) => {
            deps.sessions.invalidate_token(&account.ruc)?;
            let token = valid_token(deps, account).await?;
            let record = deps.sire.wait_until_done(&token, period, ticket).await?;
            Ok((record, token))
        }
        Err(e) => Err(e.into()),
    }
}

/// Cached token when still valid, otherwise a fresh exchange.
async fn valid_token(deps: &ServerDeps, account: &Account) -> Result<String> {
    if let Some(state) = deps.sessions.load(&account.ruc)? {
        if state.token_is_valid() {
            if let Some(token) = state.token {
                return Ok(token);
            }
        }
    }

    let client_id = account
        .api_client_id
        .clone()
        .or_else(|| deps.config.sire_client_id.clone())
        .context("no API client id configured for account")?;
    let client_secret = account
        .api_client_secret
        .clone()
        .or_else(|| deps.config.sire_client_secret.clone())
        .context("no API client secret configured for account")?;

    let credentials = deps
        .sire
        .request_token(
            &client_id,
            &client_secret,
            &account.ruc,
            &account.sol_user,
            &account.sol_key,
        )
        .await?;

    deps.sessions.update(&account.ruc, |state| {
        state.token = Some(credentials.token.clone());
        state.token_expires_at = Some(credentials.expires_at);
    })?;

    Ok(credentials.token)
}

/// Reuse the last submitted ticket for this period when one is cached,
/// otherwise submit a new export.
async fn resume_or_submit(
    deps: &ServerDeps,
    account: &Account,
    period: &str,
    token: &str,
) -> Result<Option<String>> {
    if let Some(state) = deps.sessions.load(&account.ruc)? {
        if state.last_ticket_period.as_deref() == Some(period) {
            if let Some(ticket) = state.last_ticket {
                tracing::info!(ruc = %account.ruc, period, ticket, "resuming cached ticket");
                return Ok(Some(ticket));
            }
        }
    }

    let (date_from, date_to) = period_bounds(period)?;
    let ticket = match deps
        .sire
        .submit_export(token, period, &date_from, &date_to)
        .await
    {
        Ok(ticket) => ticket,
        Err(SireError::NoData) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    deps.sessions.update(&account.ruc, |state| {
        state.last_ticket = Some(ticket.clone());
        state.last_ticket_period = Some(period.to_string());
    })?;

    Ok(Some(ticket))
}

fn clear_ticket(deps: &ServerDeps, account: &Account) -> Result<()> {
    deps.sessions.update(&account.ruc, |state| {
        state.last_ticket = None;
        state.last_ticket_period = None;
        state.last_process_code = None;
    })?;
    Ok(())
}

/// First and last emission dates of a `YYYYMM` period, in the
/// `dd/mm/yyyy` form the export endpoint expects.
fn period_bounds(period: &str) -> Result<(String, String)> {
    if period.len() != 6 || !period.bytes().all(|b| b.is_ascii_digit()) {
        bail!("invalid period {period:?}, expected YYYYMM");
    }
    let year: i32 = period[..4].parse().context("invalid period year")?;
    let month: u32 = period[4..].parse().context("invalid period month")?;

    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .with_context(|| format!("invalid period {period:?}"))?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .context("invalid period rollover")?;
    let last = next_month.pred_opt().context("invalid period end")?;

    Ok((
        first.format("%d/%m/%Y").to_string(),
        last.format("%d/%m/%Y").to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_bounds_regular_month() {
        let (from, to) = period_bounds("202508").unwrap();
        assert_eq!(from, "01/08/2025");
        assert_eq!(to, "31/08/2025");
    }

    #[test]
    fn period_bounds_february() {
        let (from, to) = period_bounds("202502").unwrap();
        assert_eq!(from, "01/02/2025");
        assert_eq!(to, "28/02/2025");
    }

    #[test]
    fn period_bounds_leap_february() {
        let (_, to) = period_bounds("202402").unwrap();
        assert_eq!(to, "29/02/2024");
    }

    #[test]
    fn period_bounds_december_rollover() {
        let (from, to) = period_bounds("202512").unwrap();
        assert_eq!(from, "01/12/2025");
        assert_eq!(to, "31/12/2025");
    }

    #[test]
    fn period_bounds_rejects_garbage() {
        assert!(period_bounds("2025").is_err());
        assert!(period_bounds("2025XX").is_err());
        assert!(period_bounds("202513").is_err());
    }

    #[test]
    fn period_bounds_rejects_multibyte_scope_keys() {
        // Six bytes but not six digits; must error, never slice inside
        // a character.
        assert!(period_bounds("202é5").is_err());
        assert!(period_bounds("été202").is_err());
    }

    mod polling {
        use std::path::PathBuf;
        use std::sync::Arc;
        use std::time::Duration;

        use async_trait::async_trait;
        use chrono::Utc;
        use uuid::Uuid;
        use wiremock::matchers::{header, method, path_regex};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        use super::super::*;
        use crate::config::Config;
        use crate::kernel::traits::{DocumentDriver, DriverFactory, MailboxDriver};

        struct NoDrivers;

        #[async_trait]
        impl DriverFactory for NoDrivers {
            async fn mailbox_session(
                &self,
                _headless: bool,
            ) -> anyhow::Result<Box<dyn MailboxDriver>> {
                anyhow::bail!("no portal driver in this test")
            }

            async fn document_session(
                &self,
                _headless: bool,
            ) -> anyhow::Result<Box<dyn DocumentDriver>> {
                anyhow::bail!("no portal driver in this test")
            }
        }

        fn test_deps(server: &MockServer, sessions_dir: PathBuf) -> ServerDeps {
            let config = Config {
                database_url: "postgres://localhost/unused".into(),
                sessions_dir,
                artifacts_dir: std::env::temp_dir(),
                portal_driver_url: server.uri(),
                sire_client_id: Some("cid".into()),
                sire_client_secret: Some("sec".into()),
                poll_interval_secs: 1,
                job_max_runtime_secs: 3600,
                evidence_max_attempts: 3,
                evidence_backoff_secs: 900,
                mailbox_max_scan: 50,
            };
            // Lazy pool: nothing in the polling path touches the database.
            let pool = sqlx::postgres::PgPoolOptions::new()
                .connect_lazy(&config.database_url)
                .unwrap();
            let sire = Arc::new(
                sire_client::SireClient::with_base_urls(server.uri(), server.uri())
                    .with_polling(Duration::from_millis(5), Duration::from_millis(500)),
            );
            ServerDeps::new(pool, config, Arc::new(NoDrivers), sire)
        }

        fn account() -> Account {
            Account {
                id: Uuid::new_v4(),
                ruc: "20123456789".into(),
                business_name: None,
                sol_user: "USER1".into(),
                sol_key: "clave".into(),
                api_client_id: Some("cid".into()),
                api_client_secret: Some("sec".into()),
                active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }
        }

        #[tokio::test]
        async fn stale_token_mid_poll_is_refreshed_for_the_rest_of_the_pipeline() {
            let server = MockServer::start().await;
            let sessions_dir =
                std::env::temp_dir().join(format!("pipeline-test-{}", Uuid::new_v4()));
            let deps = test_deps(&server, sessions_dir.clone());
            let account = account();

            deps.sessions
                .update(&account.ruc, |s| {
                    s.token = Some("tok-old".into());
                    s.token_expires_at = Some(Utc::now() + chrono::Duration::hours(1));
                })
                .unwrap();

            Mock::given(method("GET"))
                .and(path_regex(r"consultaestadotickets$"))
                .and(header("authorization", "Bearer tok-old"))
                .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
                .mount(&server)
                .await;
            Mock::given(method("POST"))
                .and(path_regex(r"oauth2/token/$"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "access_token": "tok-new",
                    "expires_in": 3600
                })))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path_regex(r"consultaestadotickets$"))
                .and(header("authorization", "Bearer tok-new"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "registros": [{
                        "numTicket": "T-1",
                        "codEstadoProceso": "06",
                        "codProceso": "9",
                        "archivoReporte": [
                            {"nomArchivoReporte": "r.txt", "codTipoAchivoReporte": "01"}
                        ]
                    }]
                })))
                .mount(&server)
                .await;

            let token = valid_token(&deps, &account).await.unwrap();
            assert_eq!(token, "tok-old");

            let (record, token) = poll_with_refresh(&deps, &account, "202508", "T-1", token)
                .await
                .unwrap();
            assert!(record.is_done());
            // The refreshed token is what the download step will see.
            assert_eq!(token, "tok-new");

            let state = deps.sessions.load(&account.ruc).unwrap().unwrap();
            assert_eq!(state.token.as_deref(), Some("tok-new"));
            let _ = std::fs::remove_dir_all(sessions_dir);
        }
    }
}
