//! Pure REST client for the SIRE batch-export API.
//!
//! The service models an export as an asynchronously processed ticket:
//! submit a ticket, poll its status until it reaches a terminal state,
//! then download the report file it produced.
//!
//! # Example
//!
//! ```rust,ignore
//! use sire_client::SireClient;
//!
//! let client = SireClient::new();
//! let creds = client
//!     .request_token(&client_id, &client_secret, &ruc, &sol_user, &sol_key)
//!     .await?;
//! let ticket = client
//!     .submit_export(&creds.token, "202508", "2025-08-01", "2025-08-31")
//!     .await?;
//! let record = client.wait_until_done(&creds.token, "202508", &ticket).await?;
//! let params = sire_client::report_params(&record)?;
//! let bytes = client.download_report(&creds.token, "202508", &ticket, &params).await?;
//! ```

pub mod error;
pub mod types;

pub use error::{Result, SireError};
pub use types::{Credentials, ReportParams, TicketRecord, TicketStatusPage};

use std::time::{Duration, Instant};

use types::{ErrorBody, TicketResponse, TokenResponse};

const DEFAULT_API_BASE: &str = "https://api-sire.sunat.gob.pe";
const DEFAULT_AUTH_BASE: &str = "https://api-seguridad.sunat.gob.pe";

/// Ledger code for the electronic purchase register.
const PURCHASE_LEDGER_CODE: &str = "080000";

/// Business error code meaning "no documents in the requested period".
const NO_DATA_ERROR_CODE: &str = "1070";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(180);

pub struct SireClient {
    client: reqwest::Client,
    api_base: String,
    auth_base: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl Default for SireClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SireClient {
    pub fn new() -> Self {
        Self::with_base_urls(DEFAULT_API_BASE, DEFAULT_AUTH_BASE)
    }

    /// Create a client against alternate base URLs (test doubles, proxies).
    pub fn with_base_urls(api_base: impl Into<String>, auth_base: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            client,
            api_base: api_base.into(),
            auth_base: auth_base.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    /// Override the polling cadence (interval between status checks and
    /// the overall deadline).
    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.poll_timeout = timeout;
        self
    }

    /// Exchange portal credentials for an API access token.
    pub async fn request_token(
        &self,
        client_id: &str,
        client_secret: &str,
        ruc: &str,
        sol_user: &str,
        sol_key: &str,
    ) -> Result<Credentials> {
        if client_id.is_empty() || client_secret.is_empty() {
            return Err(SireError::Auth("missing client_id/client_secret".into()));
        }
        if ruc.is_empty() || sol_user.is_empty() || sol_key.is_empty() {
            return Err(SireError::Auth("missing ruc/sol_user/sol_key".into()));
        }

        let url = format!("{}/v1/clientessol/{}/oauth2/token/", self.auth_base, client_id);
        // The service expects RUC and portal user concatenated.
        let username = format!("{ruc}{sol_user}");
        let form = [
            ("grant_type", "password"),
            ("scope", DEFAULT_API_BASE),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("username", username.as_str()),
            ("password", sol_key),
        ];

        let resp = self.client.post(&url).form(&form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.best_message().map(str::to_owned))
                .unwrap_or_else(|| truncated(&body, 500));
            return Err(SireError::Auth(format!("token {}: {}", status.as_u16(), message)));
        }

        let token: TokenResponse = parse_json(resp, "token").await?;
        Ok(Credentials::from_response(token))
    }

    /// Submit an export ticket for one period. Returns the ticket number.
    pub async fn submit_export(
        &self,
        token: &str,
        period: &str,
        date_from: &str,
        date_to: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/v1/contribuyente/migeigv/libros/rce/propuesta/web/propuesta/{}/exportacioncomprobantepropuesta",
            self.api_base, period
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("codTipoArchivo", "1"),
                ("codOrigenEnvio", "2"),
                ("fecEmisionIni", date_from),
                ("fecEmisionFin", date_to),
            ])
            .send()
            .await?;

        let resp = check_status(resp, "submit_export").await?;
        let ticket: TicketResponse = parse_json(resp, "submit_export").await?;
        ticket.num_ticket.ok_or(SireError::MalformedResponse {
            context: "submit_export",
            detail: "response without numTicket".into(),
        })
    }

    /// Fetch one page of ticket statuses for a period.
    pub async fn ticket_status(
        &self,
        token: &str,
        period: &str,
        ticket: &str,
    ) -> Result<TicketStatusPage> {
        let url = format!(
            "{}/v1/contribuyente/migeigv/libros/rvierce/gestionprocesosmasivos/web/masivo/consultaestadotickets",
            self.api_base
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("perIni", period),
                ("perFin", period),
                ("page", "1"),
                ("perPage", "40"),
                ("numTicket", ticket),
            ])
            .send()
            .await?;

        let resp = check_status(resp, "ticket_status").await?;
        parse_json(resp, "ticket_status").await
    }

    /// Poll a ticket until it reaches a terminal state or the polling
    /// window expires. The caller decides whether to resubmit later.
    pub async fn wait_until_done(
        &self,
        token: &str,
        period: &str,
        ticket: &str,
    ) -> Result<TicketRecord> {
        let started = Instant::now();
        loop {
            let page = self.ticket_status(token, period, ticket).await?;
            if let Some(record) = page.records.into_iter().next() {
                if record.is_done() {
                    return Ok(record);
                }
                tracing::debug!(
                    ticket,
                    state = record.process_state.as_deref().unwrap_or("?"),
                    "export still in progress"
                );
            }

            if started.elapsed() > self.poll_timeout {
                return Err(SireError::Timeout {
                    ticket: ticket.to_string(),
                    elapsed: started.elapsed(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Download the report file of a finished ticket.
    pub async fn download_report(
        &self,
        token: &str,
        period: &str,
        ticket: &str,
        params: &ReportParams,
    ) -> Result<Vec<u8>> {
        let url = format!(
            "{}/v1/contribuyente/migeigv/libros/rvierce/gestionprocesosmasivos/web/masivo/archivoreporte",
            self.api_base
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[
                ("nomArchivoReporte", params.file_name.as_str()),
                ("codTipoArchivoReporte", params.file_type.as_str()),
                ("perTributario", period),
                ("codProceso", params.process_code.as_str()),
                ("numTicket", ticket),
                ("codLibro", PURCHASE_LEDGER_CODE),
            ])
            .send()
            .await?;

        let resp = check_status(resp, "download_report").await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Extract the download parameters from a finished ticket record.
pub fn report_params(record: &TicketRecord) -> Result<ReportParams> {
    let process_code = record.process_code.clone().unwrap_or_default();
    let file = record
        .report_files
        .first()
        .ok_or(SireError::MalformedResponse {
            context: "report_params",
            detail: "ticket status without archivoReporte".into(),
        })?;
    let file_name = file.name.clone().ok_or(SireError::MalformedResponse {
        context: "report_params",
        detail: format!("report file without name: {file:?}"),
    })?;
    let file_type = match &file.file_type {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => {
            return Err(SireError::MalformedResponse {
                context: "report_params",
                detail: format!("report file without type: {file:?}"),
            })
        }
    };
    Ok(ReportParams {
        file_name,
        file_type,
        process_code,
    })
}

/// Normalize a non-2xx response into a typed error.
async fn check_status(resp: reqwest::Response, context: &'static str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();

    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(SireError::Auth(format!("{context}: {}", truncated(&body, 300))));
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&body) {
        // Known business outcome: nothing to export in the period.
        if status.as_u16() == 422
            && parsed.errors.iter().any(|e| {
                e.cod
                    .as_ref()
                    .map(|c| match c {
                        serde_json::Value::String(s) => s == NO_DATA_ERROR_CODE,
                        other => other.to_string() == NO_DATA_ERROR_CODE,
                    })
                    .unwrap_or(false)
            })
        {
            return Err(SireError::NoData);
        }
        if let Some(msg) = parsed.best_message() {
            return Err(SireError::Api {
                status: status.as_u16(),
                message: format!("{context}: {msg}"),
            });
        }
    }

    Err(SireError::Api {
        status: status.as_u16(),
        message: format!("{context}: {}", truncated(&body, 500)),
    })
}

async fn parse_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    context: &'static str,
) -> Result<T> {
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| SireError::MalformedResponse {
        context,
        detail: format!("{e}; body={}", truncated(&body, 300)),
    })
}

fn truncated(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}
