//! HTTP driver for the browser-automation sidecar.
//!
//! The sidecar owns the actual browser and all DOM knowledge; this
//! client speaks a small JSON protocol against it, one sidecar session
//! per job run. Selectors and click sequences never appear here.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::traits::{
    DocumentDriver, DocumentOutcome, DocumentRequest, DriverError, DriverFactory, MailboxDriver,
    PortalCredentials, RowSummary,
};

pub struct PortalDriverFactory {
    base_url: String,
    client: reqwest::Client,
}

impl PortalDriverFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn open_session(&self, headless: bool) -> Result<PortalSession> {
        #[derive(Deserialize)]
        struct SessionResponse {
            session_id: String,
        }

        let resp = self
            .client
            .post(format!("{}/sessions", self.base_url))
            .json(&serde_json::json!({ "headless": headless }))
            .send()
            .await
            .context("portal driver unreachable")?
            .error_for_status()
            .context("portal driver rejected session open")?;

        let session: SessionResponse = resp.json().await.context("bad session response")?;
        tracing::debug!(session_id = %session.session_id, "opened portal driver session");

        Ok(PortalSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            session_id: session.session_id,
        })
    }
}

#[async_trait]
impl DriverFactory for PortalDriverFactory {
    async fn mailbox_session(&self, headless: bool) -> Result<Box<dyn MailboxDriver>> {
        Ok(Box::new(self.open_session(headless).await?))
    }

    async fn document_session(&self, headless: bool) -> Result<Box<dyn DocumentDriver>> {
        Ok(Box::new(self.open_session(headless).await?))
    }
}

/// One live sidecar session.
pub struct PortalSession {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl PortalSession {
    fn url(&self, tail: &str) -> String {
        format!("{}/sessions/{}/{}", self.base_url, self.session_id, tail)
    }

    async fn do_login(&self, credentials: &PortalCredentials) -> Result<(), DriverError> {
        let resp = self
            .client
            .post(self.url("login"))
            .json(&serde_json::json!({
                "ruc": credentials.ruc,
                "sol_user": credentials.sol_user,
                "sol_key": credentials.sol_key,
            }))
            .send()
            .await
            .map_err(transport)?;

        match resp.status().as_u16() {
            200 => Ok(()),
            401 | 403 => Err(DriverError::Auth(body_message(resp).await)),
            _ => Err(DriverError::Failed(body_message(resp).await)),
        }
    }

    async fn save_body(
        &self,
        resp: reqwest::Response,
        dest_dir: &Path,
    ) -> Result<(PathBuf, String), DriverError> {
        let file_name = resp
            .headers()
            .get("x-file-name")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("download.bin")
            .to_string();
        let bytes = resp.bytes().await.map_err(transport)?;

        std::fs::create_dir_all(dest_dir)
            .map_err(|e| DriverError::Failed(format!("creating {}: {e}", dest_dir.display())))?;
        let path = dest_dir.join(file_name);
        std::fs::write(&path, &bytes)
            .map_err(|e| DriverError::Failed(format!("writing {}: {e}", path.display())))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok((path, format!("{:x}", hasher.finalize())))
    }
}

#[async_trait]
impl MailboxDriver for PortalSession {
    async fn login(&mut self, credentials: &PortalCredentials) -> Result<(), DriverError> {
        self.do_login(credentials).await
    }

    async fn open_mailbox(&mut self) -> Result<usize, DriverError> {
        #[derive(Deserialize)]
        struct OpenResponse {
            rows: usize,
        }

        let resp = self
            .client
            .post(self.url("mailbox/open"))
            .send()
            .await
            .map_err(transport)?;
        match resp.status().as_u16() {
            200 => {}
            401 | 403 => return Err(DriverError::Auth(body_message(resp).await)),
            _ => return Err(DriverError::ListUnreadable(body_message(resp).await)),
        }
        let body: OpenResponse = resp
            .json()
            .await
            .map_err(|e| DriverError::ListUnreadable(e.to_string()))?;
        Ok(body.rows)
    }

    async fn row_summary(&mut self, index: usize) -> Result<RowSummary, DriverError> {
        #[derive(Deserialize)]
        struct RowResponse {
            title: String,
            published_at: Option<chrono::NaiveDate>,
            external_id: Option<String>,
        }

        let resp = self
            .client
            .get(self.url(&format!("mailbox/rows/{index}")))
            .send()
            .await
            .map_err(transport)?;
        let resp = ok_or_action_error(resp).await?;
        let row: RowResponse = resp
            .json()
            .await
            .map_err(|e| DriverError::Failed(e.to_string()))?;
        Ok(RowSummary {
            title: row.title,
            published_at: row.published_at,
            external_id: row.external_id,
        })
    }

    async fn select_row(&mut self, index: usize) -> Result<(), DriverError> {
        let resp = self
            .client
            .post(self.url(&format!("mailbox/rows/{index}/select")))
            .send()
            .await
            .map_err(transport)?;
        ok_or_action_error(resp).await?;
        Ok(())
    }

    async fn panel_text(&mut self) -> Result<String, DriverError> {
        #[derive(Deserialize)]
        struct PanelResponse {
            text: String,
        }

        let resp = self
            .client
            .get(self.url("mailbox/panel"))
            .send()
            .await
            .map_err(transport)?;
        let resp = ok_or_action_error(resp).await?;
        let panel: PanelResponse = resp
            .json()
            .await
            .map_err(|e| DriverError::Failed(e.to_string()))?;
        Ok(panel.text)
    }

    async fn download_current(&mut self, dest_dir: &Path) -> Result<PathBuf, DriverError> {
        let resp = self
            .client
            .post(self.url("mailbox/download"))
            .send()
            .await
            .map_err(transport)?;
        let resp = ok_or_action_error(resp).await?;
        let (path, _sha256) = self.save_body(resp, dest_dir).await?;
        Ok(path)
    }
}

#[async_trait]
impl DocumentDriver for PortalSession {
    async fn login(&mut self, credentials: &PortalCredentials) -> Result<(), DriverError> {
        self.do_login(credentials).await
    }

    async fn fetch_document(
        &mut self,
        request: &DocumentRequest,
        dest_dir: &Path,
    ) -> Result<DocumentOutcome, DriverError> {
        let resp = self
            .client
            .post(self.url("documents/fetch"))
            .json(&serde_json::json!({
                "item_id": request.item_id,
                "doc_type": request.doc_type,
                "series": request.series,
                "number": request.number,
                "supplier_ruc": request.supplier_ruc,
                "kind": request.kind,
            }))
            .send()
            .await
            .map_err(transport)?;

        match resp.status().as_u16() {
            200 => {
                let (path, sha256) = self.save_body(resp, dest_dir).await?;
                Ok(DocumentOutcome::Fetched { path, sha256 })
            }
            404 => Ok(DocumentOutcome::NotFound),
            401 | 403 => Err(DriverError::Auth(body_message(resp).await)),
            _ => Err(DriverError::Failed(body_message(resp).await)),
        }
    }
}

fn transport(e: reqwest::Error) -> DriverError {
    DriverError::Failed(format!("driver transport error: {e}"))
}

/// Pass a successful response through, classifying 401/403 as lost
/// authentication so callers can re-login mid-scan.
async fn ok_or_action_error(resp: reqwest::Response) -> Result<reqwest::Response, DriverError> {
    match resp.status().as_u16() {
        200..=299 => Ok(resp),
        401 | 403 => Err(DriverError::Auth(body_message(resp).await)),
        _ => Err(DriverError::Failed(body_message(resp).await)),
    }
}

async fn body_message(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if body.is_empty() {
        format!("status {status}")
    } else {
        format!("status {status}: {body}")
    }
}
