//! Collaborator boundaries for external actors.
//!
//! The portal UI is driven by an out-of-process automation sidecar; these
//! traits are the seam between the orchestration core and that sidecar,
//! and the seam test doubles plug into.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    /// Credentials rejected or the portal session could not be established.
    #[error("portal authentication failed: {0}")]
    Auth(String),

    /// The notification list could not be loaded or read.
    #[error("list unreadable: {0}")]
    ListUnreadable(String),

    /// Driver-level failure for one item or action.
    #[error("driver failure: {0}")]
    Failed(String),
}

/// Portal login credentials for one account.
#[derive(Debug, Clone)]
pub struct PortalCredentials {
    pub ruc: String,
    pub sol_user: String,
    pub sol_key: String,
}

/// Metadata scraped from one list row, used for staleness checks
/// before the row's detail panel is trusted.
#[derive(Debug, Clone)]
pub struct RowSummary {
    pub title: String,
    pub published_at: Option<NaiveDate>,
    /// External id when the portal exposes one.
    pub external_id: Option<String>,
}

/// Drives the portal mailbox screen: login, list, select, extract.
///
/// One driver instance is one live portal session. Item selection and
/// staleness detection are the caller's responsibility; the driver only
/// exposes the raw screen actions.
#[async_trait]
pub trait MailboxDriver: Send + Sync {
    async fn login(&mut self, credentials: &PortalCredentials) -> Result<(), DriverError>;

    /// Open the mailbox list. Returns the number of visible rows,
    /// newest first.
    async fn open_mailbox(&mut self) -> Result<usize, DriverError>;

    async fn row_summary(&mut self, index: usize) -> Result<RowSummary, DriverError>;

    /// Click row `index` so its detail panel starts loading.
    async fn select_row(&mut self, index: usize) -> Result<(), DriverError>;

    /// Current text content of the detail panel, whatever it shows.
    async fn panel_text(&mut self) -> Result<String, DriverError>;

    /// Download the attachment of the currently displayed item.
    async fn download_current(&mut self, dest_dir: &Path) -> Result<PathBuf, DriverError>;
}

/// What the driver found when asked to fetch one document artifact.
#[derive(Debug, Clone)]
pub enum DocumentOutcome {
    Fetched { path: PathBuf, sha256: String },
    /// The portal has no artifact of this kind for the item.
    NotFound,
}

/// Request for one per-item artifact fetch.
#[derive(Debug, Clone)]
pub struct DocumentRequest {
    pub item_id: String,
    pub doc_type: String,
    pub series: Option<String>,
    pub number: Option<String>,
    pub supplier_ruc: Option<String>,
    pub kind: String,
}

/// Fetches individual document artifacts (XML/PDF) through the portal.
#[async_trait]
pub trait DocumentDriver: Send + Sync {
    async fn login(&mut self, credentials: &PortalCredentials) -> Result<(), DriverError>;

    async fn fetch_document(
        &mut self,
        request: &DocumentRequest,
        dest_dir: &Path,
    ) -> Result<DocumentOutcome, DriverError>;
}

/// Opens fresh driver sessions. One session per job run.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn mailbox_session(&self, headless: bool) -> anyhow::Result<Box<dyn MailboxDriver>>;
    async fn document_session(&self, headless: bool) -> anyhow::Result<Box<dyn DocumentDriver>>;
}

/// Durable cooperative-cancellation check, polled between items and
/// before every destructive action.
#[async_trait]
pub trait CancelCheck: Send + Sync {
    async fn should_stop(&self) -> anyhow::Result<bool>;
}

/// A cancel check that never fires, for jobs run outside the queue.
pub struct NeverCancelled;

#[async_trait]
impl CancelCheck for NeverCancelled {
    async fn should_stop(&self) -> anyhow::Result<bool> {
        Ok(false)
    }
}
