use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SireError>;

/// Errors from the SIRE API, normalized so callers can distinguish
/// auth failures, the "nothing in range" business outcome, and
/// transient service errors.
#[derive(Debug, Error)]
pub enum SireError {
    /// Credentials rejected or the token exchange failed.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The service correctly reports no documents in the requested range.
    /// This is a valid empty result, not a failure.
    #[error("no documents in the requested range")]
    NoData,

    /// Non-2xx response that is not one of the known business outcomes.
    #[error("SIRE API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("malformed response from {context}: {detail}")]
    MalformedResponse {
        context: &'static str,
        detail: String,
    },

    /// The ticket did not reach a terminal state within the polling window.
    #[error("timed out after {elapsed:?} waiting for ticket {ticket}")]
    Timeout { ticket: String, elapsed: Duration },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl SireError {
    /// True for failures worth retrying on a later job run.
    pub fn is_transient(&self) -> bool {
        match self {
            SireError::Api { status, .. } => *status >= 500,
            SireError::Timeout { .. } | SireError::Http(_) => true,
            SireError::Auth(_) | SireError::NoData | SireError::MalformedResponse { .. } => false,
        }
    }
}
