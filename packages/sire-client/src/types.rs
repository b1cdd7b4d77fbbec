use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Response of the OAuth2 password-grant token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_expires_in() -> i64 {
    3000
}

/// An access token together with its computed absolute expiry.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credentials {
    pub fn from_response(resp: TokenResponse) -> Self {
        Self {
            token: resp.access_token,
            expires_at: Utc::now() + Duration::seconds(resp.expires_in),
        }
    }
}

/// Response of the export-submission endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketResponse {
    #[serde(rename = "numTicket")]
    pub num_ticket: Option<String>,
}

/// One page of ticket-status records.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketStatusPage {
    #[serde(rename = "registros", default)]
    pub records: Vec<TicketRecord>,
}

/// Status of one asynchronous export process.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketRecord {
    #[serde(rename = "numTicket")]
    pub num_ticket: Option<String>,
    #[serde(rename = "codEstadoProceso")]
    pub process_state: Option<String>,
    #[serde(rename = "desEstadoProceso")]
    pub process_state_desc: Option<String>,
    #[serde(rename = "codProceso")]
    pub process_code: Option<String>,
    #[serde(rename = "archivoReporte", default)]
    pub report_files: Vec<ReportFile>,
}

/// Process state code meaning "finished".
pub const PROCESS_STATE_DONE: &str = "06";

impl TicketRecord {
    /// Whether the export has reached its terminal "finished" state.
    pub fn is_done(&self) -> bool {
        if self.process_state.as_deref() == Some(PROCESS_STATE_DONE) {
            return true;
        }
        self.process_state_desc
            .as_deref()
            .is_some_and(|d| d.eq_ignore_ascii_case("terminado"))
    }
}

/// A downloadable report file attached to a finished ticket.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportFile {
    #[serde(rename = "nomArchivoReporte")]
    pub name: Option<String>,
    // The service spells this field inconsistently across deployments.
    #[serde(rename = "codTipoAchivoReporte", alias = "codTipoArchivoReporte")]
    pub file_type: Option<serde_json::Value>,
}

/// Parameters needed to download a finished ticket's report.
#[derive(Debug, Clone)]
pub struct ReportParams {
    pub file_name: String,
    pub file_type: String,
    pub process_code: String,
}

/// Error body shape returned on 4xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub errors: Vec<ErrorItem>,
    pub msg: Option<String>,
    pub message: Option<String>,
    pub error_description: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorItem {
    pub cod: Option<serde_json::Value>,
    pub msg: Option<String>,
}

impl ErrorBody {
    pub fn best_message(&self) -> Option<&str> {
        self.msg
            .as_deref()
            .or(self.message.as_deref())
            .or(self.error_description.as_deref())
            .or(self.error.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_by_state_code() {
        let record: TicketRecord =
            serde_json::from_str(r#"{"numTicket":"T1","codEstadoProceso":"06"}"#).unwrap();
        assert!(record.is_done());
    }

    #[test]
    fn done_by_description() {
        let record: TicketRecord =
            serde_json::from_str(r#"{"numTicket":"T1","desEstadoProceso":"Terminado"}"#).unwrap();
        assert!(record.is_done());
    }

    #[test]
    fn in_progress_is_not_done() {
        let record: TicketRecord = serde_json::from_str(
            r#"{"numTicket":"T1","codEstadoProceso":"03","desEstadoProceso":"En proceso"}"#,
        )
        .unwrap();
        assert!(!record.is_done());
    }

    #[test]
    fn report_file_accepts_both_spellings() {
        let misspelled: ReportFile =
            serde_json::from_str(r#"{"nomArchivoReporte":"a.txt","codTipoAchivoReporte":"01"}"#)
                .unwrap();
        assert!(misspelled.file_type.is_some());

        let corrected: ReportFile =
            serde_json::from_str(r#"{"nomArchivoReporte":"a.txt","codTipoArchivoReporte":1}"#)
                .unwrap();
        assert!(corrected.file_type.is_some());
    }
}
