//! Per-account cached session state.
//!
//! One JSON file per account under the sessions directory. Holds the
//! API token with its expiry plus the last ticket identifiers, so a
//! restarted worker can resume an in-flight export instead of
//! resubmitting it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<DateTime<Utc>>,
    /// Last submitted export ticket, resumable across worker restarts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ticket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ticket_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_process_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Valid only when both token and expiry are present and the expiry
    /// is strictly in the future.
    pub fn token_is_valid(&self) -> bool {
        match (&self.token, &self.token_expires_at) {
            (Some(token), Some(expires_at)) => !token.is_empty() && *expires_at > Utc::now(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, ruc: &str) -> PathBuf {
        self.dir.join(format!("{ruc}.json"))
    }

    /// Load an account's session state. A missing file is `None`; a
    /// corrupted file is quarantined and also reported as `None`, so a
    /// bad cache forces fresh authentication instead of crashing.
    pub fn load(&self, ruc: &str) -> Result<Option<SessionState>> {
        let path = self.path_for(ruc);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(format!("reading session state {}", path.display())),
        };

        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                tracing::warn!(ruc, error = %e, "session state corrupted, quarantining");
                quarantine(&path)?;
                Ok(None)
            }
        }
    }

    /// Read-merge-write: load the current state, apply the patch, stamp
    /// `updated_at`, and atomically replace the file.
    pub fn update<F>(&self, ruc: &str, patch: F) -> Result<SessionState>
    where
        F: FnOnce(&mut SessionState),
    {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating sessions dir {}", self.dir.display()))?;

        let mut state = self.load(ruc)?.unwrap_or_default();
        patch(&mut state);
        state.updated_at = Some(Utc::now());

        let path = self.path_for(ruc);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(&state)?;
        fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;

        Ok(state)
    }

    /// Drop the cached token for an account, keeping ticket state.
    pub fn invalidate_token(&self, ruc: &str) -> Result<()> {
        self.update(ruc, |state| {
            state.token = None;
            state.token_expires_at = None;
        })?;
        Ok(())
    }
}

fn quarantine(path: &Path) -> Result<()> {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let aside = path.with_extension(format!("json.corrupt-{stamp}"));
    fs::rename(path, &aside)
        .with_context(|| format!("quarantining {} -> {}", path.display(), aside.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn temp_store() -> (SessionStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("sessions-test-{}", uuid::Uuid::new_v4()));
        (SessionStore::new(&dir), dir)
    }

    #[test]
    fn missing_file_is_none() {
        let (store, dir) = temp_store();
        assert!(store.load("20123456789").unwrap().is_none());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn update_then_load_round_trips() {
        let (store, dir) = temp_store();
        store
            .update("20123456789", |s| {
                s.token = Some("tok".into());
                s.token_expires_at = Some(Utc::now() + Duration::hours(1));
                s.last_ticket = Some("T-1".into());
            })
            .unwrap();

        let state = store.load("20123456789").unwrap().unwrap();
        assert!(state.token_is_valid());
        assert_eq!(state.last_ticket.as_deref(), Some("T-1"));
        assert!(state.updated_at.is_some());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn expired_token_is_invalid() {
        let state = SessionState {
            token: Some("tok".into()),
            token_expires_at: Some(Utc::now() - Duration::minutes(1)),
            ..Default::default()
        };
        assert!(!state.token_is_valid());
    }

    #[test]
    fn token_without_expiry_is_invalid() {
        let state = SessionState {
            token: Some("tok".into()),
            ..Default::default()
        };
        assert!(!state.token_is_valid());
    }

    #[test]
    fn corrupted_file_is_quarantined_and_absent() {
        let (store, dir) = temp_store();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("20123456789.json"), "{not json").unwrap();

        assert!(store.load("20123456789").unwrap().is_none());

        // The bad file was moved aside, not deleted.
        let quarantined = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains("corrupt"));
        assert!(quarantined);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn invalidate_token_keeps_ticket() {
        let (store, dir) = temp_store();
        store
            .update("20123456789", |s| {
                s.token = Some("tok".into());
                s.token_expires_at = Some(Utc::now() + Duration::hours(1));
                s.last_ticket = Some("T-9".into());
            })
            .unwrap();
        store.invalidate_token("20123456789").unwrap();

        let state = store.load("20123456789").unwrap().unwrap();
        assert!(!state.token_is_valid());
        assert_eq!(state.last_ticket.as_deref(), Some("T-9"));
        let _ = fs::remove_dir_all(dir);
    }
}
