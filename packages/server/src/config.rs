use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// One session-state file per account lives under this directory.
    pub sessions_dir: PathBuf,
    /// Downloaded artifacts land under <artifacts_dir>/<ruc>/<period>/.
    pub artifacts_dir: PathBuf,
    /// Base URL of the browser-automation sidecar driving the portal UI.
    pub portal_driver_url: String,
    pub sire_client_id: Option<String>,
    pub sire_client_secret: Option<String>,
    /// Worker poll interval when the queue is empty, in seconds.
    pub poll_interval_secs: u64,
    /// A job running longer than this is considered crashed and reaped.
    pub job_max_runtime_secs: i64,
    pub evidence_max_attempts: i32,
    pub evidence_backoff_secs: i64,
    /// Mailbox scans stop after this many list rows.
    pub mailbox_max_scan: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            sessions_dir: env::var("SESSIONS_DIR")
                .unwrap_or_else(|_| "data/sessions".to_string())
                .into(),
            artifacts_dir: env::var("ARTIFACTS_DIR")
                .unwrap_or_else(|_| "data/artifacts".to_string())
                .into(),
            portal_driver_url: env::var("PORTAL_DRIVER_URL")
                .unwrap_or_else(|_| "http://localhost:9321".to_string()),
            sire_client_id: env::var("SIRE_CLIENT_ID").ok(),
            sire_client_secret: env::var("SIRE_CLIENT_SECRET").ok(),
            poll_interval_secs: parse_env("WORKER_POLL_INTERVAL_SECS", 3)?,
            job_max_runtime_secs: parse_env("JOB_MAX_RUNTIME_SECS", 3600)?,
            evidence_max_attempts: parse_env("EVIDENCE_MAX_ATTEMPTS", 3)?,
            evidence_backoff_secs: parse_env("EVIDENCE_BACKOFF_SECS", 900)?,
            mailbox_max_scan: parse_env("MAILBOX_MAX_SCAN", 50)?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} must be a valid number")),
        Err(_) => Ok(default),
    }
}
