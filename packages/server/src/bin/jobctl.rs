//! Operator CLI: enqueue, stop, inspect, and retry retrieval work.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use server::config::Config;
use server::domains::accounts::Account;
use server::domains::evidence::{Evidence, EvidenceKind};
use server::domains::jobs::{
    materialize_daily_jobs, EnqueueOptions, EnqueueOutcome, FetchJob, JobFilter, JobKind,
    RetryMode,
};
use server::domains::notifications::Notification;

#[derive(Parser)]
#[command(name = "jobctl", about = "Control the retrieval job queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Mailbox,
    Documents,
}

impl From<KindArg> for JobKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Mailbox => JobKind::Mailbox,
            KindArg::Documents => JobKind::Documents,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RetryModeArg {
    Full,
    OnlyPending,
    OnlyFailed,
}

impl From<RetryModeArg> for RetryMode {
    fn from(value: RetryModeArg) -> Self {
        match value {
            RetryModeArg::Full => RetryMode::Full,
            RetryModeArg::OnlyPending => RetryMode::OnlyPending,
            RetryModeArg::OnlyFailed => RetryMode::OnlyFailed,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue a job for one account and scope
    Enqueue {
        ruc: String,
        #[arg(value_enum)]
        kind: KindArg,
        /// Period (YYYYMM) for documents, date key for mailbox
        scope: String,
        #[arg(long)]
        date_from: Option<NaiveDate>,
        #[arg(long)]
        date_to: Option<NaiveDate>,
        /// Run the browser with a visible window
        #[arg(long)]
        headed: bool,
        #[arg(long, value_enum, default_value = "full")]
        retry_mode: RetryModeArg,
    },
    /// Request a stop for matching jobs
    Stop {
        #[arg(long)]
        ruc: Option<String>,
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        #[arg(long)]
        scope: Option<String>,
    },
    /// List recent jobs
    List {
        #[arg(long)]
        ruc: Option<String>,
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Evidence progress for one (account, period)
    Progress { ruc: String, period: String },
    /// Reset a failed evidence item back to pending
    Retry { item_id: String },
    /// Run the daily materializer now
    Materialize,
    /// Create or update a taxpayer account
    AddAccount {
        ruc: String,
        sol_user: String,
        sol_key: String,
        #[arg(long)]
        business_name: Option<String>,
        #[arg(long)]
        api_client_id: Option<String>,
        #[arg(long)]
        api_client_secret: Option<String>,
        /// Register the account without scheduling work for it
        #[arg(long)]
        inactive: bool,
    },
    /// List retrieved mailbox notifications for one account
    Notifications {
        ruc: String,
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .context("connecting to database")?;

    match cli.command {
        Command::Enqueue {
            ruc,
            kind,
            scope,
            date_from,
            date_to,
            headed,
            retry_mode,
        } => {
            let account = require_account(&ruc, &pool).await?;
            let options = EnqueueOptions {
                headless: !headed,
                retry_mode: retry_mode.into(),
                date_from,
                date_to,
            };
            match FetchJob::enqueue(account.id, kind.into(), &scope, options, &pool).await? {
                EnqueueOutcome::Created(job) => println!("created job {}", job.id),
                EnqueueOutcome::Adopted(job) => println!("re-queued existing job {}", job.id),
                EnqueueOutcome::RejectedRunning(id) => {
                    bail!("rejected: job {id} is already running for this scope")
                }
            }
        }
        Command::Stop { ruc, kind, scope } => {
            let account_id = match ruc {
                Some(ruc) => Some(require_account(&ruc, &pool).await?.id),
                None => None,
            };
            let filter = JobFilter {
                account_id,
                kind: kind.map(Into::into),
                scope_key: scope,
                ..Default::default()
            };
            let counts = FetchJob::request_stop(&filter, &pool).await?;
            println!(
                "stopped {} pending, flagged {} running",
                counts.stopped, counts.stop_requested
            );
        }
        Command::List { ruc, limit } => {
            let account_id = match ruc {
                Some(ruc) => Some(require_account(&ruc, &pool).await?.id),
                None => None,
            };
            let filter = JobFilter {
                account_id,
                ..Default::default()
            };
            for job in FetchJob::list(&filter, limit, &pool).await? {
                println!(
                    "{}  {:?}  {:?}  scope={}  queued={}  claimable={}  created={}",
                    job.id,
                    job.kind,
                    job.status,
                    job.scope_key,
                    job.queued,
                    job.is_claim_eligible(),
                    job.created_at
                );
                if let Some(stats) = &job.stats {
                    println!("    stats: {}", serde_json::to_string(&stats.0)?);
                }
                if let Some(err) = &job.last_error {
                    println!("    last_error: {err}");
                }
            }
        }
        Command::Progress { ruc, period } => {
            let account = require_account(&ruc, &pool).await?;
            let progress =
                Evidence::progress(account.id, &period, EvidenceKind::Xml, &pool).await?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
        }
        Command::Retry { item_id } => {
            let reset = Evidence::retry_item(&item_id, &pool).await?;
            println!("reset {reset} evidence row(s)");
        }
        Command::Materialize => {
            let created = materialize_daily_jobs(&pool).await?;
            println!("created {created} job(s)");
        }
        Command::AddAccount {
            ruc,
            sol_user,
            sol_key,
            business_name,
            api_client_id,
            api_client_secret,
            inactive,
        } => {
            let account = Account {
                id: uuid::Uuid::new_v4(),
                ruc,
                business_name,
                sol_user,
                sol_key,
                api_client_id,
                api_client_secret,
                active: !inactive,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            };
            let saved = account.upsert(&pool).await?;
            println!("account {} ({}) active={}", saved.ruc, saved.id, saved.active);
        }
        Command::Notifications { ruc, limit } => {
            let account = require_account(&ruc, &pool).await?;
            for n in Notification::list_for_account(account.id, limit, &pool).await? {
                println!(
                    "{}  {}  {}",
                    n.published_at.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
                    n.signature,
                    n.subject
                );
            }
        }
    }

    Ok(())
}

async fn require_account(ruc: &str, pool: &PgPool) -> Result<Account> {
    Account::find_by_ruc(ruc, pool)
        .await?
        .with_context(|| format!("no active account with RUC {ruc}"))
}
