mod executor;
mod job;
mod materializer;
mod worker;

pub use executor::{execute_job, ExecReport};
pub use job::{
    resolve_status, EnqueueOptions, EnqueueOutcome, FetchJob, JobFilter, JobKind, JobStats,
    JobStatus, RetryMode, StopCounts,
};
pub use materializer::{materialize_daily_jobs, reap_stale_jobs};
pub use worker::JobWorker;
