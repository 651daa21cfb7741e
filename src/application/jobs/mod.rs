//! Asynchronous render jobs: the in-process queue, the workers draining it
//! and the periodic sweep of finished records.

mod executor;
mod queue;
mod runtime;
mod sweep;
mod worker;

pub(crate) use executor::{load_project, production_request, select_pages};
pub use executor::{JobHandler, MAX_TEXTURE_PX, RenderJobExecutor, job_failure, texture_dpi};
pub use queue::{JobFailure, JobHandle, JobQueue, NewJob, QueueError, QueueSettings};
pub use runtime::JobRuntime;
pub use sweep::{
    DEFAULT_SWEEP_CRON, SweepContext, SweepJobsJob, process_sweep_jobs_job, sweep_schedule,
};
pub use worker::{JobProgress, WorkerPool, WorkerSettings, run_attempt, spawn_workers};
