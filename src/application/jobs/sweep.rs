//! Cron job dropping finished jobs past their retention window.

use std::str::FromStr;

use apalis::prelude::*;
use apalis_cron::Schedule;
use metrics::counter;
use time::OffsetDateTime;

use super::queue::JobQueue;

const SOURCE: &str = "application::jobs::sweep";
const JOBS_SWEPT_TOTAL: &str = "pressroom_jobs_swept_total";

/// Every 15 minutes, on the quarter hour.
pub const DEFAULT_SWEEP_CRON: &str = "0 */15 * * * *";

/// Marker for the cron-triggered sweep.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct SweepJobsJob;

impl From<chrono::DateTime<chrono::Utc>> for SweepJobsJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

#[derive(Clone)]
pub struct SweepContext {
    pub queue: JobQueue,
}

pub async fn process_sweep_jobs_job(
    _job: SweepJobsJob,
    ctx: Data<SweepContext>,
) -> Result<(), apalis::prelude::Error> {
    let removed = ctx.queue.sweep(OffsetDateTime::now_utc());
    if removed > 0 {
        counter!(JOBS_SWEPT_TOTAL).increment(removed as u64);
        tracing::info!(target = SOURCE, op = "sweep", removed, "Swept finished jobs");
    }
    Ok(())
}

/// Parse the sweep schedule. Expressions use the six-field form with seconds.
pub fn sweep_schedule(expression: &str) -> Result<Schedule, String> {
    Schedule::from_str(expression).map_err(|err| format!("invalid cron `{expression}`: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_fires_every_quarter_hour() {
        let schedule = sweep_schedule(DEFAULT_SWEEP_CRON).expect("schedule");
        let upcoming: Vec<_> = schedule.upcoming(chrono::Utc).take(2).collect();
        assert_eq!(upcoming.len(), 2);
        assert_eq!((upcoming[1] - upcoming[0]).num_minutes(), 15);
    }

    #[test]
    fn bad_expressions_are_rejected() {
        assert!(sweep_schedule("every now and then").is_err());
    }

    #[tokio::test]
    async fn sweep_job_runs_against_the_queue() {
        let ctx = SweepContext {
            queue: JobQueue::new(Default::default()),
        };
        process_sweep_jobs_job(SweepJobsJob, Data::new(ctx))
            .await
            .expect("sweep");
    }
}
