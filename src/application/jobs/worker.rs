//! Per-queue worker pools pulling from the [`JobQueue`].

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use metrics::histogram;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, error, info};

use crate::{
    application::production::{ProductionStage, ProgressSink},
    domain::jobs::{JobType, RenderJob},
};

use super::{
    executor::JobHandler,
    queue::{JobFailure, JobQueue},
};

const SOURCE: &str = "application::jobs::worker";
const METRIC_JOB_MS: &str = "pressroom_job_ms";

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub preview_workers: usize,
    pub final_workers: usize,
    pub production_workers: usize,
    pub render_3d_workers: usize,
    /// Deadline for a single attempt, whatever the job type.
    pub attempt_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            preview_workers: 4,
            final_workers: 2,
            production_workers: 2,
            render_3d_workers: 1,
            attempt_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&crate::config::JobsSettings> for WorkerSettings {
    fn from(settings: &crate::config::JobsSettings) -> Self {
        Self {
            preview_workers: settings.preview_concurrency.get() as usize,
            final_workers: settings.final_concurrency.get() as usize,
            production_workers: settings.production_concurrency.get() as usize,
            render_3d_workers: settings.render_3d_concurrency.get() as usize,
            attempt_timeout: settings.attempt_timeout,
        }
    }
}

impl WorkerSettings {
    pub fn workers_for(&self, job_type: JobType) -> usize {
        match job_type {
            JobType::Preview => self.preview_workers,
            JobType::Final => self.final_workers,
            JobType::Production => self.production_workers,
            JobType::Render3d => self.render_3d_workers,
        }
    }
}

/// Forwards stage progress of the running attempt to the queue.
pub struct JobProgress {
    queue: JobQueue,
    job_id: String,
}

impl JobProgress {
    pub fn new(queue: JobQueue, job_id: impl Into<String>) -> Self {
        Self {
            queue,
            job_id: job_id.into(),
        }
    }
}

impl ProgressSink for JobProgress {
    fn report(&self, stage: ProductionStage, progress: f32) {
        debug!(
            target = SOURCE,
            op = "progress",
            job_id = %self.job_id,
            stage = stage.as_str(),
            progress
        );
        self.queue.report_progress(&self.job_id, progress);
    }
}

/// Running worker tasks. Dropping the pool leaves them running; call
/// [`WorkerPool::shutdown`] to stop them.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Abort every worker. An attempt in flight is dropped and stays `processing`.
    pub async fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Spawn the configured number of workers for every queue.
pub fn spawn_workers(
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    settings: &WorkerSettings,
) -> WorkerPool {
    let mut handles = Vec::new();
    for job_type in JobType::ALL {
        let count = settings.workers_for(job_type);
        for index in 0..count {
            let queue = queue.clone();
            let handler = Arc::clone(&handler);
            let timeout = settings.attempt_timeout;
            handles.push(tokio::spawn(async move {
                worker_loop(queue, handler, job_type, index, timeout).await;
            }));
        }
        info!(
            target = SOURCE,
            op = "spawn",
            queue = job_type.as_str(),
            workers = count
        );
    }
    WorkerPool { handles }
}

async fn worker_loop(
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    job_type: JobType,
    index: usize,
    timeout: Duration,
) {
    loop {
        let job = queue.next(job_type).await;
        debug!(
            target = SOURCE,
            op = "claim",
            queue = job_type.as_str(),
            worker = index,
            job_id = %job.id
        );
        run_attempt(&queue, handler.as_ref(), job, timeout).await;
    }
}

/// Execute one claimed attempt and record its outcome on the queue.
pub async fn run_attempt(
    queue: &JobQueue,
    handler: &dyn JobHandler,
    job: RenderJob,
    timeout: Duration,
) {
    let started_at = Instant::now();
    let progress = JobProgress::new(queue.clone(), job.id.clone());
    let attempt = AssertUnwindSafe(handler.execute(&job, &progress)).catch_unwind();

    let outcome = match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(Ok(output))) => {
            queue.complete(&job.id, output);
            "completed"
        }
        Ok(Ok(Err(failure))) => {
            queue.fail(&job.id, failure);
            "failed"
        }
        Ok(Err(_panic)) => {
            error!(
                target = SOURCE,
                op = "execute",
                queue = job.job_type.as_str(),
                job_id = %job.id,
                tenant_id = %job.tenant_id,
                "job handler panicked"
            );
            queue.fail(
                &job.id,
                JobFailure::retryable("internal_error", "job handler panicked"),
            );
            "panicked"
        }
        Err(_) => {
            queue.fail(
                &job.id,
                JobFailure::retryable(
                    "job_timeout",
                    format!("attempt exceeded {} ms", timeout.as_millis()),
                ),
            );
            "timed_out"
        }
    };

    let elapsed_ms = started_at.elapsed().as_millis() as u64;
    histogram!(
        METRIC_JOB_MS,
        "queue" => job.job_type.as_str(),
        "result" => outcome
    )
    .record(elapsed_ms as f64);
    debug!(
        target = SOURCE,
        op = "execute",
        queue = job.job_type.as_str(),
        job_id = %job.id,
        attempt = job.attempts,
        result = outcome,
        elapsed_ms
    );
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        application::jobs::queue::{NewJob, QueueSettings},
        domain::{
            intent::{FinalIntent, RenderIntent},
            jobs::{JobOutput, JobState},
            options::RenderOptions,
        },
    };

    struct Flaky {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for Flaky {
        async fn execute(
            &self,
            _job: &RenderJob,
            progress: &dyn ProgressSink,
        ) -> Result<JobOutput, JobFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            progress.report(ProductionStage::RenderPages, 0.5);
            if call < self.failures_before_success {
                return Err(JobFailure::retryable("render_timeout", "slow page"));
            }
            Ok(JobOutput::Final {
                pdf_url: "memory://final.pdf".into(),
                page_count: 1,
                file_size: 10,
            })
        }
    }

    struct Stuck;

    #[async_trait]
    impl JobHandler for Stuck {
        async fn execute(
            &self,
            _job: &RenderJob,
            _progress: &dyn ProgressSink,
        ) -> Result<JobOutput, JobFailure> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(JobFailure::permanent("unreachable", "never"))
        }
    }

    fn final_job() -> NewJob {
        NewJob::new(
            "tenant",
            RenderIntent::Final(FinalIntent {
                project_id: "proj".into(),
                page_ids: Vec::new(),
                options: RenderOptions::default(),
            }),
        )
    }

    fn fast_queue() -> JobQueue {
        JobQueue::new(QueueSettings {
            backoff_base: Duration::from_millis(5),
            ..QueueSettings::default()
        })
    }

    #[tokio::test]
    async fn workers_retry_until_success() {
        let queue = fast_queue();
        let handler = Arc::new(Flaky {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        });
        let pool = spawn_workers(queue.clone(), handler.clone(), &WorkerSettings::default());

        let handle = queue.enqueue(final_job()).expect("enqueue");
        let job = queue
            .wait_for_completion(&handle.job_id, Duration::from_secs(5))
            .await
            .expect("job completes");

        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.progress, 1.0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn attempt_timeout_counts_as_retryable_failure() {
        let queue = fast_queue();
        let handle = queue.enqueue(final_job()).expect("enqueue");
        let job = queue.try_claim(JobType::Final).expect("claimed");

        run_attempt(&queue, &Stuck, job, Duration::from_millis(20)).await;

        let job = queue.status(&handle.job_id).expect("job");
        assert_eq!(job.state, JobState::Delayed);
        assert!(job.error.expect("error").starts_with("job_timeout"));
    }

    #[tokio::test]
    async fn progress_is_forwarded_to_the_job_record() {
        let queue = fast_queue();
        let handle = queue.enqueue(final_job()).expect("enqueue");
        queue.try_claim(JobType::Final).expect("claimed");

        JobProgress::new(queue.clone(), handle.job_id.clone())
            .report(ProductionStage::Combine, 0.6);

        let job = queue.status(&handle.job_id).expect("job");
        assert!((job.progress - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn pool_sizes_follow_settings() {
        let settings = WorkerSettings {
            render_3d_workers: 0,
            ..WorkerSettings::default()
        };
        assert_eq!(settings.workers_for(JobType::Production), 2);
        assert_eq!(settings.workers_for(JobType::Render3d), 0);
    }
}
