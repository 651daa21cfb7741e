use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering},
    },
    time::Duration,
};

use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::{
    sync::Notify,
    time::{Instant, sleep},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        intent::RenderIntent,
        jobs::{CancelOutcome, JobOutput, JobState, JobType, QueueStats, RenderJob},
    },
    util::lock::mutex_lock,
};

const SOURCE: &str = "application::jobs::queue";
const DEFAULT_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const JOBS_ENQUEUED_TOTAL: &str = "pressroom_jobs_enqueued_total";
const JOBS_COMPLETED_TOTAL: &str = "pressroom_jobs_completed_total";
const JOBS_FAILED_TOTAL: &str = "pressroom_jobs_failed_total";
const JOBS_RETRIED_TOTAL: &str = "pressroom_jobs_retried_total";
/// Error code recorded on jobs stopped by a cancel request.
pub const CANCELLED_CODE: &str = "cancelled";

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_attempts: u32,
    /// First retry delay; each further retry doubles it.
    pub backoff_base: Duration,
    /// Pending (queued + delayed) jobs accepted per queue.
    pub max_pending: usize,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            max_pending: 10_000,
            completed_retention: Duration::from_secs(24 * 60 * 60),
            failed_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl From<&crate::config::JobsSettings> for QueueSettings {
    fn from(settings: &crate::config::JobsSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.get(),
            backoff_base: settings.backoff_base,
            max_pending: settings.max_pending.get() as usize,
            completed_retention: settings.completed_retention,
            failed_retention: settings.failed_retention,
        }
    }
}

impl QueueSettings {
    /// Delay before the retry that follows attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueueError {
    #[error("queue `{queue}` is full ({pending} pending jobs)")]
    Full { queue: &'static str, pending: usize },
    #[error("job queue is shut down")]
    Closed,
    #[error("job `{job_id}` not found")]
    NotFound { job_id: String },
    #[error("job `{job_id}` failed: {message}")]
    JobFailed { job_id: String, message: String },
    #[error("job `{job_id}` did not finish within {timeout:?}")]
    WaitTimeout { job_id: String, timeout: Duration },
}

impl QueueError {
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::Full { .. } | QueueError::Closed => "queue_unavailable",
            QueueError::NotFound { .. } => "job_not_found",
            QueueError::JobFailed { .. } => "job_failed",
            QueueError::WaitTimeout { .. } => "job_wait_timeout",
        }
    }
}

/// Caller-facing description of a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub intent: RenderIntent,
    /// Overrides the job type's default priority.
    pub priority: Option<i32>,
}

impl NewJob {
    pub fn new(tenant_id: impl Into<String>, intent: RenderIntent) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
            intent,
            priority: None,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobHandle {
    pub job_id: String,
    pub job_type: JobType,
    pub state: JobState,
}

/// Outcome of one failed attempt as reported by a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub code: &'static str,
    pub message: String,
    /// Validation failures are terminal no matter how many attempts remain.
    pub retryable: bool,
}

impl JobFailure {
    pub fn retryable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadyEntry {
    priority: i32,
    sequence: u64,
    job_id: String,
}

impl Ord for ReadyEntry {
    // Max-heap: higher priority first, then lower sequence (FIFO).
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct Lane {
    ready: Mutex<BinaryHeap<ReadyEntry>>,
    notify: Notify,
}

struct QueueInner {
    jobs: DashMap<String, RenderJob>,
    sequences: DashMap<String, u64>,
    lanes: HashMap<JobType, Lane>,
    next_sequence: AtomicU64,
    closed: AtomicBool,
    settings: QueueSettings,
}

/// In-process render job queue: one priority lane per job type, with
/// retry scheduling and a job table callers can poll.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new(settings: QueueSettings) -> Self {
        let lanes = JobType::ALL
            .into_iter()
            .map(|job_type| (job_type, Lane::default()))
            .collect();
        Self {
            inner: Arc::new(QueueInner {
                jobs: DashMap::new(),
                sequences: DashMap::new(),
                lanes,
                next_sequence: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    fn lane(&self, job_type: JobType) -> &Lane {
        // Every job type gets a lane in `new`.
        &self.inner.lanes[&job_type]
    }

    pub fn enqueue(&self, job: NewJob) -> Result<JobHandle, QueueError> {
        if self.inner.closed.load(AtomicOrdering::Acquire) {
            return Err(QueueError::Closed);
        }
        let job_type = job.intent.job_type();
        let pending = self.pending(job_type);
        if pending >= self.inner.settings.max_pending {
            warn!(
                target = SOURCE,
                op = "enqueue",
                queue = job_type.as_str(),
                pending,
                "queue is full"
            );
            return Err(QueueError::Full {
                queue: job_type.as_str(),
                pending,
            });
        }

        let now = OffsetDateTime::now_utc();
        let record = RenderJob {
            id: Uuid::new_v4().to_string(),
            job_type,
            tenant_id: job.tenant_id,
            user_id: job.user_id,
            project_id: job.intent.project_id().to_string(),
            intent: job.intent,
            priority: job.priority.unwrap_or_else(|| job_type.priority()),
            state: JobState::Queued,
            attempts: 0,
            max_attempts: self.inner.settings.max_attempts.max(1),
            progress: 0.0,
            created_at: now,
            started_at: None,
            finished_at: None,
            run_at: now,
            result: None,
            error: None,
            cancel_requested: false,
        };
        let handle = JobHandle {
            job_id: record.id.clone(),
            job_type,
            state: JobState::Queued,
        };
        let priority = record.priority;
        info!(
            target = SOURCE,
            op = "enqueue",
            queue = job_type.as_str(),
            job_id = %record.id,
            tenant_id = %record.tenant_id,
            project_id = %record.project_id,
            priority,
            "job enqueued"
        );
        self.inner.jobs.insert(record.id.clone(), record);
        self.push_ready(job_type, &handle.job_id, priority);
        counter!(JOBS_ENQUEUED_TOTAL, "queue" => job_type.as_str()).increment(1);
        Ok(handle)
    }

    fn push_ready(&self, job_type: JobType, job_id: &str, priority: i32) {
        let sequence = self.inner.next_sequence.fetch_add(1, AtomicOrdering::Relaxed);
        self.inner.sequences.insert(job_id.to_string(), sequence);
        let lane = self.lane(job_type);
        mutex_lock(&lane.ready, SOURCE, "push").push(ReadyEntry {
            priority,
            sequence,
            job_id: job_id.to_string(),
        });
        lane.notify.notify_one();
    }

    /// Pop the best ready job of `job_type` and mark it processing.
    pub fn try_claim(&self, job_type: JobType) -> Option<RenderJob> {
        let lane = self.lane(job_type);
        loop {
            let entry = mutex_lock(&lane.ready, SOURCE, "claim").pop()?;
            // Entries of cancelled or re-sequenced jobs are dropped lazily.
            let current = self
                .inner
                .sequences
                .get(&entry.job_id)
                .is_some_and(|sequence| *sequence == entry.sequence);
            if !current {
                continue;
            }
            let Some(mut job) = self.inner.jobs.get_mut(&entry.job_id) else {
                continue;
            };
            if job.state != JobState::Queued {
                continue;
            }
            job.state = JobState::Processing;
            job.attempts += 1;
            job.progress = 0.0;
            job.started_at = Some(OffsetDateTime::now_utc());
            self.inner.sequences.remove(&entry.job_id);
            debug!(
                target = SOURCE,
                op = "claim",
                queue = job_type.as_str(),
                job_id = %job.id,
                attempt = job.attempts
            );
            return Some(job.value().clone());
        }
    }

    /// Wait until a job of `job_type` is ready and claim it.
    pub async fn next(&self, job_type: JobType) -> RenderJob {
        let lane = self.lane(job_type);
        loop {
            if let Some(job) = self.try_claim(job_type) {
                return job;
            }
            lane.notify.notified().await;
        }
    }

    pub fn report_progress(&self, job_id: &str, progress: f32) {
        if let Some(mut job) = self.inner.jobs.get_mut(job_id) {
            if job.state == JobState::Processing {
                // Progress never moves backwards within an attempt.
                job.progress = job.progress.max(progress.clamp(0.0, 1.0));
            }
        }
    }

    pub fn complete(&self, job_id: &str, output: JobOutput) {
        let Some(mut job) = self.inner.jobs.get_mut(job_id) else {
            return;
        };
        if !job.state.can_transition_to(JobState::Completed) {
            return;
        }
        job.state = JobState::Completed;
        job.progress = 1.0;
        job.finished_at = Some(OffsetDateTime::now_utc());
        job.result = Some(output);
        job.error = None;
        counter!(JOBS_COMPLETED_TOTAL, "queue" => job.job_type.as_str()).increment(1);
        info!(
            target = SOURCE,
            op = "complete",
            queue = job.job_type.as_str(),
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            attempts = job.attempts,
            "job completed"
        );
    }

    /// Record a failed attempt. Returns the state the job ended up in.
    pub fn fail(&self, job_id: &str, failure: JobFailure) -> Option<JobState> {
        let (job_type, retry_in) = {
            let mut job = self.inner.jobs.get_mut(job_id)?;
            if job.state != JobState::Processing {
                return Some(job.state);
            }
            let budget_left = job.attempts < job.max_attempts;
            if job.cancel_requested {
                job.error = Some(format!("{CANCELLED_CODE}: {}", failure.message));
                job.state = JobState::Failed;
                job.finished_at = Some(OffsetDateTime::now_utc());
                counter!(JOBS_FAILED_TOTAL, "queue" => job.job_type.as_str()).increment(1);
                info!(
                    target = SOURCE,
                    op = "fail",
                    queue = job.job_type.as_str(),
                    job_id = %job.id,
                    attempt = job.attempts,
                    code = failure.code,
                    "cancelled job stopped after failed attempt"
                );
                (job.job_type, None)
            } else if failure.retryable && budget_left {
                job.error = Some(format!("{}: {}", failure.code, failure.message));
                let delay = self.inner.settings.backoff_for(job.attempts);
                job.state = JobState::Delayed;
                job.run_at = OffsetDateTime::now_utc() + delay;
                counter!(JOBS_RETRIED_TOTAL, "queue" => job.job_type.as_str()).increment(1);
                warn!(
                    target = SOURCE,
                    op = "fail",
                    queue = job.job_type.as_str(),
                    job_id = %job.id,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    code = failure.code,
                    error = %failure.message,
                    "job attempt failed, retrying"
                );
                (job.job_type, Some(delay))
            } else {
                job.error = Some(format!("{}: {}", failure.code, failure.message));
                job.state = JobState::Failed;
                job.finished_at = Some(OffsetDateTime::now_utc());
                counter!(JOBS_FAILED_TOTAL, "queue" => job.job_type.as_str()).increment(1);
                warn!(
                    target = SOURCE,
                    op = "fail",
                    queue = job.job_type.as_str(),
                    job_id = %job.id,
                    attempt = job.attempts,
                    retryable = failure.retryable,
                    code = failure.code,
                    error = %failure.message,
                    "job failed"
                );
                (job.job_type, None)
            }
        };

        match retry_in {
            Some(delay) => {
                let queue = self.clone();
                let job_id = job_id.to_string();
                tokio::spawn(async move {
                    sleep(delay).await;
                    queue.promote(job_type, &job_id);
                });
                Some(JobState::Delayed)
            }
            None => Some(JobState::Failed),
        }
    }

    /// Move a delayed job back onto its lane once its backoff has elapsed.
    fn promote(&self, job_type: JobType, job_id: &str) {
        let priority = {
            let Some(mut job) = self.inner.jobs.get_mut(job_id) else {
                return;
            };
            if job.cancel_requested || !job.state.can_transition_to(JobState::Queued) {
                return;
            }
            job.state = JobState::Queued;
            job.run_at = OffsetDateTime::now_utc();
            job.priority
        };
        self.push_ready(job_type, job_id, priority);
    }

    pub fn status(&self, job_id: &str) -> Option<RenderJob> {
        self.inner.jobs.get(job_id).map(|job| job.value().clone())
    }

    /// Remove a queued or delayed job. A processing job is flagged so its
    /// current attempt is the last one. Returns `None` for unknown ids.
    pub fn cancel(&self, job_id: &str) -> Option<CancelOutcome> {
        let removed = self
            .inner
            .jobs
            .remove_if(job_id, |_, job| job.state.is_cancellable());
        if let Some((_, job)) = removed {
            self.inner.sequences.remove(job_id);
            info!(
                target = SOURCE,
                op = "cancel",
                queue = job.job_type.as_str(),
                job_id,
                tenant_id = %job.tenant_id,
                "job cancelled"
            );
            return Some(CancelOutcome::Removed);
        }

        let mut job = self.inner.jobs.get_mut(job_id)?;
        if job.state != JobState::Processing {
            return Some(CancelOutcome::Finished);
        }
        job.cancel_requested = true;
        info!(
            target = SOURCE,
            op = "cancel",
            queue = job.job_type.as_str(),
            job_id,
            tenant_id = %job.tenant_id,
            attempt = job.attempts,
            "cancellation requested for running job"
        );
        Some(CancelOutcome::Pending)
    }

    fn pending(&self, job_type: JobType) -> usize {
        self.inner
            .jobs
            .iter()
            .filter(|job| {
                job.job_type == job_type
                    && matches!(job.state, JobState::Queued | JobState::Delayed)
            })
            .count()
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for job in self.inner.jobs.iter() {
            stats.record(job.state);
        }
        stats
    }

    pub fn stats_for(&self, job_type: JobType) -> QueueStats {
        let mut stats = QueueStats::default();
        for job in self.inner.jobs.iter().filter(|job| job.job_type == job_type) {
            stats.record(job.state);
        }
        stats
    }

    /// Drop finished jobs past their retention window. Returns how many went.
    pub fn sweep(&self, now: OffsetDateTime) -> usize {
        let settings = &self.inner.settings;
        let before = self.inner.jobs.len();
        self.inner.jobs.retain(|_, job| {
            let Some(finished) = job.finished_at else {
                return true;
            };
            let age = now - finished;
            match job.state {
                JobState::Completed => age < settings.completed_retention,
                JobState::Failed => age < settings.failed_retention,
                _ => true,
            }
        });
        before.saturating_sub(self.inner.jobs.len())
    }

    /// Block until the job finishes or the timeout elapses.
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<RenderJob, QueueError> {
        let deadline = Instant::now() + timeout;

        loop {
            let job = self.status(job_id).ok_or_else(|| QueueError::NotFound {
                job_id: job_id.to_string(),
            })?;

            match job.state {
                JobState::Completed => return Ok(job),
                JobState::Failed => {
                    let message = job
                        .error
                        .unwrap_or_else(|| "job failed without error text".to_string());
                    return Err(QueueError::JobFailed {
                        job_id: job_id.to_string(),
                        message,
                    });
                }
                _ => {
                    if Instant::now() >= deadline {
                        return Err(QueueError::WaitTimeout {
                            job_id: job_id.to_string(),
                            timeout,
                        });
                    }
                    sleep(DEFAULT_WAIT_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Refuse further jobs. Queued work stays claimable.
    pub fn close(&self) {
        self.inner.closed.store(true, AtomicOrdering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::intent::{FinalIntent, PreviewIntent, ProductionIntent};
    use crate::domain::options::RenderOptions;

    fn preview(project: &str) -> RenderIntent {
        RenderIntent::Preview(PreviewIntent {
            project_id: project.into(),
            page_id: "p1".into(),
            options: RenderOptions::default(),
        })
    }

    fn production(project: &str) -> RenderIntent {
        RenderIntent::Production(ProductionIntent {
            project_id: project.into(),
            page_ids: Vec::new(),
            order_id: None,
            options: RenderOptions::default(),
        })
    }

    fn fast_queue() -> JobQueue {
        JobQueue::new(QueueSettings {
            backoff_base: Duration::from_millis(10),
            ..QueueSettings::default()
        })
    }

    #[test]
    fn backoff_doubles_from_base() {
        let settings = QueueSettings::default();
        assert_eq!(settings.backoff_for(1), Duration::from_secs(2));
        assert_eq!(settings.backoff_for(2), Duration::from_secs(4));
        assert_eq!(settings.backoff_for(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn priority_wins_then_fifo() {
        let queue = fast_queue();
        let low = queue
            .enqueue(NewJob {
                priority: Some(1),
                ..NewJob::new("t", production("a"))
            })
            .expect("enqueue");
        let first = queue.enqueue(NewJob::new("t", production("b"))).expect("enqueue");
        let second = queue.enqueue(NewJob::new("t", production("c"))).expect("enqueue");

        let order: Vec<String> = (0..3)
            .map(|_| queue.try_claim(JobType::Production).expect("job").id)
            .collect();
        assert_eq!(order, vec![first.job_id, second.job_id, low.job_id]);
        assert!(queue.try_claim(JobType::Production).is_none());
    }

    #[tokio::test]
    async fn lanes_are_independent() {
        let queue = fast_queue();
        queue.enqueue(NewJob::new("t", preview("a"))).expect("enqueue");
        assert!(queue.try_claim(JobType::Final).is_none());
        assert!(queue.try_claim(JobType::Preview).is_some());
    }

    #[tokio::test]
    async fn state_machine_runs_to_completion() {
        let queue = fast_queue();
        let handle = queue.enqueue(NewJob::new("t", preview("a"))).expect("enqueue");
        assert_eq!(handle.state, JobState::Queued);

        let job = queue.try_claim(JobType::Preview).expect("claim");
        assert_eq!(job.state, JobState::Processing);
        assert_eq!(job.attempts, 1);
        assert!(job.started_at.is_some());

        queue.report_progress(&job.id, 0.5);
        queue.report_progress(&job.id, 0.2);
        assert_eq!(queue.status(&job.id).expect("status").progress, 0.5);

        queue.complete(
            &job.id,
            JobOutput::Preview {
                url: "u".into(),
                cached: false,
            },
        );
        let done = queue.status(&job.id).expect("status");
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.progress, 1.0);
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn cancellation_only_touches_waiting_jobs() {
        let queue = fast_queue();
        let waiting = queue.enqueue(NewJob::new("t", preview("a"))).expect("enqueue");
        let running = queue.enqueue(NewJob::new("t", preview("b"))).expect("enqueue");

        let claimed = queue.try_claim(JobType::Preview).expect("claim");
        assert_eq!(claimed.id, waiting.job_id);
        assert_eq!(queue.cancel(&claimed.id), Some(CancelOutcome::Pending));
        assert_eq!(
            queue.status(&claimed.id).expect("still tracked").state,
            JobState::Processing
        );

        assert_eq!(queue.cancel(&running.job_id), Some(CancelOutcome::Removed));
        assert!(queue.status(&running.job_id).is_none());
        assert!(queue.try_claim(JobType::Preview).is_none());
        assert_eq!(queue.cancel("missing"), None);
    }

    #[tokio::test]
    async fn cancelling_a_running_job_stops_further_attempts() {
        let queue = fast_queue();
        let handle = queue.enqueue(NewJob::new("t", preview("a"))).expect("enqueue");
        let job = queue.try_claim(JobType::Preview).expect("claim");
        assert_eq!(queue.cancel(&job.id), Some(CancelOutcome::Pending));

        let state = queue.fail(&job.id, JobFailure::retryable("render_timeout", "slow"));
        assert_eq!(state, Some(JobState::Failed));
        let record = queue.status(&handle.job_id).expect("status");
        assert_eq!(record.attempts, 1);
        assert!(record.error.expect("error").starts_with("cancelled"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.try_claim(JobType::Preview).is_none());
        assert_eq!(queue.cancel(&handle.job_id), Some(CancelOutcome::Finished));
    }

    #[tokio::test]
    async fn cancelled_running_jobs_still_keep_a_successful_result() {
        let queue = fast_queue();
        let job = {
            queue.enqueue(NewJob::new("t", preview("a"))).expect("enqueue");
            queue.try_claim(JobType::Preview).expect("claim")
        };
        queue.cancel(&job.id);
        queue.complete(
            &job.id,
            JobOutput::Preview {
                url: "mem://x".into(),
                cached: false,
            },
        );
        assert_eq!(
            queue.status(&job.id).expect("status").state,
            JobState::Completed
        );
    }

    #[tokio::test]
    async fn retries_stop_after_three_attempts() {
        let queue = fast_queue();
        let handle = queue
            .enqueue(NewJob::new(
                "t",
                RenderIntent::Final(FinalIntent {
                    project_id: "p".into(),
                    page_ids: Vec::new(),
                    options: RenderOptions::default(),
                }),
            ))
            .expect("enqueue");

        let mut states = Vec::new();
        for _ in 0..3 {
            let job = tokio::time::timeout(Duration::from_secs(2), queue.next(JobType::Final))
                .await
                .expect("job becomes ready");
            states.push(queue.fail(&job.id, JobFailure::retryable("render_timeout", "slow")));
        }
        assert_eq!(
            states,
            vec![
                Some(JobState::Delayed),
                Some(JobState::Delayed),
                Some(JobState::Failed)
            ]
        );
        let job = queue.status(&handle.job_id).expect("status");
        assert_eq!(job.attempts, 3);
        assert!(job.error.expect("error").starts_with("render_timeout"));
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let queue = fast_queue();
        let handle = queue.enqueue(NewJob::new("t", preview("a"))).expect("enqueue");
        let job = queue.try_claim(JobType::Preview).expect("claim");
        let state = queue.fail(&job.id, JobFailure::permanent("invalid_dpi", "dpi 10"));
        assert_eq!(state, Some(JobState::Failed));

        let err = queue
            .wait_for_completion(&handle.job_id, Duration::from_millis(100))
            .await
            .expect_err("failed job");
        assert!(matches!(err, QueueError::JobFailed { .. }));
    }

    #[tokio::test]
    async fn delayed_jobs_can_be_cancelled() {
        let queue = JobQueue::new(QueueSettings {
            backoff_base: Duration::from_secs(60),
            ..QueueSettings::default()
        });
        let handle = queue.enqueue(NewJob::new("t", preview("a"))).expect("enqueue");
        let job = queue.try_claim(JobType::Preview).expect("claim");
        queue.fail(&job.id, JobFailure::retryable("render_timeout", "slow"));
        assert_eq!(queue.stats().delayed, 1);
        assert_eq!(queue.cancel(&handle.job_id), Some(CancelOutcome::Removed));
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[tokio::test]
    async fn full_and_closed_queues_reject() {
        let queue = JobQueue::new(QueueSettings {
            max_pending: 1,
            ..QueueSettings::default()
        });
        queue.enqueue(NewJob::new("t", preview("a"))).expect("first fits");
        let err = queue
            .enqueue(NewJob::new("t", preview("b")))
            .expect_err("full");
        assert_eq!(err.code(), "queue_unavailable");

        queue.close();
        assert_eq!(
            queue.enqueue(NewJob::new("t", production("c"))),
            Err(QueueError::Closed)
        );
    }

    #[tokio::test]
    async fn sweep_applies_retention_per_state() {
        let queue = fast_queue();
        let done = queue.enqueue(NewJob::new("t", preview("a"))).expect("enqueue");
        let failed = queue.enqueue(NewJob::new("t", preview("b"))).expect("enqueue");
        let waiting = queue.enqueue(NewJob::new("t", preview("c"))).expect("enqueue");

        let job = queue.try_claim(JobType::Preview).expect("claim");
        queue.complete(
            &job.id,
            JobOutput::Preview {
                url: "u".into(),
                cached: true,
            },
        );
        let job = queue.try_claim(JobType::Preview).expect("claim");
        queue.fail(&job.id, JobFailure::permanent("invalid_dpi", "bad"));

        let now = OffsetDateTime::now_utc();
        assert_eq!(queue.sweep(now), 0);
        assert_eq!(queue.sweep(now + time::Duration::hours(25)), 1);
        assert!(queue.status(&done.job_id).is_none());
        assert!(queue.status(&failed.job_id).is_some());
        assert_eq!(queue.sweep(now + time::Duration::days(8)), 1);
        assert!(queue.status(&waiting.job_id).is_some());
    }
}
