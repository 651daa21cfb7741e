use std::sync::Arc;

use apalis::prelude::{Monitor, WorkerBuilder, WorkerFactoryFn};
use apalis_cron::{CronStream, Schedule};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{
    executor::JobHandler,
    queue::JobQueue,
    sweep::{SweepContext, process_sweep_jobs_job},
    worker::{WorkerPool, WorkerSettings, spawn_workers},
};

const SOURCE: &str = "application::jobs::runtime";

/// Background side of the job system: per-queue workers plus the sweep monitor.
pub struct JobRuntime {
    queue: JobQueue,
    workers: WorkerPool,
    monitor: JoinHandle<()>,
}

impl JobRuntime {
    pub fn start(
        queue: JobQueue,
        handler: Arc<dyn JobHandler>,
        workers: &WorkerSettings,
        sweep: Schedule,
    ) -> Self {
        let pool = spawn_workers(queue.clone(), handler, workers);
        let monitor = spawn_sweep_monitor(queue.clone(), sweep);
        info!(
            target = SOURCE,
            op = "start",
            workers = pool.len(),
            "Job runtime started"
        );
        Self {
            queue,
            workers: pool,
            monitor,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Close the queue to new work, then stop workers and the monitor.
    pub async fn shutdown(self) {
        self.queue.close();
        self.monitor.abort();
        let _ = self.monitor.await;
        self.workers.shutdown().await;
        info!(target = SOURCE, op = "shutdown", "Job runtime stopped");
    }
}

fn spawn_sweep_monitor(queue: JobQueue, schedule: Schedule) -> JoinHandle<()> {
    let sweep_worker = WorkerBuilder::new("sweep-jobs-worker")
        .data(SweepContext { queue })
        .backend(CronStream::new(schedule))
        .build_fn(process_sweep_jobs_job);

    let monitor = Monitor::new().register(sweep_worker);

    tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(target = SOURCE, error = %err, "job monitor stopped");
        }
    })
}
