//! Render job records and their state machine.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{intent::RenderIntent, production::ProductionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Preview,
    Final,
    Production,
    #[serde(rename = "3d")]
    Render3d,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::Preview,
        JobType::Final,
        JobType::Production,
        JobType::Render3d,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Preview => "preview",
            JobType::Final => "final",
            JobType::Production => "production",
            JobType::Render3d => "3d",
        }
    }

    /// Default dequeue priority; higher runs first.
    pub fn priority(self) -> i32 {
        match self {
            JobType::Production => 10,
            JobType::Final => 5,
            JobType::Render3d => 1,
            JobType::Preview => 0,
        }
    }
}

impl TryFrom<&str> for JobType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "preview" => Ok(JobType::Preview),
            "final" => Ok(JobType::Final),
            "production" => Ok(JobType::Production),
            "3d" | "render3d" => Ok(JobType::Render3d),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Delayed,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Delayed => "delayed",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn is_cancellable(self) -> bool {
        matches!(self, JobState::Queued | JobState::Delayed)
    }

    /// Whether the queue may move a job from `self` to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Processing)
                | (JobState::Processing, JobState::Completed)
                | (JobState::Processing, JobState::Failed)
                | (JobState::Processing, JobState::Delayed)
                | (JobState::Delayed, JobState::Queued)
        )
    }
}

/// What a cancel request did to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job was waiting and has been removed.
    Removed,
    /// The job is running; its current attempt finishes but none follows.
    Pending,
    /// The job already completed or failed.
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageTexture {
    pub page_id: String,
    pub url: String,
    pub width_px: u32,
    pub height_px: u32,
}

/// What a finished job produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutput {
    Preview {
        url: String,
        cached: bool,
    },
    Final {
        pdf_url: String,
        page_count: usize,
        file_size: u64,
    },
    Production(ProductionResult),
    Render3d {
        manifest_url: String,
        textures: Vec<PageTexture>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    pub id: String,
    pub job_type: JobType,
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub project_id: String,
    pub intent: RenderIntent,
    pub priority: i32,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub progress: f32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub run_at: OffsetDateTime,
    pub result: Option<JobOutput>,
    pub error: Option<String>,
    /// Set when a caller cancels mid-attempt; no further attempt is scheduled.
    #[serde(default)]
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub delayed: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn record(&mut self, state: JobState) {
        match state {
            JobState::Queued => self.queued += 1,
            JobState::Delayed => self.delayed += 1,
            JobState::Processing => self.processing += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
        }
    }
}
