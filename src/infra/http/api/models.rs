use serde::{Deserialize, Serialize};

use crate::{
    application::{jobs::JobHandle, orchestrator::PagePreview, preview::PreviewKind},
    domain::{
        jobs::{CancelOutcome, JobState, JobType},
        options::RenderOptions,
    },
};

fn default_use_cache() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PreviewRequestBody {
    pub project_id: String,
    pub page_id: String,
    #[serde(default)]
    pub kind: PreviewKind,
    #[serde(default)]
    pub options: RenderOptions,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

impl PreviewRequestBody {
    pub fn into_parts(self) -> (PreviewKind, PagePreview) {
        (
            self.kind,
            PagePreview {
                project_id: self.project_id,
                page_id: self.page_id,
                options: self.options,
                use_cache: self.use_cache,
            },
        )
    }
}

#[derive(Debug, Serialize)]
pub struct JobAcceptedResponse {
    pub job_id: String,
    pub job_type: JobType,
    pub state: JobState,
    pub status_url: String,
}

impl From<JobHandle> for JobAcceptedResponse {
    fn from(handle: JobHandle) -> Self {
        let status_url = format!("/api/v1/render/status/{}", handle.job_id);
        Self {
            job_id: handle.job_id,
            job_type: handle.job_type,
            state: handle.state,
            status_url,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    /// True once the job can no longer start another attempt.
    pub cancelled: bool,
    pub outcome: CancelOutcome,
}

impl CancelResponse {
    pub fn new(job_id: String, outcome: CancelOutcome) -> Self {
        Self {
            job_id,
            cancelled: outcome != CancelOutcome::Finished,
            outcome,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    pub removed: usize,
}
