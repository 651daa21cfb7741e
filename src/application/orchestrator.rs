//! Public entry point of the render pipeline.
//!
//! Preview-family calls render inline and return a URL. Final, production
//! and 3D renders are validated up front, then enqueued; callers poll
//! [`RenderOrchestrator::job_status`]. `production_sync` runs the same
//! composer invocation a production worker would.

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
    application::{
        error::AppError,
        jobs::{JobHandle, JobQueue, NewJob, QueueError, load_project, production_request, select_pages},
        preview::{PreviewKind, PreviewOutcome, PreviewRequest, PreviewService},
        production::{NoProgress, ProductionComposer, validate::validate_request},
        render::{Renderer, RendererHealth},
        repos::ProjectStore,
    },
    cache::CacheStats,
    domain::{
        error::DomainError,
        intent::{FinalIntent, ProductionIntent, Render3dIntent, RenderIntent},
        jobs::{CancelOutcome, JobType, QueueStats, RenderJob},
        options::{RenderOptions, validate_page_geometry},
        production::ProductionResult,
    },
};

const SOURCE: &str = "application::orchestrator";

/// Who is asking. Resolved by the caller; the pipeline only scopes by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub tenant_id: String,
    pub user_id: Option<String>,
}

impl Caller {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct PagePreview {
    pub project_id: String,
    pub page_id: String,
    pub options: RenderOptions,
    pub use_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatsReport {
    pub total: QueueStats,
    pub queues: BTreeMap<&'static str, QueueStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub renderer: RendererHealth,
    pub cache_enabled: bool,
    pub queue: QueueStats,
    pub uptime_secs: u64,
}

#[derive(Clone)]
pub struct RenderOrchestrator {
    projects: Arc<dyn ProjectStore>,
    renderer: Arc<dyn Renderer>,
    previews: PreviewService,
    composer: ProductionComposer,
    queue: JobQueue,
    started_at: Instant,
}

impl RenderOrchestrator {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        renderer: Arc<dyn Renderer>,
        previews: PreviewService,
        composer: ProductionComposer,
        queue: JobQueue,
    ) -> Self {
        Self {
            projects,
            renderer,
            previews,
            composer,
            queue,
            started_at: Instant::now(),
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    async fn render_preview(
        &self,
        caller: &Caller,
        kind: PreviewKind,
        request: PagePreview,
    ) -> Result<PreviewOutcome, AppError> {
        self.previews
            .render(PreviewRequest {
                tenant_id: caller.tenant_id.clone(),
                project_id: request.project_id,
                page_id: request.page_id,
                kind,
                options: request.options,
                use_cache: request.use_cache,
            })
            .await
    }

    pub async fn preview(
        &self,
        caller: &Caller,
        request: PagePreview,
    ) -> Result<PreviewOutcome, AppError> {
        self.render_preview(caller, PreviewKind::Standard, request).await
    }

    pub async fn hi_dpi_preview(
        &self,
        caller: &Caller,
        request: PagePreview,
    ) -> Result<PreviewOutcome, AppError> {
        self.render_preview(caller, PreviewKind::HiDpi, request).await
    }

    pub async fn thumbnail(
        &self,
        caller: &Caller,
        request: PagePreview,
    ) -> Result<PreviewOutcome, AppError> {
        self.render_preview(caller, PreviewKind::Thumbnail, request).await
    }

    fn enqueue(&self, caller: &Caller, intent: RenderIntent) -> Result<JobHandle, AppError> {
        let job_type = intent.job_type();
        let project_id = intent.project_id().to_string();
        let handle = self
            .queue
            .enqueue(NewJob::new(caller.tenant_id.clone(), intent).with_user(caller.user_id.clone()))?;
        info!(
            target = SOURCE,
            op = "enqueue",
            queue = job_type.as_str(),
            tenant_id = %caller.tenant_id,
            user_id = caller.user_id.as_deref().unwrap_or(""),
            project_id = %project_id,
            job_id = %handle.job_id,
            "render job queued"
        );
        Ok(handle)
    }

    /// Check options and page selection for a multi-page job before it is queued.
    async fn check_pages(
        &self,
        caller: &Caller,
        project_id: &str,
        page_ids: &[String],
        options: &RenderOptions,
    ) -> Result<(), AppError> {
        options.validate()?;
        let project = load_project(self.projects.as_ref(), &caller.tenant_id, project_id).await?;
        for page in select_pages(&project, page_ids)? {
            validate_page_geometry(&page)?;
        }
        Ok(())
    }

    pub async fn final_render(
        &self,
        caller: &Caller,
        intent: FinalIntent,
    ) -> Result<JobHandle, AppError> {
        self.check_pages(caller, &intent.project_id, &intent.page_ids, &intent.options)
            .await?;
        self.enqueue(caller, RenderIntent::Final(intent))
    }

    pub async fn production(
        &self,
        caller: &Caller,
        intent: ProductionIntent,
    ) -> Result<JobHandle, AppError> {
        let request = production_request(self.projects.as_ref(), &caller.tenant_id, &intent).await?;
        validate_request(&request.pages, &request.options)?;
        self.enqueue(caller, RenderIntent::Production(intent))
    }

    /// Compose inline and wait for the result.
    pub async fn production_sync(
        &self,
        caller: &Caller,
        intent: ProductionIntent,
    ) -> Result<ProductionResult, AppError> {
        let request = production_request(self.projects.as_ref(), &caller.tenant_id, &intent).await?;
        let job_id = Uuid::new_v4().to_string();
        Ok(self.composer.compose(&job_id, request, &NoProgress).await?)
    }

    pub async fn render_3d(
        &self,
        caller: &Caller,
        intent: Render3dIntent,
    ) -> Result<JobHandle, AppError> {
        self.check_pages(caller, &intent.project_id, &intent.page_ids, &intent.options)
            .await?;
        self.enqueue(caller, RenderIntent::Render3d(intent))
    }

    fn tenant_job(&self, caller: &Caller, job_id: &str) -> Result<RenderJob, AppError> {
        // Jobs of other tenants are reported as missing.
        self.queue
            .status(job_id)
            .filter(|job| job.tenant_id == caller.tenant_id)
            .ok_or_else(|| {
                QueueError::NotFound {
                    job_id: job_id.to_string(),
                }
                .into()
            })
    }

    pub fn job_status(&self, caller: &Caller, job_id: &str) -> Result<RenderJob, AppError> {
        self.tenant_job(caller, job_id)
    }

    /// Waiting jobs are removed; a running job finishes its current attempt
    /// and is never retried.
    pub fn cancel_job(&self, caller: &Caller, job_id: &str) -> Result<CancelOutcome, AppError> {
        self.tenant_job(caller, job_id)?;
        self.queue.cancel(job_id).ok_or_else(|| {
            AppError::from(QueueError::NotFound {
                job_id: job_id.to_string(),
            })
        })
    }

    pub async fn invalidate_cache(
        &self,
        caller: &Caller,
        project_id: &str,
        page_id: Option<&str>,
    ) -> Result<usize, AppError> {
        if project_id.trim().is_empty() {
            return Err(DomainError::validation("project_id", "must not be empty").into());
        }
        Ok(self
            .previews
            .cache()
            .invalidate(&caller.tenant_id, project_id, page_id)
            .await)
    }

    pub async fn cache_stats(&self, caller: &Caller) -> CacheStats {
        self.previews.cache().stats(&caller.tenant_id).await
    }

    pub fn queue_stats(&self) -> QueueStatsReport {
        QueueStatsReport {
            total: self.queue.stats(),
            queues: JobType::ALL
                .into_iter()
                .map(|job_type| (job_type.as_str(), self.queue.stats_for(job_type)))
                .collect(),
        }
    }

    pub async fn health(&self) -> HealthReport {
        let renderer = self.renderer.health().await;
        HealthReport {
            healthy: renderer.healthy,
            renderer,
            cache_enabled: self.previews.cache().is_enabled(),
            queue: self.queue.stats(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}
