//! Turns a claimed [`RenderJob`] into its output.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    application::{
        error::AppError,
        layout::build_template,
        preview::{PreviewKind, PreviewRequest, PreviewService},
        production::{ProductionComposer, ProductionRequest, ProductionStage, ProgressSink},
        render::{FINAL_TIMEOUT, RenderRequest, Renderer},
        repos::{BlobError, BlobStore, ProjectStore, RepoError},
    },
    domain::{
        error::DomainError,
        intent::{FinalIntent, ProductionIntent, Render3dIntent, RenderIntent},
        jobs::{JobOutput, PageTexture, RenderJob},
        options::{MAX_PREVIEW_PX, OutputFormat, RenderOptions, validate_page_geometry},
        page::{MM_PER_INCH, Page},
        project::Project,
    },
};

use super::queue::JobFailure;

const SOURCE: &str = "application::jobs::executor";
const PDF_CONTENT_TYPE: &str = "application/pdf";
const MANIFEST_CONTENT_TYPE: &str = "application/json";

/// Longest texture edge handed to mockup tooling.
pub const MAX_TEXTURE_PX: u32 = MAX_PREVIEW_PX;

/// Work performed for one claimed job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(
        &self,
        job: &RenderJob,
        progress: &dyn ProgressSink,
    ) -> Result<JobOutput, JobFailure>;
}

/// Map an application error onto a job failure. Bad input is never retried.
pub fn job_failure(err: &AppError) -> JobFailure {
    let permanent = match err {
        AppError::Domain(_) => true,
        AppError::Production(err) => err.is_permanent(),
        AppError::Repo(RepoError::NotFound | RepoError::InvalidInput { .. }) => true,
        AppError::Blob(BlobError::InvalidKey { .. }) => true,
        _ => false,
    };
    if permanent {
        JobFailure::permanent(err.code(), err.to_string())
    } else {
        JobFailure::retryable(err.code(), err.to_string())
    }
}

pub(crate) async fn load_project(
    projects: &dyn ProjectStore,
    tenant_id: &str,
    project_id: &str,
) -> Result<Project, AppError> {
    Ok(projects
        .find_project_for_tenant(tenant_id, project_id)
        .await?
        .ok_or(DomainError::not_found("project"))?)
}

pub(crate) fn select_pages(project: &Project, page_ids: &[String]) -> Result<Vec<Page>, AppError> {
    let pages = project.select_pages(page_ids).map_err(|missing| {
        DomainError::validation("pages", format!("page `{missing}` is not part of the project"))
    })?;
    if pages.is_empty() {
        return Err(DomainError::validation("pages", "project has no pages").into());
    }
    Ok(pages)
}

/// Resolve a production intent into the composer's input. Shared by the
/// queued and the inline production paths.
pub(crate) async fn production_request(
    projects: &dyn ProjectStore,
    tenant_id: &str,
    intent: &ProductionIntent,
) -> Result<ProductionRequest, AppError> {
    let project = load_project(projects, tenant_id, &intent.project_id).await?;
    let pages = select_pages(&project, &intent.page_ids)?;
    Ok(ProductionRequest {
        tenant_id: tenant_id.to_string(),
        project_id: project.id.clone(),
        order_id: intent.order_id.clone(),
        title: project.title.clone().unwrap_or_else(|| project.id.clone()),
        product_format: project.product_format.clone(),
        pages,
        options: intent.options.clone(),
    })
}

/// Dpi for a texture whose longer edge stays within [`MAX_TEXTURE_PX`].
pub fn texture_dpi(page: &Page, requested: u32) -> u32 {
    let (width, height) = page.pixel_size(requested);
    if width.max(height) <= MAX_TEXTURE_PX {
        return requested.max(1);
    }
    let longest = page.width_mm.max(page.height_mm);
    ((f64::from(MAX_TEXTURE_PX) * MM_PER_INCH / longest).floor() as u32).max(1)
}

#[derive(Debug, Serialize)]
struct TextureManifest<'a> {
    job_id: &'a str,
    project_id: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    textures: &'a [PageTexture],
}

fn millis_now() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

/// The handler workers run in production.
#[derive(Clone)]
pub struct RenderJobExecutor {
    projects: Arc<dyn ProjectStore>,
    renderer: Arc<dyn Renderer>,
    blobs: Arc<dyn BlobStore>,
    previews: PreviewService,
    composer: ProductionComposer,
    page_concurrency: usize,
    page_timeout: Duration,
}

impl RenderJobExecutor {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        renderer: Arc<dyn Renderer>,
        blobs: Arc<dyn BlobStore>,
        previews: PreviewService,
        composer: ProductionComposer,
    ) -> Self {
        Self {
            projects,
            renderer,
            blobs,
            previews,
            composer,
            page_concurrency: 4,
            page_timeout: FINAL_TIMEOUT,
        }
    }

    pub fn with_page_concurrency(mut self, page_concurrency: usize) -> Self {
        self.page_concurrency = page_concurrency.max(1);
        self
    }

    pub fn with_page_timeout(mut self, page_timeout: Duration) -> Self {
        self.page_timeout = page_timeout;
        self
    }

    async fn run(&self, job: &RenderJob, progress: &dyn ProgressSink) -> Result<JobOutput, AppError> {
        match &job.intent {
            RenderIntent::Preview(intent) => {
                let outcome = self
                    .previews
                    .render(PreviewRequest {
                        tenant_id: job.tenant_id.clone(),
                        project_id: intent.project_id.clone(),
                        page_id: intent.page_id.clone(),
                        kind: PreviewKind::Standard,
                        options: intent.options.clone(),
                        use_cache: true,
                    })
                    .await?;
                Ok(JobOutput::Preview {
                    url: outcome.url,
                    cached: outcome.cached,
                })
            }
            RenderIntent::Final(intent) => self.final_render(job, intent, progress).await,
            RenderIntent::Production(intent) => {
                let request = production_request(self.projects.as_ref(), &job.tenant_id, intent).await?;
                let result = self.composer.compose(&job.id, request, progress).await?;
                Ok(JobOutput::Production(result))
            }
            RenderIntent::Render3d(intent) => self.render_3d(job, intent, progress).await,
        }
    }

    async fn final_render(
        &self,
        job: &RenderJob,
        intent: &FinalIntent,
        progress: &dyn ProgressSink,
    ) -> Result<JobOutput, AppError> {
        let project = load_project(self.projects.as_ref(), &job.tenant_id, &intent.project_id).await?;
        let pages = select_pages(&project, &intent.page_ids)?;
        intent.options.validate()?;
        for page in &pages {
            validate_page_geometry(page)?;
        }

        let page_count = pages.len();
        let request = ProductionRequest {
            tenant_id: job.tenant_id.clone(),
            project_id: project.id.clone(),
            order_id: None,
            title: project.title.clone().unwrap_or_else(|| project.id.clone()),
            product_format: project.product_format.clone(),
            pages,
            options: intent.options.clone(),
        };
        let pdf = self.composer.render_combined(&request, progress).await?;
        let file_size = pdf.len() as u64;

        let key = format!(
            "final/{}/{}/{}.pdf",
            job.tenant_id,
            project.id,
            millis_now()
        );
        let metadata = BTreeMap::from([
            ("tenant_id".to_string(), job.tenant_id.clone()),
            ("project_id".to_string(), project.id.clone()),
            ("job_id".to_string(), job.id.clone()),
        ]);
        let pdf_url = self
            .blobs
            .upload(pdf, &key, PDF_CONTENT_TYPE, &metadata)
            .await?;
        progress.report(ProductionStage::Upload, 1.0);

        Ok(JobOutput::Final {
            pdf_url,
            page_count,
            file_size,
        })
    }

    async fn render_3d(
        &self,
        job: &RenderJob,
        intent: &Render3dIntent,
        progress: &dyn ProgressSink,
    ) -> Result<JobOutput, AppError> {
        let project = load_project(self.projects.as_ref(), &job.tenant_id, &intent.project_id).await?;
        let pages = select_pages(&project, &intent.page_ids)?;
        intent.options.validate()?;

        let base_key = format!("3d/{}/{}/{}", job.tenant_id, project.id, job.id);
        let metadata = BTreeMap::from([
            ("tenant_id".to_string(), job.tenant_id.clone()),
            ("project_id".to_string(), project.id.clone()),
            ("job_id".to_string(), job.id.clone()),
        ]);
        let total = pages.len();
        let target = TextureTarget {
            renderer: Arc::clone(&self.renderer),
            blobs: Arc::clone(&self.blobs),
            options: intent.options.clone(),
            page_timeout: self.page_timeout,
            base_key: Arc::from(base_key.as_str()),
            metadata: Arc::new(metadata.clone()),
        };

        let mut pending = stream::iter(pages)
            .map(move |page| target.clone().render(page))
            .buffered(self.page_concurrency.max(1));
        let mut textures = Vec::with_capacity(total);
        while let Some(texture) = pending.next().await {
            textures.push(texture?);
            progress.report(
                ProductionStage::RenderPages,
                textures.len() as f32 / (total + 1) as f32,
            );
        }

        let manifest = serde_json::to_vec_pretty(&TextureManifest {
            job_id: &job.id,
            project_id: &project.id,
            created_at: OffsetDateTime::now_utc(),
            textures: &textures,
        })
        .map_err(|err| AppError::unexpected(format!("texture manifest: {err}")))?;
        let manifest_url = self
            .blobs
            .upload(
                manifest.into(),
                &format!("{base_key}/manifest.json"),
                MANIFEST_CONTENT_TYPE,
                &metadata,
            )
            .await?;
        progress.report(ProductionStage::Upload, 1.0);

        Ok(JobOutput::Render3d {
            manifest_url,
            textures,
        })
    }
}

/// Owned handles for one texture render, so page futures borrow nothing.
#[derive(Clone)]
struct TextureTarget {
    renderer: Arc<dyn Renderer>,
    blobs: Arc<dyn BlobStore>,
    options: RenderOptions,
    page_timeout: Duration,
    base_key: Arc<str>,
    metadata: Arc<BTreeMap<String, String>>,
}

impl TextureTarget {
    async fn render(self, page: Page) -> Result<PageTexture, AppError> {
        validate_page_geometry(&page)?;
        let dpi = texture_dpi(&page, self.options.dpi);
        let options = self.options.with_dpi(dpi).with_format(OutputFormat::Png);
        let (width_px, height_px) = page.pixel_size(dpi);
        let template = build_template(&page, &options);
        let request = RenderRequest::new(OutputFormat::Png, options.timeout_or(self.page_timeout));
        let bytes = self.renderer.render(&template, &request).await?;
        let url = self
            .blobs
            .upload(
                bytes,
                &format!("{}/{}.png", self.base_key, page.id),
                OutputFormat::Png.content_type(),
                &self.metadata,
            )
            .await?;
        debug!(
            target = SOURCE,
            op = "render_3d::texture",
            page_id = %page.id,
            dpi,
            width_px,
            height_px
        );
        Ok(PageTexture {
            page_id: page.id,
            url,
            width_px,
            height_px,
        })
    }
}

#[async_trait]
impl JobHandler for RenderJobExecutor {
    async fn execute(
        &self,
        job: &RenderJob,
        progress: &dyn ProgressSink,
    ) -> Result<JobOutput, JobFailure> {
        self.run(job, progress).await.map_err(|err| job_failure(&err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{production::ProductionError, render::RenderError};

    fn page(width_mm: f64, height_mm: f64) -> Page {
        Page {
            id: "p".into(),
            width_mm,
            height_mm,
            background: "#fff".into(),
            elements: Vec::new(),
        }
    }

    #[test]
    fn texture_dpi_keeps_small_pages_at_requested_density() {
        assert_eq!(texture_dpi(&page(210.0, 297.0), 150), 150);
    }

    #[test]
    fn texture_dpi_caps_the_longer_edge() {
        let spread = page(600.0, 300.0);
        let dpi = texture_dpi(&spread, 300);
        let (width, height) = spread.pixel_size(dpi);
        assert!(width <= MAX_TEXTURE_PX, "width {width}");
        assert!(height < width);
        assert!(dpi < 300);
    }

    #[test]
    fn validation_errors_are_permanent() {
        let failure = job_failure(&AppError::from(DomainError::validation("dpi", "too low")));
        assert!(!failure.retryable);
        assert_eq!(failure.code, "invalid_dpi");
    }

    #[test]
    fn render_errors_are_retried() {
        let failure = job_failure(&AppError::from(RenderError::Timeout {
            timeout: Duration::from_secs(1),
        }));
        assert!(failure.retryable);
        assert_eq!(failure.code, "render_timeout");

        let staged = job_failure(&AppError::from(ProductionError::Render {
            stage: ProductionStage::RenderPages,
            source: RenderError::SessionCrashed {
                message: "gone".into(),
            },
        }));
        assert!(staged.retryable);
    }
}
