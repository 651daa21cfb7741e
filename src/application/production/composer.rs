use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures::{StreamExt, stream};
use metrics::histogram;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    application::{
        layout::build_template,
        render::{FINAL_TIMEOUT, RenderRequest, Renderer},
        repos::BlobStore,
    },
    domain::{
        options::{ColorProfile, OutputFormat},
        production::{ProductionMetadata, ProductionResult},
    },
};

use super::{
    types::{
        DocumentInfo, JobTicket, PRODUCTION_SLA, PdfError, PdfProcessor, PrintMarks,
        ProductionError, ProductionRequest, ProductionStage, ProgressSink,
    },
    validate::{validate_output, validate_request},
};

const SOURCE: &str = "application::production";
const METRIC_PRODUCTION_MS: &str = "pressroom_production_ms";
const PDF_CONTENT_TYPE: &str = "application/pdf";
const JDF_CONTENT_TYPE: &str = "application/vnd.cip4-jdf+xml";

#[derive(Debug, Clone)]
pub struct ComposerSettings {
    /// Pages rendered concurrently during the page stage.
    pub page_concurrency: usize,
    /// Per-page render deadline unless the request carries its own.
    pub page_timeout: Duration,
    pub sla: Duration,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            page_concurrency: 4,
            page_timeout: FINAL_TIMEOUT,
            sla: PRODUCTION_SLA,
        }
    }
}

impl ComposerSettings {
    pub fn from_config(
        production: &crate::config::ProductionSettings,
        render: &crate::config::RenderSettings,
    ) -> Self {
        Self {
            page_concurrency: production.page_concurrency.get() as usize,
            page_timeout: render.final_timeout,
            sla: production.sla,
        }
    }
}

/// Runs the production pipeline. Sync and queued production requests both
/// go through [`ProductionComposer::compose`].
#[derive(Clone)]
pub struct ProductionComposer {
    renderer: Arc<dyn Renderer>,
    processor: Arc<dyn PdfProcessor>,
    blobs: Arc<dyn BlobStore>,
    settings: ComposerSettings,
}

impl ProductionComposer {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        processor: Arc<dyn PdfProcessor>,
        blobs: Arc<dyn BlobStore>,
        settings: ComposerSettings,
    ) -> Self {
        Self {
            renderer,
            processor,
            blobs,
            settings,
        }
    }

    pub fn processor(&self) -> &Arc<dyn PdfProcessor> {
        &self.processor
    }

    pub async fn compose(
        &self,
        job_id: &str,
        request: ProductionRequest,
        progress: &dyn ProgressSink,
    ) -> Result<ProductionResult, ProductionError> {
        let started_at = Instant::now();
        let outcome = self.run(job_id, &request, progress, started_at).await;
        let elapsed = started_at.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        histogram!(
            METRIC_PRODUCTION_MS,
            "result" => if outcome.is_ok() { "ok" } else { "error" }
        )
        .record(elapsed_ms as f64);

        if elapsed > self.settings.sla {
            warn!(
                target = SOURCE,
                op = "production::compose",
                tenant_id = %request.tenant_id,
                project_id = %request.project_id,
                job_id,
                elapsed_ms,
                sla_ms = self.settings.sla.as_millis() as u64,
                "production compose exceeded its SLA"
            );
        }

        match &outcome {
            Ok(result) => info!(
                target = SOURCE,
                op = "production::compose",
                result = "ok",
                tenant_id = %request.tenant_id,
                project_id = %request.project_id,
                job_id,
                page_count = result.metadata.page_count,
                file_size = result.metadata.file_size,
                is_valid = result.validation.is_valid,
                elapsed_ms,
            ),
            Err(err) => warn!(
                target = SOURCE,
                op = "production::compose",
                result = "error",
                tenant_id = %request.tenant_id,
                project_id = %request.project_id,
                job_id,
                stage = err.stage().as_str(),
                error_code = err.code(),
                error = %err,
                elapsed_ms,
            ),
        }
        outcome
    }

    async fn run(
        &self,
        job_id: &str,
        request: &ProductionRequest,
        progress: &dyn ProgressSink,
        started_at: Instant,
    ) -> Result<ProductionResult, ProductionError> {
        let options = &request.options;
        let production = &options.production;

        validate_request(&request.pages, options)?;
        progress.report(
            ProductionStage::Validate,
            ProductionStage::Validate.completed_fraction(),
        );

        let pages = self.render_pages(request, progress).await?;

        let mut pdf = self
            .run_stage(ProductionStage::Combine, progress, move |processor| {
                processor.combine(&pages)
            })
            .await?;

        let marks = PrintMarks {
            bleed_mm: if production.include_bleed {
                production.bleed_mm
            } else {
                0.0
            },
            crop_marks: production.include_crop_marks,
        };
        if !marks.is_empty() {
            pdf = self
                .run_stage(ProductionStage::BleedAndMarks, progress, move |processor| {
                    processor.add_print_marks(&pdf, marks)
                })
                .await?;
        }

        let to_cmyk = production.color_profile == ColorProfile::Cmyk
            || production
                .pdf_standard
                .is_some_and(|standard| standard.requires_cmyk());
        if to_cmyk {
            pdf = self
                .run_stage(ProductionStage::ColorConversion, progress, move |processor| {
                    processor.convert_to_cmyk(&pdf)
                })
                .await?;
        }

        if let Some(standard) = production.pdf_standard {
            let info = DocumentInfo {
                title: request.title.clone(),
                created_at: OffsetDateTime::now_utc(),
            };
            pdf = self
                .run_stage(ProductionStage::ApplyStandard, progress, move |processor| {
                    processor.apply_standard(&pdf, standard, &info)
                })
                .await?;
        }

        pdf = self
            .run_stage(ProductionStage::EmbedFonts, progress, move |processor| {
                processor.embed_fonts(&pdf)
            })
            .await?;

        let compression = production.compression;
        pdf = self
            .run_stage(ProductionStage::Compress, progress, move |processor| {
                processor.compress(&pdf, compression)
            })
            .await?;

        let inspected = pdf.clone();
        let inspection = self
            .run_stage(ProductionStage::VerifyOutput, progress, move |processor| {
                processor.inspect(&inspected)
            })
            .await?;
        let validation = validate_output(&inspection, options, request.pages.len());
        if !validation.is_valid {
            warn!(
                target = SOURCE,
                op = "production::verify",
                job_id,
                strict = production.strict_validation,
                errors = ?validation.errors,
                "production output failed validation"
            );
            if production.strict_validation {
                return Err(ProductionError::ValidationFailed { report: validation });
            }
        }
        if let Some(lowest) = inspection.lowest_image_dpi() {
            debug!(target = SOURCE, op = "production::verify", job_id, lowest_image_dpi = lowest);
        }

        let file_size = pdf.len() as u64;
        let base_key = format!(
            "production/{}/{}/{}",
            request.tenant_id,
            request.project_id,
            OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
        );
        let blob_metadata = BTreeMap::from([
            ("tenant_id".to_string(), request.tenant_id.clone()),
            ("project_id".to_string(), request.project_id.clone()),
            ("job_id".to_string(), job_id.to_string()),
        ]);
        let pdf_url = self
            .blobs
            .upload(pdf, &format!("{base_key}.pdf"), PDF_CONTENT_TYPE, &blob_metadata)
            .await
            .map_err(|err| ProductionError::Storage {
                stage: ProductionStage::Upload,
                message: err.to_string(),
            })?;
        progress.report(
            ProductionStage::Upload,
            ProductionStage::Upload.completed_fraction(),
        );

        let job_ticket_url = if production.emit_job_ticket {
            let (trim_width_mm, trim_height_mm) = request
                .product_format
                .as_ref()
                .map(|format| (format.width_mm, format.height_mm))
                .unwrap_or_else(|| (request.pages[0].width_mm, request.pages[0].height_mm));
            let ticket = JobTicket {
                job_id: job_id.to_string(),
                order_id: request.order_id.clone(),
                project_id: request.project_id.clone(),
                title: request.title.clone(),
                pdf_url: pdf_url.clone(),
                page_count: inspection.page_count(),
                trim_width_mm,
                trim_height_mm,
                bleed_mm: marks.bleed_mm,
                color_profile: if to_cmyk {
                    ColorProfile::Cmyk
                } else {
                    ColorProfile::Rgb
                },
                pdf_standard: production.pdf_standard,
                binding: request
                    .product_format
                    .as_ref()
                    .and_then(|format| format.binding.clone()),
                paper: request
                    .product_format
                    .as_ref()
                    .and_then(|format| format.paper.clone()),
                created_at: OffsetDateTime::now_utc(),
            };
            let ticket = self
                .run_stage(ProductionStage::JobTicket, progress, move |processor| {
                    processor.job_ticket(&ticket)
                })
                .await?;
            let url = self
                .blobs
                .upload(
                    ticket,
                    &format!("{base_key}.jdf"),
                    JDF_CONTENT_TYPE,
                    &blob_metadata,
                )
                .await
                .map_err(|err| ProductionError::Storage {
                    stage: ProductionStage::JobTicket,
                    message: err.to_string(),
                })?;
            Some(url)
        } else {
            None
        };

        Ok(ProductionResult {
            pdf_url,
            job_ticket_url,
            validation,
            metadata: ProductionMetadata {
                file_size,
                page_count: inspection.page_count(),
                color_space: if to_cmyk {
                    ColorProfile::Cmyk.as_str().to_string()
                } else {
                    ColorProfile::Rgb.as_str().to_string()
                },
                resolution_dpi: options.dpi,
                pdf_standard: inspection.declared_standard,
                has_bleed: inspection.has_bleed(),
                has_crop_marks: marks.crop_marks,
            },
            processing_ms: started_at.elapsed().as_millis() as u64,
        })
    }

    /// Render and concatenate the pages with none of the print stages.
    pub async fn render_combined(
        &self,
        request: &ProductionRequest,
        progress: &dyn ProgressSink,
    ) -> Result<Bytes, ProductionError> {
        let pages = self.render_pages(request, progress).await?;
        self.run_stage(ProductionStage::Combine, progress, move |processor| {
            processor.combine(&pages)
        })
        .await
    }

    /// Render every page to a single-page PDF, in request order.
    async fn render_pages(
        &self,
        request: &ProductionRequest,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<Bytes>, ProductionError> {
        let options = request.options.clone().with_format(OutputFormat::Pdf);
        let render_request =
            RenderRequest::new(OutputFormat::Pdf, options.timeout_or(self.settings.page_timeout));
        let total = request.pages.len();
        let base = ProductionStage::Validate.completed_fraction();
        let span = ProductionStage::RenderPages.completed_fraction() - base;

        let templates: Vec<_> = request
            .pages
            .iter()
            .map(|page| build_template(page, &options))
            .collect();
        let renderer = Arc::clone(&self.renderer);
        let mut pending = stream::iter(templates)
            .map(move |template| {
                let renderer = Arc::clone(&renderer);
                let render_request = render_request.clone();
                async move {
                    renderer
                        .render(&template, &render_request)
                        .await
                        .map_err(|source| ProductionError::Render {
                            stage: ProductionStage::RenderPages,
                            source,
                        })
                }
            })
            .buffered(self.settings.page_concurrency.max(1));

        let mut rendered = Vec::with_capacity(total);
        while let Some(bytes) = pending.next().await {
            rendered.push(bytes?);
            progress.report(
                ProductionStage::RenderPages,
                base + span * rendered.len() as f32 / total as f32,
            );
        }

        Ok(rendered)
    }

    async fn run_stage<T, F>(
        &self,
        stage: ProductionStage,
        progress: &dyn ProgressSink,
        work: F,
    ) -> Result<T, ProductionError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PdfProcessor) -> Result<T, PdfError> + Send + 'static,
    {
        let processor = Arc::clone(&self.processor);
        let started_at = Instant::now();
        let output = tokio::task::spawn_blocking(move || work(processor.as_ref()))
            .await
            .map_err(|err| ProductionError::Pdf {
                stage,
                source: PdfError::structure(format!("stage task aborted: {err}")),
            })?
            .map_err(|source| ProductionError::Pdf { stage, source })?;

        debug!(
            target = SOURCE,
            op = "production::stage",
            stage = stage.as_str(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
        );
        progress.report(stage, stage.completed_fraction());
        Ok(output)
    }
}
