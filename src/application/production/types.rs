use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::{
    application::render::RenderError,
    domain::{
        error::DomainError,
        options::{ColorProfile, PdfStandard, RenderOptions},
        page::Page,
        production::ValidationReport,
        project::ProductFormat,
    },
};

pub const PRODUCTION_SLA: Duration = Duration::from_secs(120);

/// Ordered stages of a production compose. A failure aborts the stages that follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionStage {
    Validate,
    RenderPages,
    Combine,
    BleedAndMarks,
    ColorConversion,
    ApplyStandard,
    EmbedFonts,
    Compress,
    VerifyOutput,
    Upload,
    JobTicket,
}

impl ProductionStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductionStage::Validate => "validate",
            ProductionStage::RenderPages => "render_pages",
            ProductionStage::Combine => "combine",
            ProductionStage::BleedAndMarks => "bleed_and_marks",
            ProductionStage::ColorConversion => "color_conversion",
            ProductionStage::ApplyStandard => "apply_standard",
            ProductionStage::EmbedFonts => "embed_fonts",
            ProductionStage::Compress => "compress",
            ProductionStage::VerifyOutput => "verify_output",
            ProductionStage::JobTicket => "job_ticket",
            ProductionStage::Upload => "upload",
        }
    }

    /// Share of the job completed once this stage has finished.
    pub fn completed_fraction(self) -> f32 {
        match self {
            ProductionStage::Validate => 0.05,
            ProductionStage::RenderPages => 0.55,
            ProductionStage::Combine => 0.60,
            ProductionStage::BleedAndMarks => 0.65,
            ProductionStage::ColorConversion => 0.72,
            ProductionStage::ApplyStandard => 0.76,
            ProductionStage::EmbedFonts => 0.82,
            ProductionStage::Compress => 0.88,
            ProductionStage::VerifyOutput => 0.92,
            ProductionStage::Upload => 0.96,
            ProductionStage::JobTicket => 1.0,
        }
    }
}

/// Receives per-stage progress while a compose runs.
pub trait ProgressSink: Send + Sync {
    fn report(&self, stage: ProductionStage, progress: f32);
}

/// Sink for callers that do not track progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _stage: ProductionStage, _progress: f32) {}
}

#[derive(Debug, Clone)]
pub struct ProductionRequest {
    pub tenant_id: String,
    pub project_id: String,
    pub order_id: Option<String>,
    pub title: String,
    pub product_format: Option<ProductFormat>,
    pub pages: Vec<Page>,
    pub options: RenderOptions,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintMarks {
    /// Zero when no bleed is requested.
    pub bleed_mm: f64,
    pub crop_marks: bool,
}

impl PrintMarks {
    pub fn is_empty(&self) -> bool {
        self.bleed_mm <= 0.0 && !self.crop_marks
    }
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub title: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct JobTicket {
    pub job_id: String,
    pub order_id: Option<String>,
    pub project_id: String,
    pub title: String,
    pub pdf_url: String,
    pub page_count: usize,
    pub trim_width_mm: f64,
    pub trim_height_mm: f64,
    pub bleed_mm: f64,
    pub color_profile: ColorProfile,
    pub pdf_standard: Option<PdfStandard>,
    pub binding: Option<String>,
    pub paper: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Page boxes in PDF points, `[llx, lly, urx, ury]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PageBoxes {
    pub media_box: [f64; 4],
    pub trim_box: Option<[f64; 4]>,
    pub bleed_box: Option<[f64; 4]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlacement {
    pub page: usize,
    pub name: String,
    pub width_px: u32,
    pub height_px: u32,
    pub effective_dpi: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontUsage {
    pub name: String,
    pub embedded: bool,
}

/// Structural facts read back from a finished document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfInspection {
    pub version: String,
    pub pages: Vec<PageBoxes>,
    pub images: Vec<ImagePlacement>,
    pub fonts: Vec<FontUsage>,
    pub uses_rgb: bool,
    pub declared_standard: Option<PdfStandard>,
    pub has_output_intent: bool,
}

impl PdfInspection {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// True when every page declares a bleed box larger than its trim box.
    pub fn has_bleed(&self) -> bool {
        !self.pages.is_empty()
            && self.pages.iter().all(|page| match (page.trim_box, page.bleed_box) {
                (Some(trim), Some(bleed)) => bleed[0] < trim[0] && bleed[2] > trim[2],
                _ => false,
            })
    }

    pub fn lowest_image_dpi(&self) -> Option<f64> {
        self.images
            .iter()
            .map(|image| image.effective_dpi)
            .min_by(|a, b| a.total_cmp(b))
    }
}

#[derive(Debug, Clone, Error)]
pub enum PdfError {
    #[error("document could not be parsed: {message}")]
    Parse { message: String },
    #[error("document structure is invalid: {message}")]
    Structure { message: String },
    #[error("font handling failed: {message}")]
    Font { message: String },
    #[error("document could not be serialized: {message}")]
    Serialize { message: String },
}

impl PdfError {
    pub fn structure(message: impl Into<String>) -> Self {
        PdfError::Structure {
            message: message.into(),
        }
    }
}

/// Document-level transformations used by the production pipeline. All
/// operations are synchronous and CPU-bound; callers run them off the
/// async executor.
pub trait PdfProcessor: Send + Sync {
    /// Concatenate single- or multi-page documents, preserving order.
    fn combine(&self, documents: &[Bytes]) -> Result<Bytes, PdfError>;

    fn add_print_marks(&self, pdf: &[u8], marks: PrintMarks) -> Result<Bytes, PdfError>;

    fn convert_to_cmyk(&self, pdf: &[u8]) -> Result<Bytes, PdfError>;

    fn apply_standard(
        &self,
        pdf: &[u8],
        standard: PdfStandard,
        info: &DocumentInfo,
    ) -> Result<Bytes, PdfError>;

    fn embed_fonts(&self, pdf: &[u8]) -> Result<Bytes, PdfError>;

    /// `compression` uses the 50..=100 scale of the render options.
    fn compress(&self, pdf: &[u8], compression: u8) -> Result<Bytes, PdfError>;

    fn inspect(&self, pdf: &[u8]) -> Result<PdfInspection, PdfError>;

    fn job_ticket(&self, ticket: &JobTicket) -> Result<Bytes, PdfError>;
}

#[derive(Debug, Error)]
pub enum ProductionError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("stage `{}` failed to render: {source}", stage.as_str())]
    Render {
        stage: ProductionStage,
        #[source]
        source: RenderError,
    },
    #[error("stage `{}` failed: {source}", stage.as_str())]
    Pdf {
        stage: ProductionStage,
        #[source]
        source: PdfError,
    },
    #[error("stage `{}` could not store output: {message}", stage.as_str())]
    Storage {
        stage: ProductionStage,
        message: String,
    },
    #[error("output failed strict validation with {} error(s)", report.errors.len())]
    ValidationFailed { report: ValidationReport },
}

impl ProductionError {
    pub fn stage(&self) -> ProductionStage {
        match self {
            ProductionError::Validation(_) => ProductionStage::Validate,
            ProductionError::Render { stage, .. }
            | ProductionError::Pdf { stage, .. }
            | ProductionError::Storage { stage, .. } => *stage,
            ProductionError::ValidationFailed { .. } => ProductionStage::VerifyOutput,
        }
    }

    /// Stable reason string for callers.
    pub fn code(&self) -> &'static str {
        match self {
            ProductionError::Validation(err) => err.reason(),
            ProductionError::Render { source, .. } => source.code(),
            ProductionError::Pdf { .. } => "production_stage_failed",
            ProductionError::Storage { .. } => "storage_unavailable",
            ProductionError::ValidationFailed { .. } => "production_validation_failed",
        }
    }

    /// Retrying cannot fix bad input or a document that fails its checks.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ProductionError::Validation(_) | ProductionError::ValidationFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxes(trim: Option<[f64; 4]>, bleed: Option<[f64; 4]>) -> PageBoxes {
        PageBoxes {
            media_box: [0.0, 0.0, 100.0, 100.0],
            trim_box: trim,
            bleed_box: bleed,
        }
    }

    #[test]
    fn bleed_requires_every_page() {
        let with = boxes(Some([10.0, 10.0, 90.0, 90.0]), Some([2.0, 2.0, 98.0, 98.0]));
        let without = boxes(Some([0.0, 0.0, 100.0, 100.0]), None);

        let inspection = PdfInspection {
            pages: vec![with.clone(), with.clone()],
            ..PdfInspection::default()
        };
        assert!(inspection.has_bleed());

        let mixed = PdfInspection {
            pages: vec![with, without],
            ..PdfInspection::default()
        };
        assert!(!mixed.has_bleed());
        assert!(!PdfInspection::default().has_bleed());
    }

    #[test]
    fn stage_progress_is_monotonic() {
        let stages = [
            ProductionStage::Validate,
            ProductionStage::RenderPages,
            ProductionStage::Combine,
            ProductionStage::BleedAndMarks,
            ProductionStage::ColorConversion,
            ProductionStage::ApplyStandard,
            ProductionStage::EmbedFonts,
            ProductionStage::Compress,
            ProductionStage::VerifyOutput,
            ProductionStage::Upload,
            ProductionStage::JobTicket,
        ];
        assert!(
            stages
                .windows(2)
                .all(|pair| pair[0].completed_fraction() < pair[1].completed_fraction())
        );
    }
}
