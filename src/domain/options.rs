//! Render options shared by the preview, final and production paths.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    error::DomainError,
    page::{Page, mm_to_px},
};

pub const MIN_DPI: u32 = 72;
pub const MAX_DPI: u32 = 600;
pub const DEFAULT_DPI: u32 = 150;
pub const MAX_PREVIEW_PX: u32 = 4096;
pub const MAX_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    Pdf,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Pdf => "pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Pdf => "application/pdf",
        }
    }

    pub fn is_raster(self) -> bool {
        !matches!(self, OutputFormat::Pdf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorProfile {
    #[default]
    Rgb,
    Cmyk,
}

impl ColorProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            ColorProfile::Rgb => "RGB",
            ColorProfile::Cmyk => "CMYK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PdfStandard {
    #[serde(rename = "PDF_X1A")]
    PdfX1a,
    #[serde(rename = "PDF_X3")]
    PdfX3,
    #[serde(rename = "PDF_X4")]
    PdfX4,
}

impl PdfStandard {
    pub fn as_str(self) -> &'static str {
        match self {
            PdfStandard::PdfX1a => "PDF_X1A",
            PdfStandard::PdfX3 => "PDF_X3",
            PdfStandard::PdfX4 => "PDF_X4",
        }
    }

    /// Value written to the `GTS_PDFXVersion` info entry.
    pub fn version_label(self) -> &'static str {
        match self {
            PdfStandard::PdfX1a => "PDF/X-1a:2001",
            PdfStandard::PdfX3 => "PDF/X-3:2002",
            PdfStandard::PdfX4 => "PDF/X-4",
        }
    }

    pub fn from_version_label(label: &str) -> Option<Self> {
        [PdfStandard::PdfX1a, PdfStandard::PdfX3, PdfStandard::PdfX4]
            .into_iter()
            .find(|standard| standard.version_label() == label)
    }

    /// Minimum PDF header version the standard builds on.
    pub fn pdf_version(self) -> &'static str {
        match self {
            PdfStandard::PdfX1a | PdfStandard::PdfX3 => "1.3",
            PdfStandard::PdfX4 => "1.6",
        }
    }

    /// X-1a forbids anything but CMYK and spot colour.
    pub fn requires_cmyk(self) -> bool {
        matches!(self, PdfStandard::PdfX1a)
    }
}

fn default_dpi() -> u32 {
    DEFAULT_DPI
}

fn default_quality() -> u8 {
    90
}

fn default_bleed_mm() -> f64 {
    3.0
}

fn default_compression() -> u8 {
    85
}

/// Print-specific switches, only consulted on the production path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionFlags {
    #[serde(default)]
    pub include_bleed: bool,
    #[serde(default = "default_bleed_mm")]
    pub bleed_mm: f64,
    #[serde(default)]
    pub include_crop_marks: bool,
    #[serde(default)]
    pub color_profile: ColorProfile,
    #[serde(default)]
    pub pdf_standard: Option<PdfStandard>,
    #[serde(default = "default_compression")]
    pub compression: u8,
    #[serde(default)]
    pub strict_validation: bool,
    #[serde(default)]
    pub emit_job_ticket: bool,
}

impl Default for ProductionFlags {
    fn default() -> Self {
        Self {
            include_bleed: false,
            bleed_mm: default_bleed_mm(),
            include_crop_marks: false,
            color_profile: ColorProfile::Rgb,
            pdf_standard: None,
            compression: default_compression(),
            strict_validation: false,
            emit_job_ticket: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub include_guides: bool,
    #[serde(flatten)]
    pub production: ProductionFlags,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            format: OutputFormat::Png,
            quality: default_quality(),
            background: None,
            timeout_ms: None,
            include_guides: false,
            production: ProductionFlags::default(),
        }
    }
}

impl RenderOptions {
    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn timeout_or(&self, fallback: Duration) -> Duration {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(fallback)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if !(MIN_DPI..=MAX_DPI).contains(&self.dpi) {
            return Err(DomainError::validation(
                "dpi",
                format!("must be between {MIN_DPI} and {MAX_DPI}, got {}", self.dpi),
            ));
        }
        self.validate_except_dpi()
    }

    /// Every check but the dpi range, for presets that pick their own dpi.
    pub fn validate_except_dpi(&self) -> Result<(), DomainError> {
        if !(1..=100).contains(&self.quality) {
            return Err(DomainError::validation(
                "quality",
                format!("must be between 1 and 100, got {}", self.quality),
            ));
        }
        if let Some(ms) = self.timeout_ms {
            if ms > MAX_TIMEOUT_MS {
                return Err(DomainError::validation(
                    "timeout",
                    format!("must be at most {MAX_TIMEOUT_MS} ms, got {ms}"),
                ));
            }
        }
        Ok(())
    }

    /// Reject pages whose rendered size would exceed the preview ceiling.
    pub fn ensure_preview_size(&self, page: &Page) -> Result<(u32, u32), DomainError> {
        validate_page_geometry(page)?;
        let width = mm_to_px(page.width_mm, self.dpi);
        let height = mm_to_px(page.height_mm, self.dpi);
        if width > MAX_PREVIEW_PX || height > MAX_PREVIEW_PX {
            return Err(DomainError::validation(
                "dimensions",
                format!(
                    "{width}x{height} px at {} dpi exceeds the {MAX_PREVIEW_PX} px preview limit",
                    self.dpi
                ),
            ));
        }
        Ok((width, height))
    }
}

pub fn validate_page_geometry(page: &Page) -> Result<(), DomainError> {
    let sane = |value: f64| value.is_finite() && value > 0.0;
    if !sane(page.width_mm) || !sane(page.height_mm) {
        return Err(DomainError::validation(
            "dimensions",
            format!(
                "page `{}` has invalid size {}x{} mm",
                page.id, page.width_mm, page.height_mm
            ),
        ));
    }
    Ok(())
}
