//! Gates on either side of the production pipeline.

use crate::domain::{
    error::DomainError,
    options::{ColorProfile, RenderOptions, validate_page_geometry},
    page::Page,
    production::ValidationReport,
};

use super::types::PdfInspection;

pub const MAX_PAGES: usize = 500;
pub const MIN_PRODUCTION_DPI: u32 = 150;
pub const MAX_PRODUCTION_DPI: u32 = 600;
pub const MIN_BLEED_MM: f64 = 1.0;
pub const MAX_BLEED_MM: f64 = 10.0;
pub const MIN_COMPRESSION: u8 = 50;
pub const MAX_COMPRESSION: u8 = 100;
pub const MIN_PAGE_MM: f64 = 50.0;
pub const MAX_PAGE_MM: f64 = 1000.0;
pub const MIN_IMAGE_DPI: f64 = 300.0;

/// Reject a production request before any rendering happens.
pub fn validate_request(pages: &[Page], options: &RenderOptions) -> Result<(), DomainError> {
    if pages.is_empty() || pages.len() > MAX_PAGES {
        return Err(DomainError::validation(
            "pages",
            format!("expected 1 to {MAX_PAGES} pages, got {}", pages.len()),
        ));
    }

    if !(MIN_PRODUCTION_DPI..=MAX_PRODUCTION_DPI).contains(&options.dpi) {
        return Err(DomainError::validation(
            "dpi",
            format!(
                "production requires {MIN_PRODUCTION_DPI} to {MAX_PRODUCTION_DPI} dpi, got {}",
                options.dpi
            ),
        ));
    }

    let production = &options.production;
    if production.include_bleed
        && !(MIN_BLEED_MM..=MAX_BLEED_MM).contains(&production.bleed_mm)
    {
        return Err(DomainError::validation(
            "bleed",
            format!(
                "must be between {MIN_BLEED_MM} and {MAX_BLEED_MM} mm, got {}",
                production.bleed_mm
            ),
        ));
    }

    if !(MIN_COMPRESSION..=MAX_COMPRESSION).contains(&production.compression) {
        return Err(DomainError::validation(
            "compression",
            format!(
                "must be between {MIN_COMPRESSION} and {MAX_COMPRESSION}, got {}",
                production.compression
            ),
        ));
    }

    for page in pages {
        validate_page_geometry(page)?;
        for (axis, value) in [("width", page.width_mm), ("height", page.height_mm)] {
            if !(MIN_PAGE_MM..=MAX_PAGE_MM).contains(&value) {
                return Err(DomainError::validation(
                    "dimensions",
                    format!(
                        "page `{}` {axis} {value} mm is outside {MIN_PAGE_MM}..={MAX_PAGE_MM} mm",
                        page.id
                    ),
                ));
            }
        }
    }

    Ok(())
}

/// Check a finished document against what the request asked for.
pub fn validate_output(
    inspection: &PdfInspection,
    options: &RenderOptions,
    expected_pages: usize,
) -> ValidationReport {
    let production = &options.production;
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if inspection.page_count() == 0 {
        errors.push("document has no pages".to_string());
    } else if inspection.page_count() != expected_pages {
        errors.push(format!(
            "document has {} pages, expected {expected_pages}",
            inspection.page_count()
        ));
    }

    if let Some(standard) = production.pdf_standard {
        match inspection.declared_standard {
            Some(declared) if declared == standard => {}
            Some(declared) => errors.push(format!(
                "document declares {} instead of {}",
                declared.version_label(),
                standard.version_label()
            )),
            None => errors.push(format!(
                "document does not declare {}",
                standard.version_label()
            )),
        }
        if !inspection.has_output_intent {
            errors.push("PDF/X output intent is missing".to_string());
        }
    }

    if production.include_bleed && !inspection.has_bleed() {
        errors.push("bleed was requested but pages carry no bleed box".to_string());
    }

    for image in &inspection.images {
        if image.effective_dpi < MIN_IMAGE_DPI {
            errors.push(format!(
                "image {} on page {} is placed at {:.0} dpi (minimum {MIN_IMAGE_DPI:.0})",
                image.name, image.page, image.effective_dpi
            ));
        }
    }

    for font in inspection.fonts.iter().filter(|font| !font.embedded) {
        errors.push(format!("font {} is not embedded", font.name));
    }

    let cmyk_required = production.color_profile == ColorProfile::Cmyk
        || production
            .pdf_standard
            .is_some_and(|standard| standard.requires_cmyk());
    if inspection.uses_rgb {
        if cmyk_required {
            errors.push("RGB content remains in a CMYK document".to_string());
        } else if production.pdf_standard.is_some() {
            warnings.push("document contains device RGB colour".to_string());
        }
    }

    ValidationReport::from_findings(errors, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        application::production::types::{FontUsage, ImagePlacement, PageBoxes},
        domain::options::PdfStandard,
    };

    fn page(width_mm: f64, height_mm: f64) -> Page {
        Page {
            id: "p".into(),
            width_mm,
            height_mm,
            background: "#ffffff".into(),
            elements: Vec::new(),
        }
    }

    fn options() -> RenderOptions {
        RenderOptions::default().with_dpi(300)
    }

    #[test]
    fn request_bounds() {
        let a4 = vec![page(210.0, 297.0)];
        assert!(validate_request(&a4, &options()).is_ok());

        let err = validate_request(&[], &options()).expect_err("no pages");
        assert_eq!(err.reason(), "invalid_page_count");

        let err = validate_request(&a4, &RenderOptions::default().with_dpi(100))
            .expect_err("dpi too low");
        assert_eq!(err.reason(), "invalid_dpi");

        let err = validate_request(&[page(40.0, 297.0)], &options()).expect_err("narrow page");
        assert_eq!(err.reason(), "invalid_dimensions");

        let mut bleed = options();
        bleed.production.include_bleed = true;
        bleed.production.bleed_mm = 12.0;
        let err = validate_request(&a4, &bleed).expect_err("bleed too wide");
        assert_eq!(err.reason(), "invalid_bleed");

        let mut compression = options();
        compression.production.compression = 40;
        let err = validate_request(&a4, &compression).expect_err("compression too low");
        assert_eq!(err.reason(), "invalid_compression");
    }

    #[test]
    fn bleed_is_only_checked_when_enabled() {
        let mut opts = options();
        opts.production.bleed_mm = 50.0;
        assert!(validate_request(&[page(210.0, 297.0)], &opts).is_ok());
    }

    #[test]
    fn page_limit() {
        let pages = vec![page(210.0, 297.0); MAX_PAGES + 1];
        let err = validate_request(&pages, &options()).expect_err("too many pages");
        assert_eq!(err.reason(), "invalid_page_count");
    }

    fn clean_inspection() -> PdfInspection {
        PdfInspection {
            version: "1.6".into(),
            pages: vec![PageBoxes {
                media_box: [0.0, 0.0, 612.0, 858.0],
                trim_box: Some([8.5, 8.5, 603.5, 849.5]),
                bleed_box: Some([0.0, 0.0, 612.0, 858.0]),
            }],
            images: Vec::new(),
            fonts: vec![FontUsage {
                name: "Helvetica".into(),
                embedded: true,
            }],
            uses_rgb: false,
            declared_standard: Some(PdfStandard::PdfX4),
            has_output_intent: true,
        }
    }

    #[test]
    fn output_report_collects_errors_and_warnings() {
        let mut opts = options();
        opts.production.include_bleed = true;
        opts.production.pdf_standard = Some(PdfStandard::PdfX4);

        let report = validate_output(&clean_inspection(), &opts, 1);
        assert!(report.is_valid, "{report:?}");

        let mut inspection = clean_inspection();
        inspection.images.push(ImagePlacement {
            page: 1,
            name: "Im1".into(),
            width_px: 600,
            height_px: 400,
            effective_dpi: 144.0,
        });
        inspection.fonts[0].embedded = false;
        inspection.uses_rgb = true;
        let report = validate_output(&inspection, &opts, 1);
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 2, "{report:?}");
        assert_eq!(report.warnings.len(), 1, "{report:?}");
        assert!(report.warnings[0].contains("RGB"));
    }

    #[test]
    fn low_resolution_images_fail_validation() {
        let mut opts = options();
        opts.production.strict_validation = true;
        let mut inspection = clean_inspection();
        inspection.images.push(ImagePlacement {
            page: 1,
            name: "Im1".into(),
            width_px: 600,
            height_px: 400,
            effective_dpi: 144.0,
        });

        let report = validate_output(&inspection, &opts, 1);
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("144 dpi"), "{report:?}");
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn rgb_content_fails_cmyk_documents() {
        let mut opts = options();
        opts.production.color_profile = ColorProfile::Cmyk;
        let mut inspection = clean_inspection();
        inspection.declared_standard = None;
        inspection.uses_rgb = true;

        let report = validate_output(&inspection, &opts, 1);
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("RGB"));
    }

    #[test]
    fn missing_standard_is_an_error() {
        let mut opts = options();
        opts.production.pdf_standard = Some(PdfStandard::PdfX1a);
        let mut inspection = clean_inspection();
        inspection.declared_standard = None;
        inspection.has_output_intent = false;

        let report = validate_output(&inspection, &opts, 1);
        assert_eq!(report.errors.len(), 2);
    }
}
