use serde::{Deserialize, Serialize};

use super::options::PdfStandard;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionMetadata {
    pub file_size: u64,
    pub page_count: usize,
    pub color_space: String,
    pub resolution_dpi: u32,
    pub pdf_standard: Option<PdfStandard>,
    pub has_bleed: bool,
    pub has_crop_marks: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionResult {
    pub pdf_url: String,
    pub job_ticket_url: Option<String>,
    pub validation: ValidationReport,
    pub metadata: ProductionMetadata,
    pub processing_ms: u64,
}
