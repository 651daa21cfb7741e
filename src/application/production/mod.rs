//! Print-ready PDF production.
//!
//! A compose validates the request, renders every page to PDF, then walks
//! the document through the [`PdfProcessor`] stages in a fixed order before
//! checking the result and uploading it.

mod composer;
mod types;
pub mod validate;

pub use composer::{ComposerSettings, ProductionComposer};
pub use types::{
    DocumentInfo, FontUsage, ImagePlacement, JobTicket, NoProgress, PRODUCTION_SLA, PageBoxes,
    PdfError, PdfInspection, PdfProcessor, PrintMarks, ProductionError, ProductionRequest,
    ProductionStage, ProgressSink,
};
