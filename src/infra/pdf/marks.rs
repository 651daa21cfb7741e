use std::fmt::Write as _;

use lopdf::{Document, Object, ObjectId, Stream, dictionary};

use crate::{
    application::production::{PdfError, PrintMarks},
    domain::page::mm_to_pt,
};

use super::{lopdf_err, media_box, rect_object};

/// Distance between the bleed edge and the start of a crop mark.
pub(crate) const CROP_MARK_GAP_MM: f64 = 2.0;
pub(crate) const CROP_MARK_LENGTH_MM: f64 = 5.0;
const CROP_MARK_WIDTH_PT: f64 = 0.25;

/// Page geometry after marks are applied, in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MarkedPage {
    pub media: [f64; 4],
    pub trim: [f64; 4],
    pub bleed: [f64; 4],
}

pub(crate) fn layout(trim_width: f64, trim_height: f64, marks: PrintMarks) -> MarkedPage {
    let bleed = mm_to_pt(marks.bleed_mm.max(0.0));
    let margin = if marks.crop_marks {
        bleed + mm_to_pt(CROP_MARK_GAP_MM + CROP_MARK_LENGTH_MM)
    } else {
        bleed
    };
    MarkedPage {
        media: [0.0, 0.0, trim_width + 2.0 * margin, trim_height + 2.0 * margin],
        trim: [margin, margin, margin + trim_width, margin + trim_height],
        bleed: [
            margin - bleed,
            margin - bleed,
            margin + trim_width + bleed,
            margin + trim_height + bleed,
        ],
    }
}

/// Grow every page by the bleed (and the mark area when crop marks are on),
/// move the artwork onto the trim box and draw the marks outside the bleed.
pub(crate) fn apply(doc: &mut Document, marks: PrintMarks) -> Result<(), PdfError> {
    let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    for page_id in page_ids {
        let original = media_box(doc, page_id);
        let width = original[2] - original[0];
        let height = original[3] - original[1];
        let marked = layout(width, height, marks);

        let content = doc.get_page_content(page_id).map_err(lopdf_err)?;
        let mut wrapped = format!(
            "q 1 0 0 1 {} {} cm\n",
            fmt(marked.trim[0] - original[0]),
            fmt(marked.trim[1] - original[1])
        )
        .into_bytes();
        wrapped.extend_from_slice(&content);
        wrapped.extend_from_slice(b"\nQ\n");
        if marks.crop_marks {
            wrapped.extend_from_slice(crop_marks(&marked, marks.bleed_mm).as_bytes());
        }
        let content_id = doc.add_object(Stream::new(dictionary! {}, wrapped));

        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(lopdf_err)?;
        page.set("Contents", content_id);
        page.set("MediaBox", rect_object(marked.media));
        page.set("CropBox", rect_object(marked.media));
        page.set("BleedBox", rect_object(marked.bleed));
        page.set("TrimBox", rect_object(marked.trim));
        page.remove(b"ArtBox");
    }
    doc.prune_objects();
    Ok(())
}

/// Registration-colour hairlines extending the trim lines past the bleed.
fn crop_marks(page: &MarkedPage, bleed_mm: f64) -> String {
    let start = mm_to_pt(bleed_mm.max(0.0) + CROP_MARK_GAP_MM);
    let end = start + mm_to_pt(CROP_MARK_LENGTH_MM);
    let [left, bottom, right, top] = page.trim;

    let mut out = format!("q {} w 1 1 1 1 K\n", fmt(CROP_MARK_WIDTH_PT));
    for (x, dir_x) in [(left, -1.0), (right, 1.0)] {
        for (y, dir_y) in [(bottom, -1.0), (top, 1.0)] {
            let _ = writeln!(
                out,
                "{} {} m {} {} l S",
                fmt(x + dir_x * start),
                fmt(y),
                fmt(x + dir_x * end),
                fmt(y)
            );
            let _ = writeln!(
                out,
                "{} {} m {} {} l S",
                fmt(x),
                fmt(y + dir_y * start),
                fmt(x),
                fmt(y + dir_y * end)
            );
        }
    }
    out.push_str("Q\n");
    out
}

fn fmt(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    if rounded == 0.0 {
        "0".to_string()
    } else {
        rounded.to_string()
    }
}
