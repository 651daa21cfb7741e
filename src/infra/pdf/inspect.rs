//! Read-back of a finished document for the validation gate.

use std::collections::{BTreeMap, HashSet};

use lopdf::{Dictionary, Document, Object, ObjectId, content::Content};

use crate::{
    application::production::{FontUsage, ImagePlacement, PageBoxes, PdfError, PdfInspection},
    domain::options::PdfStandard,
};

use super::{
    color::{is_rgb_space, rgb_space_names},
    fonts::{base_font, font_ids, is_embedded},
    inherited, lopdf_err, media_box, name_of, number, rect, resolve, resolve_dict,
};

type Matrix = [f64; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
const MAX_FORM_DEPTH: usize = 16;

/// `left` applied first, then `right`.
fn multiply(left: Matrix, right: Matrix) -> Matrix {
    [
        left[0] * right[0] + left[1] * right[2],
        left[0] * right[1] + left[1] * right[3],
        left[2] * right[0] + left[3] * right[2],
        left[2] * right[1] + left[3] * right[3],
        left[4] * right[0] + left[5] * right[2] + right[4],
        left[4] * right[1] + left[5] * right[3] + right[5],
    ]
}

fn matrix_of(values: &[Object]) -> Option<Matrix> {
    if values.len() != 6 {
        return None;
    }
    let mut out = [0.0; 6];
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = number(value)?;
    }
    Some(out)
}

/// Pixels per inch of an image drawn into the unit square under `ctm`.
/// The lower of the two axes wins.
pub(crate) fn effective_dpi(width_px: u32, height_px: u32, ctm: Matrix) -> Option<f64> {
    let placed_w = ctm[0].hypot(ctm[1]) / 72.0;
    let placed_h = ctm[2].hypot(ctm[3]) / 72.0;
    if placed_w <= f64::EPSILON || placed_h <= f64::EPSILON {
        return None;
    }
    Some((f64::from(width_px) / placed_w).min(f64::from(height_px) / placed_h))
}

struct Walker<'a> {
    doc: &'a Document,
    page: usize,
    images: Vec<ImagePlacement>,
    uses_rgb: bool,
    visited_forms: HashSet<ObjectId>,
}

impl<'a> Walker<'a> {
    fn walk(
        &mut self,
        content: &[u8],
        resources: Option<&Dictionary>,
        base: Matrix,
        depth: usize,
    ) -> Result<(), PdfError> {
        let content = Content::decode(content).map_err(lopdf_err)?;
        let rgb_names = rgb_space_names(self.doc, resources);
        let mut ctm = base;
        let mut stack = Vec::new();

        for op in &content.operations {
            match op.operator.as_str() {
                "q" => stack.push(ctm),
                "Q" => ctm = stack.pop().unwrap_or(base),
                "cm" => {
                    if let Some(matrix) = matrix_of(&op.operands) {
                        ctm = multiply(matrix, ctm);
                    }
                }
                "rg" | "RG" => self.uses_rgb = true,
                "cs" | "CS" => {
                    let rgb = op.operands.first().is_some_and(|operand| {
                        name_of(operand).is_some_and(|name| {
                            matches!(name, "DeviceRGB" | "RGB")
                                || rgb_names.contains(name.as_bytes())
                        })
                    });
                    self.uses_rgb |= rgb;
                }
                "Do" => {
                    let Some(name) = op.operands.first().and_then(name_of) else {
                        continue;
                    };
                    self.draw_xobject(name, resources, ctm, depth)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn draw_xobject(
        &mut self,
        name: &str,
        resources: Option<&Dictionary>,
        ctm: Matrix,
        depth: usize,
    ) -> Result<(), PdfError> {
        let doc = self.doc;
        let Some(target) = resources
            .and_then(|res| res.get(b"XObject").ok())
            .and_then(|obj| resolve_dict(doc, obj))
            .and_then(|xobjects| xobjects.get(name.as_bytes()).ok())
        else {
            return Ok(());
        };
        let form_id = target.as_reference().ok();
        let Some(stream) = resolve(doc, target).and_then(|obj| obj.as_stream().ok()) else {
            return Ok(());
        };

        match stream.dict.get(b"Subtype").ok().and_then(name_of) {
            Some("Image") => {
                let dimension = |key: &[u8]| {
                    stream
                        .dict
                        .get(key)
                        .ok()
                        .and_then(number)
                        .map(|value| value.max(0.0) as u32)
                        .unwrap_or(0)
                };
                let (width_px, height_px) = (dimension(b"Width"), dimension(b"Height"));
                if let Some(dpi) = effective_dpi(width_px, height_px, ctm) {
                    self.images.push(ImagePlacement {
                        page: self.page,
                        name: name.to_string(),
                        width_px,
                        height_px,
                        effective_dpi: dpi,
                    });
                }
            }
            Some("Form") => {
                if depth >= MAX_FORM_DEPTH {
                    return Ok(());
                }
                if let Some(id) = form_id {
                    if !self.visited_forms.insert(id) {
                        return Ok(());
                    }
                }
                let matrix = stream
                    .dict
                    .get(b"Matrix")
                    .ok()
                    .and_then(|obj| resolve(doc, obj))
                    .and_then(|obj| obj.as_array().ok())
                    .and_then(|values| matrix_of(values))
                    .unwrap_or(IDENTITY);
                let own = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .and_then(|obj| resolve_dict(doc, obj));
                let plain = stream.get_plain_content().map_err(lopdf_err)?;
                self.walk(&plain, own.or(resources), multiply(matrix, ctm), depth + 1)?;
                if let Some(id) = form_id {
                    self.visited_forms.remove(&id);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn page_boxes(doc: &Document, page_id: ObjectId) -> PageBoxes {
    let boxed = |key: &[u8]| inherited(doc, page_id, key).and_then(|obj| rect(doc, obj));
    PageBoxes {
        media_box: media_box(doc, page_id),
        trim_box: boxed(b"TrimBox"),
        bleed_box: boxed(b"BleedBox"),
    }
}

/// RGB images or shadings anywhere in the document, drawn or not.
fn has_rgb_resources(doc: &Document) -> bool {
    doc.objects.values().any(|obj| {
        let dict = match obj {
            Object::Stream(stream) => &stream.dict,
            Object::Dictionary(dict) => dict,
            _ => return false,
        };
        let paints = matches!(
            dict.get(b"Subtype").ok().and_then(name_of),
            Some("Image")
        ) || dict.has(b"ShadingType");
        paints
            && dict
                .get(b"ColorSpace")
                .is_ok_and(|space| is_rgb_space(doc, space))
    })
}

fn declared_standard(doc: &Document) -> Option<PdfStandard> {
    let info = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|obj| resolve_dict(doc, obj))?;
    let label = info.get(b"GTS_PDFXVersion").ok()?.as_str().ok()?;
    PdfStandard::from_version_label(std::str::from_utf8(label).ok()?)
}

fn has_output_intent(doc: &Document) -> bool {
    doc.catalog()
        .ok()
        .and_then(|catalog| catalog.get(b"OutputIntents").ok())
        .and_then(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_array().ok())
        .is_some_and(|intents| !intents.is_empty())
}

pub(crate) fn inspect(doc: &Document) -> Result<PdfInspection, PdfError> {
    let mut pages = Vec::new();
    let mut walker = Walker {
        doc,
        page: 0,
        images: Vec::new(),
        uses_rgb: false,
        visited_forms: HashSet::new(),
    };

    for (index, page_id) in doc.get_pages().values().copied().enumerate() {
        pages.push(page_boxes(doc, page_id));
        walker.page = index + 1;
        let resources = inherited(doc, page_id, b"Resources").and_then(|obj| resolve_dict(doc, obj));
        let content = doc.get_page_content(page_id).map_err(lopdf_err)?;
        walker.walk(&content, resources, IDENTITY, 0)?;
    }

    let mut fonts: BTreeMap<String, bool> = BTreeMap::new();
    for font_id in font_ids(doc) {
        let font = doc.get_dictionary(font_id).map_err(lopdf_err)?;
        let embedded = is_embedded(doc, font);
        fonts
            .entry(base_font(font))
            .and_modify(|all| *all &= embedded)
            .or_insert(embedded);
    }

    Ok(PdfInspection {
        version: doc.version.clone(),
        pages,
        images: walker.images,
        fonts: fonts
            .into_iter()
            .map(|(name, embedded)| FontUsage { name, embedded })
            .collect(),
        uses_rgb: walker.uses_rgb || has_rgb_resources(doc),
        declared_standard: declared_standard(doc),
        has_output_intent: has_output_intent(doc),
    })
}
