//! lopdf-backed implementation of the production document stages.

mod color;
mod compress;
mod fonts;
mod inspect;
mod marks;
mod merge;
mod standard;
mod ticket;
mod xml;

use bytes::Bytes;
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::{
    application::production::{
        DocumentInfo, JobTicket, PdfError, PdfInspection, PdfProcessor, PrintMarks,
    },
    domain::options::PdfStandard,
};

pub use fonts::{FontFace, FontLibrary};

/// Default [`PdfProcessor`]: each stage loads the document, rewrites it in
/// place and serializes it again.
#[derive(Debug, Default)]
pub struct LopdfProcessor {
    fonts: FontLibrary,
}

impl LopdfProcessor {
    pub fn new(fonts: FontLibrary) -> Self {
        Self { fonts }
    }
}

impl PdfProcessor for LopdfProcessor {
    fn combine(&self, documents: &[Bytes]) -> Result<Bytes, PdfError> {
        let mut doc = merge::combine(documents)?;
        save(&mut doc)
    }

    fn add_print_marks(&self, pdf: &[u8], marks: PrintMarks) -> Result<Bytes, PdfError> {
        let mut doc = load(pdf)?;
        marks::apply(&mut doc, marks)?;
        save(&mut doc)
    }

    fn convert_to_cmyk(&self, pdf: &[u8]) -> Result<Bytes, PdfError> {
        let mut doc = load(pdf)?;
        color::convert_document(&mut doc)?;
        save(&mut doc)
    }

    fn apply_standard(
        &self,
        pdf: &[u8],
        standard: PdfStandard,
        info: &DocumentInfo,
    ) -> Result<Bytes, PdfError> {
        let mut doc = load(pdf)?;
        standard::apply(&mut doc, standard, info)?;
        save(&mut doc)
    }

    fn embed_fonts(&self, pdf: &[u8]) -> Result<Bytes, PdfError> {
        let mut doc = load(pdf)?;
        fonts::embed_missing(&mut doc, &self.fonts)?;
        save(&mut doc)
    }

    fn compress(&self, pdf: &[u8], compression: u8) -> Result<Bytes, PdfError> {
        let mut doc = load(pdf)?;
        compress::compress_streams(&mut doc, compression)?;
        save(&mut doc)
    }

    fn inspect(&self, pdf: &[u8]) -> Result<PdfInspection, PdfError> {
        let doc = load(pdf)?;
        inspect::inspect(&doc)
    }

    fn job_ticket(&self, ticket: &JobTicket) -> Result<Bytes, PdfError> {
        ticket::write_jdf(ticket).map(Bytes::from)
    }
}

pub(crate) fn lopdf_err(err: lopdf::Error) -> PdfError {
    PdfError::Structure {
        message: err.to_string(),
    }
}

pub(crate) fn load(bytes: &[u8]) -> Result<Document, PdfError> {
    let doc = Document::load_mem(bytes).map_err(|err| PdfError::Parse {
        message: err.to_string(),
    })?;
    if doc.is_encrypted() {
        return Err(PdfError::structure("encrypted documents are not supported"));
    }
    if doc.get_pages().is_empty() {
        return Err(PdfError::structure("document has no pages"));
    }
    Ok(doc)
}

pub(crate) fn save(doc: &mut Document) -> Result<Bytes, PdfError> {
    let mut out = Vec::new();
    doc.save_to(&mut out).map_err(|err| PdfError::Serialize {
        message: err.to_string(),
    })?;
    Ok(Bytes::from(out))
}

pub(crate) fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(f64::from(*value)),
        _ => None,
    }
}

pub(crate) fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

/// Follow a reference, returning the object itself otherwise.
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

pub(crate) fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    resolve(doc, obj).and_then(|obj| obj.as_dict().ok())
}

pub(crate) fn rect(doc: &Document, obj: &Object) -> Option<[f64; 4]> {
    let items = resolve(doc, obj)?.as_array().ok()?;
    if items.len() < 4 {
        return None;
    }
    let mut out = [0.0; 4];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = number(resolve(doc, item)?)?;
    }
    Some([
        out[0].min(out[2]),
        out[1].min(out[3]),
        out[0].max(out[2]),
        out[1].max(out[3]),
    ])
}

pub(crate) fn rect_object(rect: [f64; 4]) -> Object {
    Object::Array(rect.iter().map(|value| real(*value)).collect())
}

/// Page attribute, looked up through the `Parent` chain for inheritable keys.
pub(crate) fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = Some(page_id);
    let mut depth = 0;
    while let Some(id) = current {
        let dict = doc.get_dictionary(id).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        current = dict
            .get(b"Parent")
            .and_then(Object::as_reference)
            .ok();
        depth += 1;
        if depth > 64 {
            return None;
        }
    }
    None
}

pub(crate) fn media_box(doc: &Document, page_id: ObjectId) -> [f64; 4] {
    inherited(doc, page_id, b"MediaBox")
        .and_then(|obj| rect(doc, obj))
        .unwrap_or([0.0, 0.0, 612.0, 792.0])
}

pub(crate) fn name_of(obj: &Object) -> Option<&str> {
    obj.as_name().ok().and_then(|name| std::str::from_utf8(name).ok())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::{Document, Object, Stream, dictionary};

    /// Single-page document whose content fills the page with an RGB colour
    /// and prints a line with a standard font.
    pub(crate) fn page_pdf(width_pt: i64, height_pt: i64, label: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = format!(
            "0.9 0.2 0.1 rg 0 0 {width_pt} {height_pt} re f BT /F1 18 Tf 72 72 Td ({label}) Tj ET"
        );
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), width_pt.into(), height_pt.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).expect("save fixture");
        out
    }

    /// Page that paints an 8-bit RGB image scaled to `placed_pt` square.
    pub(crate) fn image_pdf(pixels: u32, placed_pt: f64) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();
        let rgb = vec![200u8; (pixels * pixels * 3) as usize];
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(pixels),
                "Height" => i64::from(pixels),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            rgb,
        ));
        let content = format!("q {placed_pt} 0 0 {placed_pt} 10 10 cm /Im1 Do Q");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im1" => image_id },
            },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).expect("save fixture");
        out
    }
}
