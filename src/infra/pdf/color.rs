//! Device RGB to device CMYK conversion for content streams and images.

use std::collections::HashSet;

use image::ImageFormat;
use lopdf::{
    Dictionary, Document, Object, ObjectId, Stream,
    content::{Content, Operation},
};
use tracing::{debug, warn};

use crate::application::production::PdfError;

use super::{lopdf_err, name_of, number, real, resolve};

const SOURCE: &str = "infra::pdf::color";

/// Naive under-colour removal. Good enough for proofs; the output intent
/// carries the real press characterization.
pub(crate) fn rgb_to_cmyk(r: f64, g: f64, b: f64) -> [f64; 4] {
    let (r, g, b) = (r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0));
    let k = 1.0 - r.max(g).max(b);
    if k >= 1.0 {
        return [0.0, 0.0, 0.0, 1.0];
    }
    let scale = 1.0 - k;
    [
        (1.0 - r - k) / scale,
        (1.0 - g - k) / scale,
        (1.0 - b - k) / scale,
        k,
    ]
}

fn rgb8_to_cmyk8(rgb: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgb.len() / 3 * 4);
    for pixel in rgb.chunks_exact(3) {
        let cmyk = rgb_to_cmyk(
            f64::from(pixel[0]) / 255.0,
            f64::from(pixel[1]) / 255.0,
            f64::from(pixel[2]) / 255.0,
        );
        out.extend(cmyk.iter().map(|v| (v * 255.0).round() as u8));
    }
    out
}

/// Whether a colour space object denotes three-component RGB.
pub(crate) fn is_rgb_space(doc: &Document, obj: &Object) -> bool {
    let Some(obj) = resolve(doc, obj) else {
        return false;
    };
    if let Some(name) = name_of(obj) {
        return matches!(name, "DeviceRGB" | "RGB" | "CalRGB");
    }
    let Ok(items) = obj.as_array() else {
        return false;
    };
    match items.first().and_then(name_of) {
        Some("CalRGB") => true,
        Some("ICCBased") => items
            .get(1)
            .and_then(|profile| resolve(doc, profile))
            .and_then(|profile| profile.as_stream().ok())
            .and_then(|stream| stream.dict.get(b"N").ok())
            .and_then(number)
            .is_some_and(|components| components as i64 == 3),
        _ => false,
    }
}

/// Names in a resource `ColorSpace` dictionary that resolve to RGB.
pub(crate) fn rgb_space_names(doc: &Document, resources: Option<&Dictionary>) -> HashSet<Vec<u8>> {
    resources
        .and_then(|res| res.get(b"ColorSpace").ok())
        .and_then(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_dict().ok())
        .map(|spaces| {
            spaces
                .iter()
                .filter(|(_, space)| is_rgb_space(doc, space))
                .map(|(name, _)| name.clone())
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Default)]
struct StreamColorState {
    fill_rgb: bool,
    stroke_rgb: bool,
}

fn operand_numbers(op: &Operation) -> Option<Vec<f64>> {
    op.operands.iter().map(number).collect()
}

fn cmyk_operands(values: &[f64]) -> Vec<Object> {
    rgb_to_cmyk(values[0], values[1], values[2])
        .iter()
        .map(|v| real(*v))
        .collect()
}

/// Rewrite RGB colour operators in a decoded content stream.
fn convert_operations(operations: &mut [Operation], rgb_names: &HashSet<Vec<u8>>) -> usize {
    let mut state = StreamColorState::default();
    let mut stack: Vec<(bool, bool)> = Vec::new();
    let mut rewritten = 0;

    for op in operations.iter_mut() {
        match op.operator.as_str() {
            "q" => stack.push((state.fill_rgb, state.stroke_rgb)),
            "Q" => {
                if let Some((fill, stroke)) = stack.pop() {
                    state.fill_rgb = fill;
                    state.stroke_rgb = stroke;
                }
            }
            "rg" | "RG" => {
                if let Some(values) = operand_numbers(op).filter(|v| v.len() == 3) {
                    let operator = if op.operator == "rg" { "k" } else { "K" };
                    *op = Operation::new(operator, cmyk_operands(&values));
                    rewritten += 1;
                }
            }
            "cs" | "CS" => {
                let rgb = op.operands.first().is_some_and(|space| {
                    let name = space.as_name().unwrap_or_default();
                    name == b"DeviceRGB" || rgb_names.contains(name)
                });
                if op.operator == "cs" {
                    state.fill_rgb = rgb;
                } else {
                    state.stroke_rgb = rgb;
                }
                if rgb {
                    op.operands = vec![Object::Name(b"DeviceCMYK".to_vec())];
                    rewritten += 1;
                }
            }
            "sc" | "scn" | "SC" | "SCN" => {
                let fill = op.operator.starts_with('s');
                let active = if fill { state.fill_rgb } else { state.stroke_rgb };
                if active {
                    if let Some(values) = operand_numbers(op).filter(|v| v.len() == 3) {
                        op.operands = cmyk_operands(&values);
                        rewritten += 1;
                    }
                }
            }
            _ => {}
        }
    }
    rewritten
}

fn convert_content_bytes(
    bytes: &[u8],
    rgb_names: &HashSet<Vec<u8>>,
) -> Result<Option<Vec<u8>>, PdfError> {
    let mut content = Content::decode(bytes).map_err(lopdf_err)?;
    if convert_operations(&mut content.operations, rgb_names) == 0 {
        return Ok(None);
    }
    content.encode().map(Some).map_err(lopdf_err)
}

enum ImageData {
    Raw,
    Jpeg,
}

/// Convert an 8-bit RGB image XObject in place. Returns false when the image
/// is not something this converter understands.
fn convert_image(doc: &Document, stream: &mut Stream) -> Result<bool, PdfError> {
    let Ok(space) = stream.dict.get(b"ColorSpace") else {
        return Ok(false);
    };
    if !is_rgb_space(doc, space) {
        return Ok(false);
    }
    let bits = stream
        .dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(number)
        .unwrap_or(8.0);
    if bits as i64 != 8 {
        return Ok(false);
    }

    let filters: Vec<Vec<u8>> = stream
        .filters()
        .map(|filters| filters.into_iter().map(|f| f.to_vec()).collect())
        .unwrap_or_default();
    let kind = match filters.as_slice() {
        [] => ImageData::Raw,
        [single] if single.as_slice() == b"FlateDecode" => ImageData::Raw,
        [single] if single.as_slice() == b"DCTDecode" => ImageData::Jpeg,
        _ => return Ok(false),
    };

    let rgb = match kind {
        ImageData::Raw => stream.get_plain_content().map_err(lopdf_err)?,
        ImageData::Jpeg => {
            match image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg) {
                Ok(decoded) => decoded.to_rgb8().into_raw(),
                Err(err) => {
                    debug!(target = SOURCE, op = "pdf::convert_image", error = %err, "jpeg not decodable");
                    return Ok(false);
                }
            }
        }
    };
    let width = stream.dict.get(b"Width").ok().and_then(number).unwrap_or(0.0) as usize;
    let height = stream.dict.get(b"Height").ok().and_then(number).unwrap_or(0.0) as usize;
    if rgb.len() < width * height * 3 {
        return Ok(false);
    }

    stream.set_plain_content(rgb8_to_cmyk8(&rgb[..width * height * 3]));
    stream.dict.set("ColorSpace", Object::Name(b"DeviceCMYK".to_vec()));
    stream.dict.remove(b"Decode");
    Ok(true)
}

/// Convert exponential-interpolation shading functions with RGB endpoints.
fn convert_function(function: &mut Dictionary) -> bool {
    let mut changed = false;
    for key in [b"C0".as_slice(), b"C1".as_slice()] {
        let values = function
            .get(key)
            .ok()
            .and_then(|obj| obj.as_array().ok())
            .and_then(|items| items.iter().map(number).collect::<Option<Vec<f64>>>());
        if let Some(values) = values.filter(|v| v.len() == 3) {
            function.set(key.to_vec(), Object::Array(cmyk_operands(&values)));
            changed = true;
        }
    }
    if let Ok(Object::Array(parts)) = function.get_mut(b"Functions") {
        for part in parts.iter_mut() {
            if let Object::Dictionary(part) = part {
                changed |= convert_function(part);
            }
        }
    }
    changed
}

/// Convert a shading whose colour space is RGB. Returns true when its
/// function endpoints were rewritten.
fn convert_shading(doc: &mut Document, shading: &mut Dictionary) -> bool {
    let rgb = shading
        .get(b"ColorSpace")
        .is_ok_and(|space| is_rgb_space(doc, space));
    if !rgb {
        return false;
    }
    let converted = match shading.get_mut(b"Function") {
        Ok(Object::Dictionary(function)) => convert_function(function),
        Ok(Object::Reference(function_id)) => match doc.get_object_mut(*function_id) {
            Ok(Object::Dictionary(function)) => convert_function(function),
            _ => false,
        },
        _ => false,
    };
    if converted {
        shading.set("ColorSpace", Object::Name(b"DeviceCMYK".to_vec()));
    }
    converted
}

fn resources_of(doc: &Document, owner: &Dictionary) -> Option<Dictionary> {
    owner
        .get(b"Resources")
        .ok()
        .and_then(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_dict().ok())
        .cloned()
}

/// Convert every page, form XObject, image and shading in the document.
pub(crate) fn convert_document(doc: &mut Document) -> Result<(), PdfError> {
    let mut pages = 0usize;
    let mut forms = 0usize;
    let mut images = 0usize;
    let mut skipped_images = 0usize;
    let mut shadings = 0usize;

    let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    for page_id in page_ids {
        let resources = super::inherited(doc, page_id, b"Resources")
            .and_then(|obj| resolve(doc, obj))
            .and_then(|obj| obj.as_dict().ok())
            .cloned();
        let rgb_names = rgb_space_names(doc, resources.as_ref());
        let content = doc.get_page_content(page_id).map_err(lopdf_err)?;
        if let Some(converted) = convert_content_bytes(&content, &rgb_names)? {
            let content_id = doc.add_object(Stream::new(lopdf::dictionary! {}, converted));
            let page = doc
                .get_object_mut(page_id)
                .and_then(Object::as_dict_mut)
                .map_err(lopdf_err)?;
            page.set("Contents", content_id);
            pages += 1;
        }
        retag_group(doc, page_id);
    }

    let stream_ids: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter(|(_, obj)| obj.as_stream().is_ok())
        .map(|(id, _)| *id)
        .collect();
    for id in stream_ids {
        let Some(Object::Stream(stream)) = doc.objects.get(&id) else {
            continue;
        };
        let subtype = stream.dict.get(b"Subtype").ok().and_then(name_of).unwrap_or("");
        match subtype {
            "Image" => {
                let mut stream = stream.clone();
                if convert_image(doc, &mut stream)? {
                    doc.objects.insert(id, Object::Stream(stream));
                    images += 1;
                } else if stream
                    .dict
                    .get(b"ColorSpace")
                    .is_ok_and(|space| is_rgb_space(doc, space))
                {
                    skipped_images += 1;
                }
            }
            "Form" => {
                let rgb_names = rgb_space_names(doc, resources_of(doc, &stream.dict).as_ref());
                let plain = stream.get_plain_content().map_err(lopdf_err)?;
                if let Some(converted) = convert_content_bytes(&plain, &rgb_names)? {
                    let mut stream = stream.clone();
                    stream.set_plain_content(converted);
                    doc.objects.insert(id, Object::Stream(stream));
                    forms += 1;
                }
            }
            _ => {}
        }
    }

    let shading_ids: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter(|(_, obj)| {
            obj.as_dict()
                .ok()
                .or_else(|| obj.as_stream().ok().map(|s| &s.dict))
                .is_some_and(|dict| dict.has(b"ShadingType"))
        })
        .map(|(id, _)| *id)
        .collect();
    for id in shading_ids {
        let Some(mut shading) = doc.objects.get(&id).cloned() else {
            continue;
        };
        let converted = match &mut shading {
            Object::Dictionary(dict) => convert_shading(doc, dict),
            Object::Stream(stream) => convert_shading(doc, &mut stream.dict),
            _ => false,
        };
        if converted {
            doc.objects.insert(id, shading);
            shadings += 1;
        }
    }

    if skipped_images > 0 {
        warn!(
            target = SOURCE,
            op = "pdf::convert_to_cmyk",
            skipped_images,
            "some RGB images use an encoding that cannot be converted"
        );
    }
    debug!(
        target = SOURCE,
        op = "pdf::convert_to_cmyk",
        pages,
        forms,
        images,
        shadings,
    );
    doc.prune_objects();
    Ok(())
}

/// Transparency groups blend in the page colour space; keep it consistent.
fn retag_group(doc: &mut Document, page_id: ObjectId) {
    let group_ref = doc
        .get_dictionary(page_id)
        .ok()
        .and_then(|page| page.get(b"Group").ok())
        .and_then(|group| group.as_reference().ok());
    let group = match group_ref {
        Some(id) => doc.get_object_mut(id).and_then(Object::as_dict_mut).ok(),
        None => doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .ok()
            .and_then(|page| page.get_mut(b"Group").ok())
            .and_then(|group| group.as_dict_mut().ok()),
    };
    if let Some(group) = group {
        if group.get(b"CS").ok().and_then(name_of) == Some("DeviceRGB") {
            group.set("CS", Object::Name(b"DeviceCMYK".to_vec()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::pdf::{
        fixtures::{image_pdf, page_pdf},
        load,
    };

    #[test]
    fn pure_colours_map_to_expected_separations() {
        assert_eq!(rgb_to_cmyk(0.0, 0.0, 0.0), [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(rgb_to_cmyk(1.0, 1.0, 1.0), [0.0, 0.0, 0.0, 0.0]);
        assert_eq!(rgb_to_cmyk(1.0, 0.0, 0.0), [0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn fill_operators_are_rewritten() {
        let mut doc = load(&page_pdf(200, 200, "c")).expect("fixture");
        convert_document(&mut doc).expect("convert");

        let page_id = *doc.get_pages().values().next().expect("page");
        let content = Content::decode(&doc.get_page_content(page_id).expect("content"))
            .expect("decode");
        let operators: Vec<&str> = content
            .operations
            .iter()
            .map(|op| op.operator.as_str())
            .collect();
        assert!(operators.contains(&"k"));
        assert!(!operators.contains(&"rg"));
    }

    #[test]
    fn colour_space_operators_follow_resources() {
        let names: HashSet<Vec<u8>> = [b"CS0".to_vec()].into_iter().collect();
        let mut ops = vec![
            Operation::new("cs", vec![Object::Name(b"CS0".to_vec())]),
            Operation::new(
                "sc",
                vec![Object::Integer(1), Object::Integer(0), Object::Integer(0)],
            ),
            Operation::new("CS", vec![Object::Name(b"DeviceGray".to_vec())]),
            Operation::new("SC", vec![Object::Real(0.5)]),
        ];
        assert_eq!(convert_operations(&mut ops, &names), 2);
        assert_eq!(ops[0].operands, vec![Object::Name(b"DeviceCMYK".to_vec())]);
        assert_eq!(ops[1].operands.len(), 4);
        assert_eq!(ops[3].operands.len(), 1);
    }

    #[test]
    fn raw_rgb_images_become_cmyk() {
        let mut doc = load(&image_pdf(4, 72.0)).expect("fixture");
        convert_document(&mut doc).expect("convert");

        let image = doc
            .objects
            .values()
            .filter_map(|obj| obj.as_stream().ok())
            .find(|stream| stream.dict.get(b"Subtype").ok().and_then(name_of) == Some("Image"))
            .expect("image");
        assert_eq!(
            image.dict.get(b"ColorSpace").ok().and_then(name_of),
            Some("DeviceCMYK")
        );
        assert_eq!(image.get_plain_content().expect("plain").len(), 4 * 4 * 4);
    }
}
