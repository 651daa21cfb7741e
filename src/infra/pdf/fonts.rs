//! Font library and embedding of fonts the renderer left as references.

use std::{
    collections::HashMap,
    fmt,
    fs,
    path::Path,
    sync::Arc,
};

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use tracing::{debug, info, warn};
use ttf_parser::{Face, name::name_id};

use crate::application::production::PdfError;

use super::{lopdf_err, name_of, resolve};

const SOURCE: &str = "infra::pdf::fonts";
const FIRST_CHAR: u8 = 32;
const LAST_CHAR: u8 = 255;

const FLAG_FIXED_PITCH: i64 = 1;
const FLAG_NONSYMBOLIC: i64 = 32;
const FLAG_ITALIC: i64 = 64;

/// Metrics and program bytes of one font file, scaled to the 1000-unit glyph space.
#[derive(Clone)]
pub struct FontFace {
    pub postscript_name: String,
    data: Arc<Vec<u8>>,
    cff: bool,
    ascent: i64,
    descent: i64,
    cap_height: i64,
    bbox: [i64; 4],
    italic_angle: f64,
    italic: bool,
    monospaced: bool,
    widths: Vec<i64>,
}

impl fmt::Debug for FontFace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontFace")
            .field("postscript_name", &self.postscript_name)
            .field("bytes", &self.data.len())
            .field("cff", &self.cff)
            .finish()
    }
}

impl FontFace {
    fn parse(data: Vec<u8>, source: &str) -> Result<(Self, Vec<String>), PdfError> {
        let face = Face::parse(&data, 0).map_err(|err| PdfError::Font {
            message: format!("{source}: {err}"),
        })?;

        let mut postscript = None;
        let mut aliases = Vec::new();
        for entry in face.names() {
            let Some(name) = entry.to_string() else {
                continue;
            };
            match entry.name_id {
                name_id::POST_SCRIPT_NAME if postscript.is_none() => postscript = Some(name),
                name_id::FULL_NAME => aliases.push(name),
                name_id::FAMILY | name_id::TYPOGRAPHIC_FAMILY
                    if !face.is_bold() && !face.is_italic() =>
                {
                    aliases.push(name)
                }
                _ => {}
            }
        }
        let postscript_name = postscript.unwrap_or_else(|| {
            Path::new(source)
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("Font")
                .to_string()
        });

        let scale = 1000.0 / f64::from(face.units_per_em().max(1));
        let scaled = |value: i16| (f64::from(value) * scale).round() as i64;
        let bbox = face.global_bounding_box();
        let widths = (FIRST_CHAR..=LAST_CHAR)
            .map(|code| {
                face.glyph_index(char::from(code))
                    .and_then(|glyph| face.glyph_hor_advance(glyph))
                    .map(|advance| (f64::from(advance) * scale).round() as i64)
                    .unwrap_or(0)
            })
            .collect();

        let parsed = Self {
            postscript_name,
            cff: face.tables().cff.is_some(),
            ascent: scaled(face.ascender()),
            descent: scaled(face.descender()),
            cap_height: face
                .capital_height()
                .map(scaled)
                .unwrap_or_else(|| scaled(face.ascender())),
            bbox: [
                scaled(bbox.x_min),
                scaled(bbox.y_min),
                scaled(bbox.x_max),
                scaled(bbox.y_max),
            ],
            italic_angle: face.italic_angle().map(f64::from).unwrap_or(0.0),
            italic: face.is_italic(),
            monospaced: face.is_monospaced(),
            widths,
            data: Arc::new(Vec::new()),
        };
        Ok((
            Self {
                data: Arc::new(data),
                ..parsed
            },
            aliases,
        ))
    }

    fn flags(&self) -> i64 {
        let mut flags = FLAG_NONSYMBOLIC;
        if self.monospaced {
            flags |= FLAG_FIXED_PITCH;
        }
        if self.italic {
            flags |= FLAG_ITALIC;
        }
        flags
    }

    fn descriptor(&self, font_name: &str) -> Dictionary {
        dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => Object::Name(font_name.as_bytes().to_vec()),
            "Flags" => self.flags(),
            "FontBBox" => self.bbox.iter().map(|v| Object::Integer(*v)).collect::<Vec<_>>(),
            "ItalicAngle" => Object::Real(self.italic_angle as f32),
            "Ascent" => self.ascent,
            "Descent" => self.descent,
            "CapHeight" => self.cap_height,
            "StemV" => 80,
        }
    }

    /// Program stream plus the descriptor key it belongs under.
    fn program(&self) -> (&'static str, Stream) {
        let bytes = self.data.as_ref().clone();
        if self.cff {
            (
                "FontFile3",
                Stream::new(dictionary! { "Subtype" => "OpenType" }, bytes),
            )
        } else {
            let length = bytes.len() as i64;
            ("FontFile2", Stream::new(dictionary! { "Length1" => length }, bytes))
        }
    }
}

/// Fonts available for embedding, addressed by normalized PostScript, full
/// and family names.
#[derive(Debug, Clone, Default)]
pub struct FontLibrary {
    faces: Vec<FontFace>,
    lookup: HashMap<String, usize>,
}

impl FontLibrary {
    /// Load every `.ttf` and `.otf` below `dir`. Unreadable files are skipped.
    pub fn load_dir(dir: &Path) -> std::io::Result<Self> {
        let mut library = Self::default();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            for entry in fs::read_dir(&current)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let is_font = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("ttf") || ext.eq_ignore_ascii_case("otf"))
                    .unwrap_or(false);
                if !is_font {
                    continue;
                }
                let source = path.display().to_string();
                let registered = fs::read(&path)
                    .map_err(|err| PdfError::Font {
                        message: format!("{source}: {err}"),
                    })
                    .and_then(|data| library.register_bytes(data, &source));
                if let Err(err) = registered {
                    warn!(target = SOURCE, op = "fonts::load", path = %source, error = %err, "skipping font file");
                }
            }
        }
        info!(
            target = SOURCE,
            op = "fonts::load",
            dir = %dir.display(),
            faces = library.faces.len(),
            "font library loaded"
        );
        Ok(library)
    }

    pub fn register_bytes(&mut self, data: Vec<u8>, source: &str) -> Result<(), PdfError> {
        let (face, aliases) = FontFace::parse(data, source)?;
        self.insert(face, aliases);
        Ok(())
    }

    fn insert(&mut self, face: FontFace, aliases: Vec<String>) {
        let index = self.faces.len();
        let keys: Vec<String> = std::iter::once(face.postscript_name.clone())
            .chain(aliases)
            .map(|name| normalize_font_name(&name))
            .filter(|key| !key.is_empty())
            .collect();
        self.faces.push(face);
        for key in keys {
            self.lookup.entry(key).or_insert(index);
        }
    }

    pub fn lookup(&self, base_font: &str) -> Option<&FontFace> {
        self.lookup
            .get(&normalize_font_name(base_font))
            .and_then(|index| self.faces.get(*index))
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

/// `ABCDEF+Open Sans-Bold` and `OpenSans-Bold` both become `opensansbold`.
pub(crate) fn normalize_font_name(name: &str) -> String {
    let trimmed = name.trim();
    let without_subset = match trimmed.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.bytes().all(|b| b.is_ascii_uppercase()) => rest,
        _ => trimmed,
    };
    without_subset
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

const FONT_FILE_KEYS: [&[u8]; 3] = [b"FontFile", b"FontFile2", b"FontFile3"];

fn descriptor_embeds(doc: &Document, font: &Dictionary) -> bool {
    font.get(b"FontDescriptor")
        .ok()
        .and_then(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_dict().ok())
        .is_some_and(|descriptor| FONT_FILE_KEYS.iter().any(|key| descriptor.has(key)))
}

/// The dictionary that carries the font descriptor: the font itself, or the
/// descendant of a composite font.
pub(crate) fn descriptor_owner(doc: &Document, font: &Dictionary) -> Option<ObjectId> {
    let descendant = font
        .get(b"DescendantFonts")
        .ok()
        .and_then(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_array().ok())
        .and_then(|items| items.first())?;
    descendant.as_reference().ok()
}

/// Whether a font dictionary has its program embedded.
pub(crate) fn is_embedded(doc: &Document, font: &Dictionary) -> bool {
    match font.get(b"Subtype").ok().and_then(name_of) {
        // Glyphs are content streams inside the font.
        Some("Type3") => true,
        Some("Type0") => descriptor_owner(doc, font)
            .and_then(|id| doc.get_dictionary(id).ok())
            .is_some_and(|descendant| descriptor_embeds(doc, descendant)),
        _ => descriptor_embeds(doc, font),
    }
}

pub(crate) fn font_ids(doc: &Document) -> Vec<ObjectId> {
    doc.objects
        .iter()
        .filter(|(_, obj)| {
            obj.as_dict().is_ok_and(|dict| {
                dict.get(b"Type").ok().and_then(name_of) == Some("Font")
                    && !matches!(
                        dict.get(b"Subtype").ok().and_then(name_of),
                        Some("CIDFontType0") | Some("CIDFontType2")
                    )
            })
        })
        .map(|(id, _)| *id)
        .collect()
}

pub(crate) fn base_font(font: &Dictionary) -> String {
    font.get(b"BaseFont")
        .ok()
        .and_then(name_of)
        .unwrap_or("unnamed")
        .to_string()
}

/// Embed programs for every font that lacks one and can be found in `library`.
pub(crate) fn embed_missing(doc: &mut Document, library: &FontLibrary) -> Result<(), PdfError> {
    let mut embedded = 0usize;
    let mut missing = Vec::new();

    for font_id in font_ids(doc) {
        let font = doc.get_dictionary(font_id).map_err(lopdf_err)?.clone();
        if is_embedded(doc, &font) {
            continue;
        }
        let name = base_font(&font);
        let Some(face) = library.lookup(&name) else {
            missing.push(name);
            continue;
        };

        let composite = font.get(b"Subtype").ok().and_then(name_of) == Some("Type0");
        let target_id = if composite {
            match descriptor_owner(doc, &font) {
                Some(id) => id,
                None => {
                    missing.push(name);
                    continue;
                }
            }
        } else {
            font_id
        };
        embed_face(doc, target_id, &name, face, !composite)?;
        embedded += 1;
    }

    if !missing.is_empty() {
        warn!(
            target = SOURCE,
            op = "fonts::embed",
            missing = ?missing,
            "fonts not found in the library stay unembedded"
        );
    }
    debug!(target = SOURCE, op = "fonts::embed", embedded, library = library.len());
    Ok(())
}

fn embed_face(
    doc: &mut Document,
    target_id: ObjectId,
    name: &str,
    face: &FontFace,
    simple: bool,
) -> Result<(), PdfError> {
    let (key, program) = face.program();
    let program_id = doc.add_object(program);

    let existing = doc
        .get_dictionary(target_id)
        .map_err(lopdf_err)?
        .get(b"FontDescriptor")
        .and_then(Object::as_reference)
        .ok();

    match existing {
        Some(descriptor_id) => {
            let descriptor = doc
                .get_object_mut(descriptor_id)
                .and_then(Object::as_dict_mut)
                .map_err(lopdf_err)?;
            descriptor.set(key, program_id);
        }
        None => {
            let mut descriptor = face.descriptor(name);
            descriptor.set(key, program_id);
            let descriptor_id = doc.add_object(descriptor);
            let target = doc
                .get_object_mut(target_id)
                .and_then(Object::as_dict_mut)
                .map_err(lopdf_err)?;
            target.set("FontDescriptor", descriptor_id);
            if simple {
                // A standard-14 reference becomes a real simple font.
                if !face.cff {
                    target.set("Subtype", Object::Name(b"TrueType".to_vec()));
                }
                if !target.has(b"Encoding") {
                    target.set("Encoding", Object::Name(b"WinAnsiEncoding".to_vec()));
                }
                target.set("FirstChar", i64::from(FIRST_CHAR));
                target.set("LastChar", i64::from(LAST_CHAR));
                target.set(
                    "Widths",
                    face.widths
                        .iter()
                        .map(|w| Object::Integer(*w))
                        .collect::<Vec<_>>(),
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::pdf::{fixtures::page_pdf, load};

    fn fake_face(name: &str) -> FontFace {
        FontFace {
            postscript_name: name.to_string(),
            data: Arc::new(vec![0u8; 64]),
            cff: false,
            ascent: 718,
            descent: -207,
            cap_height: 718,
            bbox: [-166, -225, 1000, 931],
            italic_angle: 0.0,
            italic: false,
            monospaced: false,
            widths: vec![500; usize::from(LAST_CHAR - FIRST_CHAR) + 1],
        }
    }

    #[test]
    fn names_normalize_across_subset_tags_and_punctuation() {
        assert_eq!(normalize_font_name("ABCDEF+Open Sans-Bold"), "opensansbold");
        assert_eq!(normalize_font_name("OpenSans-Bold"), "opensansbold");
        assert_eq!(normalize_font_name("abc+Thing"), "abcthing");
    }

    #[test]
    fn standard_font_reference_is_embedded_from_library() {
        let mut doc = load(&page_pdf(200, 200, "f")).expect("fixture");
        let font_id = font_ids(&doc)[0];
        assert!(!is_embedded(&doc, doc.get_dictionary(font_id).expect("font")));

        let mut library = FontLibrary::default();
        library.insert(fake_face("Helvetica"), Vec::new());
        embed_missing(&mut doc, &library).expect("embed");

        let font = doc.get_dictionary(font_id).expect("font");
        assert!(is_embedded(&doc, font));
        assert_eq!(font.get(b"Subtype").ok().and_then(name_of), Some("TrueType"));
        assert_eq!(
            font.get(b"Widths").and_then(Object::as_array).expect("widths").len(),
            224
        );
    }

    #[test]
    fn unknown_fonts_are_left_alone() {
        let mut doc = load(&page_pdf(200, 200, "f")).expect("fixture");
        embed_missing(&mut doc, &FontLibrary::default()).expect("embed");
        let font_id = font_ids(&doc)[0];
        assert!(!is_embedded(&doc, doc.get_dictionary(font_id).expect("font")));
    }

    #[test]
    fn garbage_font_bytes_are_rejected() {
        let mut library = FontLibrary::default();
        assert!(matches!(
            library.register_bytes(b"nope".to_vec(), "nope.ttf"),
            Err(PdfError::Font { .. })
        ));
        assert!(library.is_empty());
    }
}
