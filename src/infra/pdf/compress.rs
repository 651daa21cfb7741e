use std::io::Write as _;

use flate2::{Compression, write::ZlibEncoder};
use lopdf::{Document, Object};
use tracing::debug;

use crate::application::production::PdfError;

use super::name_of;

const SOURCE: &str = "infra::pdf::compress";

/// Map the 50..=100 quality-style knob onto zlib levels 1..=9.
pub(crate) fn flate_level(compression: u8) -> u32 {
    let above_floor = u32::from(compression.saturating_sub(50));
    (above_floor * 9 / 50).clamp(1, 9)
}

/// Flate-encode every stream that carries no filter yet. XMP metadata stays
/// plain so prepress tools can read it without decoding.
pub(crate) fn compress_streams(doc: &mut Document, compression: u8) -> Result<(), PdfError> {
    let level = Compression::new(flate_level(compression));
    let mut compressed = 0usize;
    let mut saved = 0i64;

    for object in doc.objects.values_mut() {
        let Object::Stream(stream) = object else {
            continue;
        };
        if !stream.allows_compression || stream.dict.has(b"Filter") {
            continue;
        }
        if stream.dict.get(b"Type").ok().and_then(name_of) == Some("Metadata") {
            continue;
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), level);
        encoder
            .write_all(&stream.content)
            .map_err(|err| PdfError::Serialize {
                message: format!("flate: {err}"),
            })?;
        let encoded = encoder.finish().map_err(|err| PdfError::Serialize {
            message: format!("flate: {err}"),
        })?;
        if encoded.len() >= stream.content.len() {
            continue;
        }
        saved += stream.content.len() as i64 - encoded.len() as i64;
        stream.dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
        stream.set_content(encoded);
        compressed += 1;
    }

    debug!(
        target = SOURCE,
        op = "compress",
        level = level.level(),
        compressed,
        saved_bytes = saved
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::pdf::{fixtures::image_pdf, load};

    #[test]
    fn compression_knob_maps_to_levels() {
        assert_eq!(flate_level(50), 1);
        assert_eq!(flate_level(75), 4);
        assert_eq!(flate_level(100), 9);
        assert_eq!(flate_level(0), 1);
    }

    #[test]
    fn image_stream_is_flate_encoded_and_decodes_back() {
        let mut doc = load(&image_pdf(16, 72.0)).expect("fixture");
        compress_streams(&mut doc, 85).expect("compress");

        let image = doc
            .objects
            .values()
            .filter_map(|obj| obj.as_stream().ok())
            .find(|stream| stream.dict.get(b"Subtype").ok().and_then(name_of) == Some("Image"))
            .expect("image stream");
        assert_eq!(image.dict.get(b"Filter").ok().and_then(name_of), Some("FlateDecode"));
        assert!(image.content.len() < 16 * 16 * 3);
        assert_eq!(image.get_plain_content().expect("inflate").len(), 16 * 16 * 3);
    }
}
