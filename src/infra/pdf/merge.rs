use bytes::Bytes;
use lopdf::{Document, Object, ObjectId, dictionary};

use crate::application::production::PdfError;

use super::{inherited, load};

/// Attributes a page may inherit from its page tree. They are copied onto the
/// page itself before the source tree is discarded.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

pub(crate) fn combine(documents: &[Bytes]) -> Result<Document, PdfError> {
    if documents.is_empty() {
        return Err(PdfError::structure("nothing to combine"));
    }

    let mut dest = Document::with_version("1.4");
    let pages_id = dest.new_object_id();
    let mut kids: Vec<ObjectId> = Vec::new();

    for (index, bytes) in documents.iter().enumerate() {
        let mut source = load(bytes).map_err(|err| match err {
            PdfError::Parse { message } => PdfError::Parse {
                message: format!("page document {}: {message}", index + 1),
            },
            other => other,
        })?;

        source.renumber_objects_with(dest.max_id + 1);
        let page_ids: Vec<ObjectId> = source.get_pages().values().copied().collect();
        for page_id in &page_ids {
            flatten_inherited(&mut source, *page_id);
        }

        if source.version > dest.version {
            dest.version = source.version.clone();
        }
        dest.max_id = dest.max_id.max(source.max_id);
        dest.objects.extend(source.objects);

        for page_id in page_ids {
            let page = dest
                .get_object_mut(page_id)
                .and_then(Object::as_dict_mut)
                .map_err(super::lopdf_err)?;
            page.set("Parent", pages_id);
            kids.push(page_id);
        }
    }

    dest.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
            "Count" => kids.len() as i64,
        }),
    );
    let catalog_id = dest.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    dest.trailer.set("Root", catalog_id);

    // Source catalogs and page-tree nodes are unreachable now.
    dest.prune_objects();
    dest.renumber_objects();
    Ok(dest)
}

fn flatten_inherited(doc: &mut Document, page_id: ObjectId) {
    let mut copied = Vec::new();
    for key in INHERITABLE {
        let on_page = doc
            .get_dictionary(page_id)
            .map(|page| page.has(key))
            .unwrap_or(true);
        if on_page {
            continue;
        }
        if let Some(value) = inherited(doc, page_id, key) {
            copied.push((key, value.clone()));
        }
    }
    if let Ok(page) = doc.get_object_mut(page_id).and_then(Object::as_dict_mut) {
        for (key, value) in copied {
            page.set(key.to_vec(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::pdf::{fixtures::page_pdf, media_box};

    #[test]
    fn combine_keeps_order_and_inherited_boxes() {
        let docs = vec![
            Bytes::from(page_pdf(300, 400, "one")),
            Bytes::from(page_pdf(500, 600, "two")),
            Bytes::from(page_pdf(700, 800, "three")),
        ];
        let combined = combine(&docs).expect("combine");
        let pages: Vec<ObjectId> = combined.get_pages().values().copied().collect();
        assert_eq!(pages.len(), 3);

        let widths: Vec<f64> = pages
            .iter()
            .map(|id| media_box(&combined, *id)[2])
            .collect();
        assert_eq!(widths, vec![300.0, 500.0, 700.0]);

        let text = String::from_utf8_lossy(
            &combined.get_page_content(pages[1]).expect("content"),
        )
        .into_owned();
        assert!(text.contains("(two)"));

        for id in &pages {
            let page = combined.get_dictionary(*id).expect("page");
            assert!(page.has(b"Resources"), "resources flattened onto page");
        }
    }

    #[test]
    fn rejects_empty_and_garbage_input() {
        assert!(matches!(combine(&[]), Err(PdfError::Structure { .. })));
        let err = combine(&[Bytes::from_static(b"not a pdf")]).expect_err("garbage");
        assert!(matches!(err, PdfError::Parse { message } if message.starts_with("page document 1")));
    }
}
