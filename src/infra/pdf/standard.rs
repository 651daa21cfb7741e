//! PDF/X conformance markers: output intent, info keys, boxes and XMP.

use lopdf::{Document, Object, ObjectId, Stream, StringFormat, dictionary};
use sha2::{Digest, Sha256};
use time::{OffsetDateTime, format_description::well_known::Rfc3339, macros::format_description};
use uuid::Uuid;

use crate::{
    application::production::{DocumentInfo, PdfError},
    domain::options::PdfStandard,
};

use super::{lopdf_err, media_box, rect, rect_object, xml::XmlOut};

pub(crate) const PRODUCER: &str = "pressroom";
pub(crate) const OUTPUT_CONDITION_ID: &str = "FOGRA39";
pub(crate) const OUTPUT_CONDITION: &str = "Coated FOGRA39 (ISO 12647-2:2004)";
pub(crate) const REGISTRY_NAME: &str = "http://www.color.org";

const XPACKET_BEGIN: &str = "<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n";
const XPACKET_END: &str = "\n<?xpacket end=\"w\"?>";

pub(crate) fn apply(
    doc: &mut Document,
    standard: PdfStandard,
    info: &DocumentInfo,
) -> Result<(), PdfError> {
    doc.version = standard.pdf_version().to_string();

    let info_id = write_info(doc, standard, info)?;
    doc.trailer.set("Info", info_id);
    doc.trailer.set("ID", document_id(info));

    let intent_id = doc.add_object(dictionary! {
        "Type" => "OutputIntent",
        "S" => "GTS_PDFX",
        "OutputConditionIdentifier" => Object::string_literal(OUTPUT_CONDITION_ID),
        "OutputCondition" => Object::string_literal(OUTPUT_CONDITION),
        "RegistryName" => Object::string_literal(REGISTRY_NAME),
        "Info" => Object::string_literal(OUTPUT_CONDITION),
    });

    let xmp = xmp_packet(standard, info)?;
    let mut metadata = Stream::new(
        dictionary! {
            "Type" => "Metadata",
            "Subtype" => "XML",
        },
        xmp,
    );
    metadata.allows_compression = false;
    let metadata_id = doc.add_object(metadata);

    let catalog = doc.catalog_mut().map_err(lopdf_err)?;
    catalog.set("OutputIntents", vec![Object::Reference(intent_id)]);
    catalog.set("Metadata", metadata_id);

    ensure_trim_boxes(doc)?;
    Ok(())
}

fn write_info(
    doc: &mut Document,
    standard: PdfStandard,
    info: &DocumentInfo,
) -> Result<ObjectId, PdfError> {
    let stamp = pdf_date(info.created_at)?;
    let mut dict = doc
        .trailer
        .get(b"Info")
        .and_then(Object::as_reference)
        .and_then(|id| doc.get_dictionary(id))
        .cloned()
        .unwrap_or_default();

    dict.set("Title", Object::string_literal(info.title.as_str()));
    dict.set("Producer", Object::string_literal(PRODUCER));
    dict.set("Creator", Object::string_literal(PRODUCER));
    dict.set("CreationDate", Object::string_literal(stamp.as_str()));
    dict.set("ModDate", Object::string_literal(stamp.as_str()));
    dict.set("Trapped", Object::Name(b"False".to_vec()));
    dict.set(
        "GTS_PDFXVersion",
        Object::string_literal(standard.version_label()),
    );
    if standard == PdfStandard::PdfX1a {
        dict.set(
            "GTS_PDFXConformance",
            Object::string_literal(standard.version_label()),
        );
    }
    Ok(doc.add_object(dict))
}

fn ensure_trim_boxes(doc: &mut Document) -> Result<(), PdfError> {
    let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    for page_id in page_ids {
        let has_trim = doc
            .get_dictionary(page_id)
            .map_err(lopdf_err)?
            .get(b"TrimBox")
            .ok()
            .and_then(|obj| rect(doc, obj))
            .is_some();
        if has_trim {
            continue;
        }
        let media = media_box(doc, page_id);
        let page = doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)
            .map_err(lopdf_err)?;
        page.set("TrimBox", rect_object(media));
    }
    Ok(())
}

fn document_id(info: &DocumentInfo) -> Object {
    let mut hasher = Sha256::new();
    hasher.update(info.title.as_bytes());
    hasher.update(info.created_at.unix_timestamp_nanos().to_be_bytes());
    let digest = hasher.finalize();
    let id = Object::String(digest[..16].to_vec(), StringFormat::Hexadecimal);
    Object::Array(vec![id.clone(), id])
}

fn pdf_date(at: OffsetDateTime) -> Result<String, PdfError> {
    at.to_offset(time::UtcOffset::UTC)
        .format(format_description!(
            "D:[year][month][day][hour][minute][second]Z"
        ))
        .map_err(|err| PdfError::Serialize {
            message: format!("date: {err}"),
        })
}

fn xmp_packet(standard: PdfStandard, info: &DocumentInfo) -> Result<Vec<u8>, PdfError> {
    let created = info.created_at.format(&Rfc3339).map_err(|err| PdfError::Serialize {
        message: format!("date: {err}"),
    })?;
    let document_id = format!("uuid:{}", Uuid::new_v4());
    let instance_id = format!("uuid:{}", Uuid::new_v4());
    // X-4 moved its version key into its own namespace.
    let (pdfx_prefix, pdfx_ns) = match standard {
        PdfStandard::PdfX4 => ("xmlns:pdfxid", "http://www.npes.org/pdfx/ns/id/"),
        PdfStandard::PdfX1a | PdfStandard::PdfX3 => ("xmlns:pdfx", "http://ns.adobe.com/pdfx/1.3/"),
    };
    let version_key = match standard {
        PdfStandard::PdfX4 => "pdfxid:GTS_PDFXVersion",
        PdfStandard::PdfX1a | PdfStandard::PdfX3 => "pdfx:GTS_PDFXVersion",
    };

    let mut buffer = XPACKET_BEGIN.as_bytes().to_vec();
    let mut xml = XmlOut::new(&mut buffer);
    xml.open("x:xmpmeta", &[("xmlns:x", "adobe:ns:meta/")])?;
    xml.open(
        "rdf:RDF",
        &[("xmlns:rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#")],
    )?;
    xml.open(
        "rdf:Description",
        &[
            ("rdf:about", ""),
            ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
            ("xmlns:xmp", "http://ns.adobe.com/xap/1.0/"),
            ("xmlns:pdf", "http://ns.adobe.com/pdf/1.3/"),
            ("xmlns:xmpMM", "http://ns.adobe.com/xap/1.0/mm/"),
            (pdfx_prefix, pdfx_ns),
        ],
    )?;
    xml.leaf("dc:format", &[], "application/pdf")?;
    xml.open("dc:title", &[])?;
    xml.open("rdf:Alt", &[])?;
    xml.leaf("rdf:li", &[("xml:lang", "x-default")], &info.title)?;
    xml.close("rdf:Alt")?;
    xml.close("dc:title")?;
    xml.leaf("xmp:CreateDate", &[], &created)?;
    xml.leaf("xmp:ModifyDate", &[], &created)?;
    xml.leaf("xmp:MetadataDate", &[], &created)?;
    xml.leaf("xmp:CreatorTool", &[], PRODUCER)?;
    xml.leaf("pdf:Producer", &[], PRODUCER)?;
    xml.leaf("pdf:Trapped", &[], "False")?;
    xml.leaf("xmpMM:DocumentID", &[], &document_id)?;
    xml.leaf("xmpMM:InstanceID", &[], &instance_id)?;
    xml.leaf(version_key, &[], standard.version_label())?;
    xml.close("rdf:Description")?;
    xml.close("rdf:RDF")?;
    xml.close("x:xmpmeta")?;
    drop(xml);
    buffer.extend_from_slice(XPACKET_END.as_bytes());
    Ok(buffer)
}
