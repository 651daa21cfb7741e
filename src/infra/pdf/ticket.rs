//! CIP4 JDF job ticket accompanying a production PDF.

use time::format_description::well_known::Rfc3339;

use crate::{
    application::production::{JobTicket, PdfError},
    domain::{options::ColorProfile, page::mm_to_pt},
};

use super::{standard::PRODUCER, xml::XmlOut};

const JDF_NAMESPACE: &str = "http://www.CIP4.org/JDFSchema_1_1";
const JDF_VERSION: &str = "1.4";

fn points(mm: f64) -> String {
    format!("{:.2}", mm_to_pt(mm))
}

pub(crate) fn write_jdf(ticket: &JobTicket) -> Result<Vec<u8>, PdfError> {
    let created = ticket
        .created_at
        .format(&Rfc3339)
        .map_err(|err| PdfError::Serialize {
            message: format!("date: {err}"),
        })?;
    let page_count = ticket.page_count.to_string();
    let dimension = format!(
        "{} {}",
        points(ticket.trim_width_mm),
        points(ticket.trim_height_mm)
    );
    let bleed = format!("{:.2}", ticket.bleed_mm);
    let colorants: &[&str] = match ticket.color_profile {
        ColorProfile::Cmyk => &["Cyan", "Magenta", "Yellow", "Black"],
        ColorProfile::Rgb => &["Red", "Green", "Blue"],
    };
    let standard = ticket
        .pdf_standard
        .map(|standard| standard.version_label())
        .unwrap_or("none");

    let mut xml = XmlOut::new(Vec::new());
    xml.declaration()?;
    xml.open(
        "JDF",
        &[
            ("xmlns", JDF_NAMESPACE),
            ("ID", ticket.job_id.as_str()),
            ("JobID", ticket.job_id.as_str()),
            ("JobPartID", "1"),
            ("DescriptiveName", ticket.title.as_str()),
            ("Type", "Product"),
            ("Status", "Waiting"),
            ("Version", JDF_VERSION),
        ],
    )?;

    xml.open("ResourcePool", &[])?;
    xml.open(
        "RunList",
        &[
            ("ID", "RunList_1"),
            ("Class", "Parameter"),
            ("Status", "Available"),
            ("NPage", page_count.as_str()),
        ],
    )?;
    xml.open("LayoutElement", &[])?;
    xml.empty(
        "FileSpec",
        &[("MimeType", "application/pdf"), ("URL", ticket.pdf_url.as_str())],
    )?;
    xml.close("LayoutElement")?;
    xml.close("RunList")?;

    let mut media = vec![
        ("ID", "Media_1"),
        ("Class", "Consumable"),
        ("Status", "Available"),
        ("Dimension", dimension.as_str()),
        ("MediaType", "Paper"),
    ];
    if let Some(paper) = ticket.paper.as_deref() {
        media.push(("DescriptiveName", paper));
    }
    xml.empty("Media", &media)?;

    xml.open(
        "ColorantControl",
        &[
            ("ID", "ColorantControl_1"),
            ("Class", "Parameter"),
            ("Status", "Available"),
            ("ProcessColorModel", match ticket.color_profile {
                ColorProfile::Cmyk => "DeviceCMYK",
                ColorProfile::Rgb => "DeviceRGB",
            }),
        ],
    )?;
    xml.open("ColorantOrder", &[])?;
    for colorant in colorants.iter().copied() {
        xml.empty("SeparationSpec", &[("Name", colorant)])?;
    }
    xml.close("ColorantOrder")?;
    xml.close("ColorantControl")?;

    let mut binding = vec![
        ("ID", "BindingIntent_1"),
        ("Class", "Intent"),
        ("Status", "Available"),
    ];
    if let Some(kind) = ticket.binding.as_deref() {
        binding.push(("BindingType", kind));
    }
    xml.empty("BindingIntent", &binding)?;
    xml.close("ResourcePool")?;

    xml.open("ResourceLinkPool", &[])?;
    xml.empty("RunListLink", &[("rRef", "RunList_1"), ("Usage", "Input")])?;
    xml.empty("MediaLink", &[("rRef", "Media_1"), ("Usage", "Input")])?;
    xml.empty(
        "ColorantControlLink",
        &[("rRef", "ColorantControl_1"), ("Usage", "Input")],
    )?;
    xml.empty(
        "BindingIntentLink",
        &[("rRef", "BindingIntent_1"), ("Usage", "Input")],
    )?;
    xml.close("ResourceLinkPool")?;

    let mut customer = vec![("CustomerProjectID", ticket.project_id.as_str())];
    if let Some(order) = ticket.order_id.as_deref() {
        customer.push(("CustomerOrderID", order));
    }
    xml.empty("CustomerInfo", &customer)?;

    xml.empty(
        "Comment",
        &[
            ("Name", "Production"),
            ("BleedMM", bleed.as_str()),
            ("PDFStandard", standard),
        ],
    )?;

    xml.open("AuditPool", &[])?;
    xml.empty(
        "Created",
        &[
            ("AgentName", PRODUCER),
            ("TimeStamp", created.as_str()),
        ],
    )?;
    xml.close("AuditPool")?;
    xml.close("JDF")?;

    Ok(xml.into_inner())
}
