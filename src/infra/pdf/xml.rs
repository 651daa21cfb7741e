//! Small element-oriented wrapper over the quick-xml writer.

use std::io::Write;

use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};

use crate::application::production::PdfError;

fn xml_err(err: impl std::fmt::Display) -> PdfError {
    PdfError::Serialize {
        message: format!("xml: {err}"),
    }
}

pub(crate) struct XmlOut<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> XmlOut<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self {
            writer: Writer::new_with_indent(inner, b' ', 2),
        }
    }

    pub(crate) fn declaration(&mut self) -> Result<(), PdfError> {
        self.emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    }

    pub(crate) fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), PdfError> {
        let element = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.emit(Event::Start(element))
    }

    pub(crate) fn close(&mut self, name: &str) -> Result<(), PdfError> {
        self.emit(Event::End(BytesEnd::new(name)))
    }

    pub(crate) fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), PdfError> {
        let element = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.emit(Event::Empty(element))
    }

    /// `<name attrs>text</name>` with the text escaped.
    pub(crate) fn leaf(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
        text: &str,
    ) -> Result<(), PdfError> {
        self.open(name, attrs)?;
        self.emit(Event::Text(BytesText::new(text)))?;
        self.close(name)
    }

    pub(crate) fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn emit(&mut self, event: Event<'_>) -> Result<(), PdfError> {
        self.writer.write_event(event).map_err(xml_err)
    }
}
