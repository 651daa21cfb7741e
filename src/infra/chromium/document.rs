use askama::Template as _;

use crate::application::{layout::Template, render::RenderError};

/// Script resolved once every image settled and web fonts are ready.
pub(crate) const READY_SCRIPT: &str = "Promise.all([\
    document.fonts ? document.fonts.ready : Promise.resolve(),\
    ...Array.from(document.images).map(img => img.complete ? Promise.resolve() : \
        new Promise(resolve => { img.addEventListener('load', resolve); img.addEventListener('error', resolve); }))\
]).then(() => true)";

/// Complete HTML document wrapping a layout template. Markup and style were
/// sanitized by the layout engine and are emitted verbatim.
#[derive(askama::Template)]
#[template(path = "render/document.html")]
struct DocumentShell<'a> {
    title: &'a str,
    css_width: u32,
    style: &'a str,
    markup: &'a str,
}

pub(crate) fn render_document(template: &Template) -> Result<String, RenderError> {
    DocumentShell {
        title: "pressroom",
        css_width: template.css_width,
        style: &template.style,
        markup: &template.markup,
    }
    .render()
    .map_err(|err| RenderError::Document {
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        application::layout::build_template,
        domain::{options::RenderOptions, page::Page},
    };

    #[test]
    fn shell_embeds_style_and_markup() {
        let page = Page {
            id: "p".into(),
            width_mm: 100.0,
            height_mm: 50.0,
            background: "#123456".into(),
            elements: Vec::new(),
        };
        let template = build_template(&page, &RenderOptions::default());
        let html = render_document(&template).expect("document");

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("background:#123456;"));
        assert!(html.contains("<div id=\"page\"></div>"));
        assert!(html.contains("width=378"));
    }
}
