//! Page layout: turns a [`Page`] into markup and style for the headless engine.
//!
//! The document is laid out in CSS pixels (96 per inch) and the renderer
//! applies a device scale factor of `dpi / 96`, so the rasterized output lands
//! on `round(mm * dpi / 25.4)` device pixels per axis. Building a template is
//! pure and never fails: elements that cannot be drawn become dashed
//! placeholders and are counted in [`Template::placeholders`].

mod css;
mod elements;

use std::fmt::Write as _;

use crate::domain::{
    options::RenderOptions,
    page::{CSS_DPI, Page, mm_to_css_px, mm_to_px},
};

pub use css::sanitize_color;

use self::{
    css::px,
    elements::{ElementFragment, render_element},
};

/// Inset of the safe-area guide from the trim edge.
pub const SAFE_AREA_MM: f64 = 5.0;
/// Outset of the bleed guide beyond the trim edge.
pub const GUIDE_BLEED_MM: f64 = 3.0;

const FALLBACK_BACKGROUND: &str = "#ffffff";

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub markup: String,
    pub style: String,
    pub width_mm: f64,
    pub height_mm: f64,
    pub css_width: u32,
    pub css_height: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub dpi: u32,
    pub placeholders: usize,
}

impl Template {
    pub fn device_scale_factor(&self) -> f64 {
        f64::from(self.dpi) / CSS_DPI
    }
}

pub fn build_template(page: &Page, options: &RenderOptions) -> Template {
    let css_width = css_extent(page.width_mm);
    let css_height = css_extent(page.height_mm);
    let background = options
        .background
        .as_deref()
        .and_then(sanitize_color)
        .or_else(|| sanitize_color(&page.background))
        .unwrap_or_else(|| FALLBACK_BACKGROUND.to_string());

    let mut style = format!(
        "@page{{size:{w} {h};margin:0;}}\
         html,body{{margin:0;padding:0;width:{w};height:{h};}}\
         #page{{position:relative;width:{w};height:{h};overflow:hidden;background:{background};}}\
         .el{{position:absolute;box-sizing:border-box;margin:0;transform-origin:center center;}}\
         img.el{{display:block;}}",
        w = px(f64::from(css_width)),
        h = px(f64::from(css_height)),
    );
    let mut markup = String::from("<div id=\"page\">");
    let mut placeholders = 0;

    for (index, element) in page.paint_order().into_iter().enumerate() {
        let ElementFragment {
            markup: element_markup,
            style: element_style,
            placeholder,
        } = render_element(index, element);
        if let Some(reason) = placeholder {
            placeholders += 1;
            tracing::debug!(
                target = "pressroom::application::layout",
                page_id = %page.id,
                element = element.kind.label(),
                reason,
                "element replaced by placeholder"
            );
        }
        markup.push_str(&element_markup);
        style.push_str(&element_style);
    }

    if options.include_guides {
        append_guides(&mut markup, &mut style);
    }
    markup.push_str("</div>");

    Template {
        markup,
        style,
        width_mm: page.width_mm,
        height_mm: page.height_mm,
        css_width,
        css_height,
        pixel_width: mm_to_px(page.width_mm, options.dpi),
        pixel_height: mm_to_px(page.height_mm, options.dpi),
        dpi: options.dpi,
        placeholders,
    }
}

fn css_extent(mm: f64) -> u32 {
    let value = mm_to_css_px(mm).round();
    if value.is_finite() && value >= 1.0 {
        value.min(f64::from(u32::MAX)) as u32
    } else {
        1
    }
}

fn append_guides(markup: &mut String, style: &mut String) {
    let safe = px(mm_to_css_px(SAFE_AREA_MM));
    let bleed = px(-mm_to_css_px(GUIDE_BLEED_MM));
    let _ = write!(
        style,
        ".guide{{position:absolute;box-sizing:border-box;pointer-events:none;z-index:2147483647;}}\
         .guide-safe{{left:{safe};top:{safe};right:{safe};bottom:{safe};border:1px dashed rgba(0,122,255,0.8);}}\
         .guide-bleed{{left:{bleed};top:{bleed};right:{bleed};bottom:{bleed};border:1px solid rgba(255,0,0,0.6);}}\
         @media print{{.guide{{display:none;}}}}"
    );
    markup.push_str("<div class=\"guide guide-safe\"></div><div class=\"guide guide-bleed\"></div>");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::page::{Element, ElementKind, Frame, ShapeKind, ShapeSpec};

    fn a4() -> Page {
        Page {
            id: "cover".into(),
            width_mm: 210.0,
            height_mm: 297.0,
            background: "#fafafa".into(),
            elements: vec![Element {
                frame: Frame {
                    x_mm: 10.0,
                    y_mm: 10.0,
                    width_mm: 50.0,
                    height_mm: 50.0,
                    rotation_deg: 15.0,
                    z_index: 0,
                },
                kind: ElementKind::Shape(ShapeSpec {
                    kind: ShapeKind::Rectangle,
                    fill: Some("#333".into()),
                    stroke: None,
                    stroke_width_mm: 0.0,
                    corner_radius_mm: 0.0,
                }),
            }],
        }
    }

    #[test]
    fn a4_at_150_dpi_targets_expected_pixels() {
        let template = build_template(&a4(), &RenderOptions::default());
        assert_eq!((template.pixel_width, template.pixel_height), (1240, 1754));
        assert_eq!((template.css_width, template.css_height), (794, 1123));
        assert!((template.device_scale_factor() - 1.5625).abs() < f64::EPSILON);
    }

    #[test]
    fn build_is_deterministic() {
        let options = RenderOptions::default();
        assert_eq!(build_template(&a4(), &options), build_template(&a4(), &options));
    }

    #[test]
    fn background_override_wins_when_valid() {
        let mut options = RenderOptions::default();
        options.background = Some("#000000".into());
        assert!(build_template(&a4(), &options).style.contains("background:#000000;"));

        options.background = Some("url(evil)".into());
        assert!(build_template(&a4(), &options).style.contains("background:#fafafa;"));
    }

    #[test]
    fn guides_only_when_requested() {
        let mut options = RenderOptions::default();
        assert!(!build_template(&a4(), &options).markup.contains("guide-safe"));

        options.include_guides = true;
        let template = build_template(&a4(), &options);
        assert!(template.markup.contains("guide-safe"));
        assert!(template.markup.contains("guide-bleed"));
        assert!(template.style.contains("@media print"));
    }

    #[test]
    fn rotation_is_carried_into_css() {
        let template = build_template(&a4(), &RenderOptions::default());
        assert!(template.style.contains("transform:rotate(15deg);"));
        assert_eq!(template.placeholders, 0);
    }
}
