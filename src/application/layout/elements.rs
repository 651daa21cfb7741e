use std::fmt::Write as _;

use crate::domain::page::{
    Element, ElementKind, Frame, ImageFilters, ImageSpec, ShapeKind, ShapeSpec, TextSpec,
    mm_to_css_px,
};

use super::css::{escape, number, px, sanitize_color, sanitize_font_family, sanitize_image_source};

/// Markup and style produced for a single element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ElementFragment {
    pub markup: String,
    pub style: String,
    pub placeholder: Option<&'static str>,
}

const PLACEHOLDER_FALLBACK_MM: f64 = 10.0;

pub(crate) fn render_element(index: usize, element: &Element) -> ElementFragment {
    if !element.frame.is_well_formed() {
        return placeholder(index, &element.frame, "invalid_geometry");
    }

    match &element.kind {
        ElementKind::Text(spec) => render_text(index, &element.frame, spec),
        ElementKind::Image(spec) => render_image(index, &element.frame, spec),
        ElementKind::Shape(spec) => render_shape(index, &element.frame, spec),
    }
}

fn class_name(index: usize) -> String {
    format!("el-{index}")
}

fn frame_declarations(frame: &Frame) -> String {
    let mut css = format!(
        "left:{};top:{};width:{};height:{};z-index:{};",
        px(mm_to_css_px(frame.x_mm)),
        px(mm_to_css_px(frame.y_mm)),
        px(mm_to_css_px(frame.width_mm)),
        px(mm_to_css_px(frame.height_mm)),
        frame.z_index,
    );
    if frame.rotation_deg != 0.0 {
        let _ = write!(css, "transform:rotate({}deg);", number(frame.rotation_deg));
    }
    css
}

fn render_text(index: usize, frame: &Frame, spec: &TextSpec) -> ElementFragment {
    let Some(color) = sanitize_color(&spec.color) else {
        return placeholder(index, frame, "invalid_color");
    };
    let size_ok = spec.font_size_pt.is_finite() && spec.font_size_pt > 0.0;
    let line_height_ok = spec.line_height.is_finite() && spec.line_height > 0.0;
    if !size_ok || !line_height_ok {
        return placeholder(index, frame, "invalid_typography");
    }

    let family = sanitize_font_family(&spec.font_family)
        .map(|family| format!("{family}, sans-serif"))
        .unwrap_or_else(|| "sans-serif".to_string());
    let justify = match spec.align.as_css() {
        "center" => "center",
        "right" => "flex-end",
        _ => "flex-start",
    };

    let class = class_name(index);
    let style = format!(
        ".{class}{{{frame}display:flex;align-items:center;justify-content:{justify};\
         font-family:{family};font-size:{size}pt;color:{color};text-align:{align};\
         font-weight:{weight};font-style:{style};line-height:{line_height};\
         white-space:pre-wrap;overflow-wrap:break-word;}}",
        frame = frame_declarations(frame),
        size = number(spec.font_size_pt),
        align = spec.align.as_css(),
        weight = if spec.bold { "700" } else { "400" },
        style = if spec.italic { "italic" } else { "normal" },
        line_height = number(spec.line_height),
    );
    let markup = format!(
        "<div class=\"el el-text {class}\"><span>{}</span></div>",
        escape(&spec.content)
    );

    ElementFragment {
        markup,
        style,
        placeholder: None,
    }
}

fn filter_declaration(filters: &ImageFilters) -> Option<String> {
    let entries = [
        ("brightness", filters.brightness, ""),
        ("contrast", filters.contrast, ""),
        ("saturate", filters.saturation, ""),
        ("grayscale", filters.grayscale, ""),
        ("sepia", filters.sepia, ""),
        ("blur", filters.blur_px, "px"),
    ];

    let functions: Vec<String> = entries
        .into_iter()
        .filter_map(|(name, value, unit)| {
            value
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| format!("{name}({}{unit})", number(v)))
        })
        .collect();

    (!functions.is_empty()).then(|| format!("filter:{};", functions.join(" ")))
}

fn render_image(index: usize, frame: &Frame, spec: &ImageSpec) -> ElementFragment {
    let Some(source) = sanitize_image_source(&spec.source) else {
        return placeholder(index, frame, "invalid_image_source");
    };

    let opacity = if spec.opacity.is_finite() {
        spec.opacity.clamp(0.0, 1.0)
    } else {
        1.0
    };
    let class = class_name(index);
    let style = format!(
        ".{class}{{{frame}object-fit:{fit};opacity:{opacity};{filters}}}",
        frame = frame_declarations(frame),
        fit = spec.fit.as_css(),
        opacity = number(opacity),
        filters = filter_declaration(&spec.filters).unwrap_or_default(),
    );
    let markup = format!("<img class=\"el el-image {class}\" src=\"{source}\" alt=\"\">");

    ElementFragment {
        markup,
        style,
        placeholder: None,
    }
}

fn render_shape(index: usize, frame: &Frame, spec: &ShapeSpec) -> ElementFragment {
    let fill = match spec.fill.as_deref() {
        Some(raw) => match sanitize_color(raw) {
            Some(color) => color,
            None => return placeholder(index, frame, "invalid_color"),
        },
        None => "transparent".to_string(),
    };
    let stroke = match spec.stroke.as_deref() {
        Some(raw) => match sanitize_color(raw) {
            Some(color) => Some(color),
            None => return placeholder(index, frame, "invalid_color"),
        },
        None => None,
    };

    let radius = match spec.kind {
        ShapeKind::Rectangle => None,
        ShapeKind::Ellipse => Some("50%".to_string()),
        ShapeKind::RoundedRectangle => {
            let radius = spec.corner_radius_mm;
            (radius.is_finite() && radius > 0.0).then(|| px(mm_to_css_px(radius)))
        }
    };

    let mut declarations = format!("{}background:{fill};", frame_declarations(frame));
    if let Some(radius) = radius {
        let _ = write!(declarations, "border-radius:{radius};");
    }
    let stroke_width = spec.stroke_width_mm;
    let stroke = stroke.filter(|_| stroke_width.is_finite() && stroke_width > 0.0);
    if let Some(stroke) = stroke {
        let _ = write!(
            declarations,
            "border:{} solid {stroke};",
            px(mm_to_css_px(stroke_width))
        );
    }

    let class = class_name(index);
    ElementFragment {
        markup: format!("<div class=\"el el-shape {class}\"></div>"),
        style: format!(".{class}{{{declarations}}}"),
        placeholder: None,
    }
}

/// A dashed box standing in for an element that cannot be drawn.
fn placeholder(index: usize, frame: &Frame, reason: &'static str) -> ElementFragment {
    let finite_or = |value: f64, fallback: f64| if value.is_finite() { value } else { fallback };
    let positive_or = |value: f64| {
        if value.is_finite() && value > 0.0 {
            value
        } else {
            PLACEHOLDER_FALLBACK_MM
        }
    };
    let repaired = Frame {
        x_mm: finite_or(frame.x_mm, 0.0),
        y_mm: finite_or(frame.y_mm, 0.0),
        width_mm: positive_or(frame.width_mm),
        height_mm: positive_or(frame.height_mm),
        rotation_deg: finite_or(frame.rotation_deg, 0.0),
        z_index: frame.z_index,
    };

    let class = class_name(index);
    ElementFragment {
        markup: format!(
            "<div class=\"el el-placeholder {class}\" data-reason=\"{reason}\"></div>"
        ),
        style: format!(
            ".{class}{{{}border:2px dashed #d0021b;background:rgba(208,2,27,0.06);}}",
            frame_declarations(&repaired)
        ),
        placeholder: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::page::{ImageFit, TextAlign};

    fn frame() -> Frame {
        Frame {
            x_mm: 25.4,
            y_mm: 0.0,
            width_mm: 25.4,
            height_mm: 12.7,
            rotation_deg: 0.0,
            z_index: 1,
        }
    }

    fn text(content: &str, color: &str) -> Element {
        Element {
            frame: frame(),
            kind: ElementKind::Text(TextSpec {
                content: content.to_string(),
                font_family: "Inter".into(),
                font_size_pt: 12.0,
                color: color.into(),
                align: TextAlign::Center,
                bold: true,
                italic: false,
                line_height: 1.2,
            }),
        }
    }

    #[test]
    fn text_geometry_is_in_css_pixels() {
        let fragment = render_element(0, &text("Hi", "#000"));
        assert!(fragment.style.contains("left:96px;"));
        assert!(fragment.style.contains("width:96px;height:48px;"));
        assert!(fragment.style.contains("justify-content:center;"));
        assert!(fragment.style.contains("font-weight:700;"));
        assert!(fragment.placeholder.is_none());
    }

    #[test]
    fn text_content_is_escaped() {
        let fragment = render_element(0, &text("<script>alert(1)</script>", "#000"));
        assert!(!fragment.markup.contains("<script>"));
        assert!(fragment.markup.contains("&lt;script&gt;"));
    }

    #[test]
    fn invalid_color_degrades_to_placeholder() {
        let fragment = render_element(3, &text("x", "red;}body{display:none"));
        assert_eq!(fragment.placeholder, Some("invalid_color"));
        assert!(fragment.markup.contains("el-placeholder"));
        assert!(fragment.style.contains("dashed"));
    }

    #[test]
    fn non_finite_geometry_degrades_to_placeholder() {
        let mut element = text("x", "#000");
        element.frame.width_mm = f64::NAN;
        let fragment = render_element(0, &element);
        assert_eq!(fragment.placeholder, Some("invalid_geometry"));
        assert!(!fragment.style.contains("NaN"));
    }

    #[test]
    fn empty_image_source_degrades_to_placeholder() {
        let element = Element {
            frame: frame(),
            kind: ElementKind::Image(ImageSpec {
                source: "  ".into(),
                fit: ImageFit::Cover,
                filters: ImageFilters::default(),
                opacity: 1.0,
            }),
        };
        assert_eq!(
            render_element(0, &element).placeholder,
            Some("invalid_image_source")
        );
    }

    #[test]
    fn image_filters_are_emitted_in_order() {
        let element = Element {
            frame: frame(),
            kind: ElementKind::Image(ImageSpec {
                source: "https://img.example/a.jpg".into(),
                fit: ImageFit::Contain,
                filters: ImageFilters {
                    brightness: Some(1.1),
                    grayscale: Some(1.0),
                    blur_px: Some(2.0),
                    ..ImageFilters::default()
                },
                opacity: 0.5,
            }),
        };
        let fragment = render_element(0, &element);
        assert!(fragment.markup.contains("src=\"https://img.example/a.jpg\""));
        assert!(fragment.style.contains("object-fit:contain;"));
        assert!(
            fragment
                .style
                .contains("filter:brightness(1.1) grayscale(1) blur(2px);")
        );
        assert!(fragment.style.contains("opacity:0.5;"));
    }

    #[test]
    fn ellipse_uses_half_radius() {
        let element = Element {
            frame: frame(),
            kind: ElementKind::Shape(ShapeSpec {
                kind: ShapeKind::Ellipse,
                fill: Some("#00ff00".into()),
                stroke: Some("black".into()),
                stroke_width_mm: 0.5,
                corner_radius_mm: 0.0,
            }),
        };
        let fragment = render_element(0, &element);
        assert!(fragment.style.contains("border-radius:50%;"));
        assert!(fragment.style.contains("background:#00ff00;"));
        assert!(fragment.style.contains("solid black;"));
    }
}
