//! Photobook page model: a physical page holding positioned elements.
//!
//! All geometry is expressed in millimetres. The model is read-only input to
//! the render pipeline; ownership stays with the project store.

use serde::{Deserialize, Serialize};

/// Millimetres per inch.
pub const MM_PER_INCH: f64 = 25.4;

/// Reference density of CSS pixels.
pub const CSS_DPI: f64 = 96.0;

/// Convert a physical length to device pixels at the given density.
pub fn mm_to_px(mm: f64, dpi: u32) -> u32 {
    let px = (mm * f64::from(dpi) / MM_PER_INCH).round();
    if px.is_finite() && px > 0.0 {
        px.min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

/// Convert a physical length to CSS pixels (96 per inch), unrounded.
pub fn mm_to_css_px(mm: f64) -> f64 {
    mm * CSS_DPI / MM_PER_INCH
}

/// Convert a physical length to PDF points (72 per inch).
pub fn mm_to_pt(mm: f64) -> f64 {
    mm * 72.0 / MM_PER_INCH
}

fn default_background() -> String {
    "#ffffff".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub width_mm: f64,
    pub height_mm: f64,
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl Page {
    /// Elements in paint order: ascending z-index, ties keep input order.
    pub fn paint_order(&self) -> Vec<&Element> {
        let mut ordered: Vec<&Element> = self.elements.iter().collect();
        ordered.sort_by_key(|element| element.frame.z_index);
        ordered
    }

    /// Pixel dimensions of the page at `dpi`.
    pub fn pixel_size(&self, dpi: u32) -> (u32, u32) {
        (mm_to_px(self.width_mm, dpi), mm_to_px(self.height_mm, dpi))
    }
}

/// Position and size shared by every element variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub x_mm: f64,
    pub y_mm: f64,
    pub width_mm: f64,
    pub height_mm: f64,
    #[serde(default)]
    pub rotation_deg: f64,
    #[serde(default)]
    pub z_index: i32,
}

impl Frame {
    pub fn is_well_formed(&self) -> bool {
        [
            self.x_mm,
            self.y_mm,
            self.width_mm,
            self.height_mm,
            self.rotation_deg,
        ]
        .iter()
        .all(|value| value.is_finite())
            && self.width_mm > 0.0
            && self.height_mm > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    #[serde(flatten)]
    pub frame: Frame,
    #[serde(flatten)]
    pub kind: ElementKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    Text(TextSpec),
    Image(ImageSpec),
    Shape(ShapeSpec),
}

impl ElementKind {
    pub fn label(&self) -> &'static str {
        match self {
            ElementKind::Text(_) => "text",
            ElementKind::Image(_) => "image",
            ElementKind::Shape(_) => "shape",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

impl TextAlign {
    pub fn as_css(self) -> &'static str {
        match self {
            TextAlign::Left => "left",
            TextAlign::Center => "center",
            TextAlign::Right => "right",
            TextAlign::Justify => "justify",
        }
    }
}

fn default_font_family() -> String {
    "Helvetica".to_string()
}

fn default_font_size() -> f64 {
    12.0
}

fn default_text_color() -> String {
    "#000000".to_string()
}

fn default_line_height() -> f64 {
    1.2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpec {
    pub content: String,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_font_size")]
    pub font_size_pt: f64,
    #[serde(default = "default_text_color")]
    pub color: String,
    #[serde(default)]
    pub align: TextAlign,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default = "default_line_height")]
    pub line_height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFit {
    #[default]
    Cover,
    Contain,
    Fill,
}

impl ImageFit {
    pub fn as_css(self) -> &'static str {
        match self {
            ImageFit::Cover => "cover",
            ImageFit::Contain => "contain",
            ImageFit::Fill => "fill",
        }
    }
}

/// Photographic adjustments applied at paint time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageFilters {
    pub brightness: Option<f64>,
    pub contrast: Option<f64>,
    pub saturation: Option<f64>,
    pub grayscale: Option<f64>,
    pub sepia: Option<f64>,
    pub blur_px: Option<f64>,
}

fn default_opacity() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub source: String,
    #[serde(default)]
    pub fit: ImageFit,
    #[serde(default)]
    pub filters: ImageFilters,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Rectangle,
    #[serde(alias = "circle")]
    Ellipse,
    RoundedRectangle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeSpec {
    pub kind: ShapeKind,
    #[serde(default)]
    pub fill: Option<String>,
    #[serde(default)]
    pub stroke: Option<String>,
    #[serde(default)]
    pub stroke_width_mm: f64,
    #[serde(default)]
    pub corner_radius_mm: f64,
}
