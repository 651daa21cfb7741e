use std::io::Cursor;

use bytes::Bytes;
use chromiumoxide::cdp::browser_protocol::page::Viewport;
use image::{ImageFormat, ImageReader, codecs::jpeg::JpegEncoder, imageops::FilterType};
use tracing::debug;

use crate::application::{layout::Template, render::RenderError};

const SOURCE: &str = "infra::chromium::raster";

/// Capture region in CSS px whose device-pixel size is the template's
/// pixel size at the template's scale factor.
pub(crate) fn screenshot_clip(template: &Template) -> Viewport {
    let dsf = template.device_scale_factor();
    Viewport {
        x: 0.0,
        y: 0.0,
        width: f64::from(template.pixel_width) / dsf,
        height: f64::from(template.pixel_height) / dsf,
        scale: 1.0,
    }
}

/// Snap a captured raster to exactly `pixel_width x pixel_height`.
///
/// The engine rounds the scaled clip on its own, so a capture may come back
/// one pixel off. Exact captures are returned untouched.
pub(crate) fn fit_to_template(
    bytes: Vec<u8>,
    template: &Template,
    format: ImageFormat,
    quality: u8,
) -> Result<Bytes, RenderError> {
    let target = (template.pixel_width, template.pixel_height);
    let dimensions = ImageReader::new(Cursor::new(&bytes))
        .with_guessed_format()
        .map_err(raster_error)?
        .into_dimensions()
        .map_err(raster_error)?;
    if dimensions == target {
        return Ok(Bytes::from(bytes));
    }

    let captured = image::load_from_memory_with_format(&bytes, format).map_err(raster_error)?;
    let fitted = if dimensions.0 >= target.0 && dimensions.1 >= target.1 {
        captured.crop_imm(0, 0, target.0, target.1)
    } else {
        captured.resize_exact(target.0, target.1, FilterType::Triangle)
    };
    debug!(
        target = SOURCE,
        op = "chromium::fit_raster",
        captured_width = dimensions.0,
        captured_height = dimensions.1,
        width = target.0,
        height = target.1,
        "capture adjusted to template size"
    );

    let mut out = Vec::with_capacity(bytes.len());
    match format {
        ImageFormat::Jpeg => {
            JpegEncoder::new_with_quality(&mut out, quality)
                .encode_image(&fitted.to_rgb8())
                .map_err(raster_error)?;
        }
        other => {
            fitted
                .write_to(&mut Cursor::new(&mut out), other)
                .map_err(raster_error)?;
        }
    }
    Ok(Bytes::from(out))
}

fn raster_error(err: impl std::fmt::Display) -> RenderError {
    RenderError::Protocol {
        message: format!("captured raster could not be read: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, GenericImageView, RgbImage, RgbaImage};

    use super::*;
    use crate::{
        application::layout::build_template,
        domain::{options::RenderOptions, page::Page},
    };

    fn a4_template(dpi: u32) -> Template {
        let page = Page {
            id: "p".into(),
            width_mm: 210.0,
            height_mm: 297.0,
            background: "#fff".into(),
            elements: Vec::new(),
        };
        build_template(&page, &RenderOptions::default().with_dpi(dpi))
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(RgbaImage::new(width, height))
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .expect("encode");
        out
    }

    #[test]
    fn clip_scales_to_the_exact_pixel_size() {
        let template = a4_template(150);
        assert_eq!((template.pixel_width, template.pixel_height), (1240, 1754));

        let clip = screenshot_clip(&template);
        let dsf = template.device_scale_factor();
        assert!((clip.width * dsf - 1240.0).abs() < 1e-6);
        assert!((clip.height * dsf - 1754.0).abs() < 1e-6);
        assert!(clip.width < f64::from(template.css_width) + 1.0);
    }

    #[test]
    fn exact_captures_pass_through_unchanged() {
        let template = a4_template(72);
        let bytes = png(template.pixel_width, template.pixel_height);
        let fitted = fit_to_template(bytes.clone(), &template, ImageFormat::Png, 90).expect("fit");
        assert_eq!(fitted.as_ref(), bytes.as_slice());
    }

    #[test]
    fn oversized_captures_are_cropped_to_the_template() {
        let template = a4_template(150);
        let bytes = png(1241, 1755);
        let fitted = fit_to_template(bytes, &template, ImageFormat::Png, 90).expect("fit");
        let image = image::load_from_memory(&fitted).expect("decode");
        assert_eq!(image.dimensions(), (1240, 1754));
    }

    #[test]
    fn short_jpeg_captures_are_stretched_to_the_template() {
        let template = a4_template(72);
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 80)
            .encode_image(&RgbImage::new(template.pixel_width - 1, template.pixel_height))
            .expect("encode");
        let fitted = fit_to_template(jpeg, &template, ImageFormat::Jpeg, 80).expect("fit");
        let image = image::load_from_memory_with_format(&fitted, ImageFormat::Jpeg).expect("decode");
        assert_eq!(
            image.dimensions(),
            (template.pixel_width, template.pixel_height)
        );
    }
}
