//! Headless Chromium renderer driven over the DevTools protocol.

mod document;
mod raster;
mod supervisor;
mod tab;

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use chromiumoxide::{
    Page,
    cdp::browser_protocol::{
        emulation::SetDeviceMetricsOverrideParams,
        page::{CaptureScreenshotFormat, PrintToPdfParams},
    },
    page::ScreenshotParams,
};
use image::ImageFormat;
use metrics::histogram;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::{
    application::{
        layout::Template,
        render::{RenderError, RenderRequest, Renderer, RendererHealth},
    },
    domain::{
        options::OutputFormat,
        page::MM_PER_INCH,
    },
};

pub use supervisor::{BrowserSettings, SessionLease, SessionSupervisor};

use self::{
    document::{READY_SCRIPT, render_document},
    raster::{fit_to_template, screenshot_clip},
    supervisor::map_cdp_error,
    tab::TabGuard,
};

const SOURCE: &str = "infra::chromium";
const METRIC_RENDER_MS: &str = "pressroom_render_ms";

pub struct ChromiumRenderer {
    supervisor: SessionSupervisor,
}

impl ChromiumRenderer {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            supervisor: SessionSupervisor::new(settings),
        }
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    async fn render_with_lease(
        &self,
        lease: &SessionLease,
        html: &str,
        template: &Template,
        request: &RenderRequest,
    ) -> Result<Bytes, RenderError> {
        let started_at = Instant::now();
        let deadline_exceeded = || RenderError::Timeout {
            timeout: request.timeout,
        };

        let tab = timeout(request.timeout, lease.open_tab())
            .await
            .map_err(|_| deadline_exceeded())??;
        let tab = TabGuard::new(tab);

        let remaining = request.timeout.saturating_sub(started_at.elapsed());
        let outcome = match timeout(remaining, paint(tab.tab(), html, template, request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(deadline_exceeded()),
        };
        tab.close().await;

        outcome.map_err(|err| match err {
            RenderError::Timeout { .. } => deadline_exceeded(),
            other => other,
        })
    }
}

async fn paint(
    page: &Page,
    html: &str,
    template: &Template,
    request: &RenderRequest,
) -> Result<Bytes, RenderError> {
    let metrics = SetDeviceMetricsOverrideParams::builder()
        .width(i64::from(template.css_width))
        .height(i64::from(template.css_height))
        .device_scale_factor(template.device_scale_factor())
        .mobile(false)
        .build()
        .map_err(|message| RenderError::Protocol { message })?;
    page.execute(metrics).await.map_err(map_cdp_error)?;

    page.set_content(html)
        .await
        .map_err(|err| RenderError::Navigation {
            message: err.to_string(),
        })?;
    page.evaluate(READY_SCRIPT)
        .await
        .map_err(|err| RenderError::Navigation {
            message: err.to_string(),
        })?;

    let bytes = match request.format {
        OutputFormat::Png | OutputFormat::Jpeg => {
            let (format, image_format) = if request.format == OutputFormat::Png {
                (CaptureScreenshotFormat::Png, ImageFormat::Png)
            } else {
                (CaptureScreenshotFormat::Jpeg, ImageFormat::Jpeg)
            };
            // full_page would reset the scale factor to 1; clip keeps it.
            let mut params = ScreenshotParams::builder()
                .format(format)
                .clip(screenshot_clip(template))
                .capture_beyond_viewport(true);
            if request.format == OutputFormat::Jpeg {
                params = params.quality(i64::from(request.quality));
            }
            let captured = page.screenshot(params.build()).await.map_err(map_cdp_error)?;
            return fit_to_template(captured, template, image_format, request.quality);
        }
        OutputFormat::Pdf => {
            let params = PrintToPdfParams::builder()
                .paper_width(template.width_mm / MM_PER_INCH)
                .paper_height(template.height_mm / MM_PER_INCH)
                .margin_top(0.0)
                .margin_bottom(0.0)
                .margin_left(0.0)
                .margin_right(0.0)
                .print_background(true)
                .prefer_css_page_size(false)
                .build();
            page.pdf(params).await.map_err(map_cdp_error)?
        }
    };

    Ok(Bytes::from(bytes))
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn render(
        &self,
        template: &Template,
        request: &RenderRequest,
    ) -> Result<Bytes, RenderError> {
        let started_at = Instant::now();
        let html = render_document(template)?;
        let lease = self.supervisor.acquire_session().await?;

        let result = self.render_with_lease(&lease, &html, template, request).await;
        self.supervisor.release(lease, result.as_ref().err());

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!(METRIC_RENDER_MS, "format" => request.format.as_str())
            .record(elapsed_ms as f64);
        match &result {
            Ok(bytes) => info!(
                target = SOURCE,
                op = "chromium::render",
                result = "ok",
                format = request.format.as_str(),
                pixel_width = template.pixel_width,
                pixel_height = template.pixel_height,
                output_bytes = bytes.len(),
                elapsed_ms,
            ),
            Err(err) => warn!(
                target = SOURCE,
                op = "chromium::render",
                result = "error",
                format = request.format.as_str(),
                error_code = err.code(),
                error = %err,
                elapsed_ms,
            ),
        }
        result
    }

    async fn health(&self) -> RendererHealth {
        self.supervisor.health().await
    }
}
