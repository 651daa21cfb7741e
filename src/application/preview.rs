//! Synchronous, cache-first page previews.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use bytes::Bytes;
use metrics::histogram;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    application::{
        error::AppError,
        layout::build_template,
        render::{PREVIEW_TIMEOUT, RenderRequest, Renderer},
        repos::{BlobStore, ProjectStore},
    },
    cache::{CacheKey, CacheKeyInput, CacheScope, PreviewCache},
    domain::{
        error::DomainError,
        options::{OutputFormat, RenderOptions},
        page::{MM_PER_INCH, Page},
    },
};

const SOURCE: &str = "application::preview";
const METRIC_PREVIEW_MS: &str = "pressroom_preview_ms";

pub const HI_DPI: u32 = 300;
pub const THUMBNAIL_EDGE_PX: u32 = 400;
pub const THUMBNAIL_QUALITY: u8 = 80;

/// Which preset a preview request follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewKind {
    /// Caller-chosen dpi and format.
    #[default]
    Standard,
    /// 300 dpi PNG.
    HiDpi,
    /// JPEG scaled so the longer side is about 400 px.
    Thumbnail,
}

impl PreviewKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PreviewKind::Standard => "standard",
            PreviewKind::HiDpi => "hi_dpi",
            PreviewKind::Thumbnail => "thumbnail",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreviewRequest {
    pub tenant_id: String,
    pub project_id: String,
    pub page_id: String,
    pub kind: PreviewKind,
    pub options: RenderOptions,
    pub use_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewMetadata {
    pub width_px: u32,
    pub height_px: u32,
    pub dpi: u32,
    pub format: OutputFormat,
    pub content_type: String,
    pub size_bytes: u64,
    pub cache_key: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewOutcome {
    pub url: String,
    pub cached: bool,
    pub processing_ms: u64,
    pub metadata: PreviewMetadata,
}

/// Dpi that puts the longer page side at roughly `edge_px` pixels.
pub fn thumbnail_dpi(page: &Page) -> u32 {
    let longest = page.width_mm.max(page.height_mm);
    if !longest.is_finite() || longest <= 0.0 {
        return 1;
    }
    ((f64::from(THUMBNAIL_EDGE_PX) * MM_PER_INCH / longest).round() as u32).max(1)
}

/// Apply a preset to caller options.
pub fn preset_options(kind: PreviewKind, page: &Page, options: RenderOptions) -> RenderOptions {
    match kind {
        PreviewKind::Standard => options,
        PreviewKind::HiDpi => options.with_dpi(HI_DPI).with_format(OutputFormat::Png),
        PreviewKind::Thumbnail => RenderOptions {
            quality: THUMBNAIL_QUALITY,
            ..options
                .with_dpi(thumbnail_dpi(page))
                .with_format(OutputFormat::Jpeg)
        },
    }
}

/// String folded into the cache key for options that change the bytes but
/// are not part of the key's fixed fields.
fn cache_variant(options: &RenderOptions) -> String {
    let quality = if options.format == OutputFormat::Jpeg {
        options.quality
    } else {
        0
    };
    format!(
        "q={quality};guides={};bg={}",
        options.include_guides,
        options.background.as_deref().unwrap_or("")
    )
}

#[derive(Clone)]
pub struct PreviewService {
    projects: Arc<dyn ProjectStore>,
    renderer: Arc<dyn Renderer>,
    blobs: Arc<dyn BlobStore>,
    cache: PreviewCache,
    timeout: Duration,
}

impl PreviewService {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        renderer: Arc<dyn Renderer>,
        blobs: Arc<dyn BlobStore>,
        cache: PreviewCache,
    ) -> Self {
        Self {
            projects,
            renderer,
            blobs,
            cache,
            timeout: PREVIEW_TIMEOUT,
        }
    }

    /// Default render deadline, also the latency budget a preview is logged against.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache(&self) -> &PreviewCache {
        &self.cache
    }

    pub async fn render(&self, request: PreviewRequest) -> Result<PreviewOutcome, AppError> {
        let started_at = Instant::now();
        let (page, version) = self
            .projects
            .find_page_for_tenant(&request.tenant_id, &request.project_id, &request.page_id)
            .await?
            .ok_or(DomainError::not_found("page"))?;

        let options = preset_options(request.kind, &page, request.options.clone());
        match request.kind {
            // The preset owns dpi and quality; the caller's values are still checked.
            PreviewKind::Thumbnail => request.options.validate_except_dpi()?,
            _ => options.validate()?,
        }
        let (width_px, height_px) = options.ensure_preview_size(&page)?;

        let variant = cache_variant(&options);
        let key = CacheKey::derive(&CacheKeyInput {
            project_id: &request.project_id,
            page_id: &page.id,
            version,
            width_px,
            height_px,
            dpi: options.dpi,
            format: options.format,
            variant: &variant,
        });
        let use_cache = request.use_cache && self.cache.is_enabled();

        if use_cache {
            if let Some(hit) = self.cache.get(&request.tenant_id, &key).await {
                let processing_ms = started_at.elapsed().as_millis() as u64;
                histogram!(METRIC_PREVIEW_MS, "cache" => "hit").record(processing_ms as f64);
                return Ok(PreviewOutcome {
                    url: hit.blob_url,
                    cached: true,
                    processing_ms,
                    metadata: PreviewMetadata {
                        width_px,
                        height_px,
                        dpi: options.dpi,
                        format: options.format,
                        content_type: hit.content_type,
                        size_bytes: hit.size_bytes,
                        cache_key: Some(key.to_string()),
                        expires_at: Some(hit.expires_at),
                    },
                });
            }
        }

        let template = build_template(&page, &options);
        let render_request = RenderRequest::new(options.format, options.timeout_or(self.timeout))
            .with_quality(options.quality);
        let bytes = self.renderer.render(&template, &render_request).await?;
        let size_bytes = bytes.len() as u64;

        let (url, expires_at) = if use_cache {
            let scope = CacheScope {
                project_id: &request.project_id,
                page_id: &page.id,
            };
            match self
                .cache
                .put(&request.tenant_id, &key, bytes.clone(), options.format, scope)
                .await
            {
                Ok(entry) => (entry.blob_url, Some(entry.expires_at)),
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        op = "preview::cache_put",
                        tenant_id = %request.tenant_id,
                        project_id = %request.project_id,
                        page_id = %page.id,
                        error = %err,
                        "preview could not be cached, storing uncached copy"
                    );
                    (self.store_uncached(&request, options.format, bytes).await?, None)
                }
            }
        } else {
            (self.store_uncached(&request, options.format, bytes).await?, None)
        };

        let elapsed = started_at.elapsed();
        let processing_ms = elapsed.as_millis() as u64;
        histogram!(METRIC_PREVIEW_MS, "cache" => "miss").record(processing_ms as f64);
        if elapsed > self.timeout {
            warn!(
                target = SOURCE,
                op = "preview",
                tenant_id = %request.tenant_id,
                project_id = %request.project_id,
                page_id = %page.id,
                kind = request.kind.as_str(),
                elapsed_ms = processing_ms,
                "preview exceeded its latency budget"
            );
        } else {
            debug!(
                target = SOURCE,
                op = "preview",
                tenant_id = %request.tenant_id,
                page_id = %page.id,
                kind = request.kind.as_str(),
                elapsed_ms = processing_ms,
                result = "rendered"
            );
        }

        Ok(PreviewOutcome {
            url,
            cached: false,
            processing_ms,
            metadata: PreviewMetadata {
                width_px,
                height_px,
                dpi: options.dpi,
                format: options.format,
                content_type: options.format.content_type().to_string(),
                size_bytes,
                cache_key: use_cache.then(|| key.to_string()),
                expires_at,
            },
        })
    }

    async fn store_uncached(
        &self,
        request: &PreviewRequest,
        format: OutputFormat,
        bytes: Bytes,
    ) -> Result<String, AppError> {
        let key = format!(
            "renders/{}/{}/{}/{}.{}",
            request.tenant_id,
            request.project_id,
            request.page_id,
            Uuid::new_v4(),
            format.extension()
        );
        let metadata = BTreeMap::from([
            ("tenant_id".to_string(), request.tenant_id.clone()),
            ("project_id".to_string(), request.project_id.clone()),
        ]);
        Ok(self
            .blobs
            .upload(bytes, &key, format.content_type(), &metadata)
            .await?)
    }
}
