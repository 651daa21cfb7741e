use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::{application::layout::Template, domain::options::OutputFormat};

pub const PREVIEW_TIMEOUT: Duration = Duration::from_secs(30);
pub const FINAL_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-call rendering instructions handed to a [`Renderer`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub format: OutputFormat,
    /// Only honoured for lossy raster output.
    pub quality: u8,
    pub timeout: Duration,
}

impl RenderRequest {
    pub fn new(format: OutputFormat, timeout: Duration) -> Self {
        Self {
            format,
            quality: 90,
            timeout,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }
}

/// Structured errors surfaced by the rendering engine. They map onto job
/// failure reasons without leaking engine internals.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("renderer could not be launched: {message}")]
    Launch { message: String },
    #[error("document could not be loaded: {message}")]
    Navigation { message: String },
    #[error("engine protocol error: {message}")]
    Protocol { message: String },
    #[error("render exceeded {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("render session crashed: {message}")]
    SessionCrashed { message: String },
    #[error("document shell could not be built: {message}")]
    Document { message: String },
}

impl RenderError {
    pub fn code(&self) -> &'static str {
        match self {
            RenderError::Launch { .. } => "renderer_unavailable",
            RenderError::Navigation { .. } => "render_navigation_failed",
            RenderError::Protocol { .. } => "render_protocol_error",
            RenderError::Timeout { .. } => "render_timeout",
            RenderError::SessionCrashed { .. } => "render_session_crashed",
            RenderError::Document { .. } => "render_document_invalid",
        }
    }

    /// Whether the failure says something about the session rather than the document.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            RenderError::Timeout { .. } | RenderError::SessionCrashed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RendererHealth {
    pub healthy: bool,
    pub detail: String,
}

/// Headless rendering engine seam. Implementations must honour
/// `request.timeout` and release per-call resources on every exit path.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, template: &Template, request: &RenderRequest)
    -> Result<Bytes, RenderError>;

    async fn health(&self) -> RendererHealth;
}
