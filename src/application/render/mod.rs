//! Rendering engine interface.
//!
//! The engine rasterizes or prints a [`Template`](crate::application::layout::Template)
//! under a strict deadline. The shipped implementation lives in
//! `infra::chromium`; tests inject their own [`Renderer`].

mod types;

pub use types::{
    FINAL_TIMEOUT, PREVIEW_TIMEOUT, RenderError, RenderRequest, Renderer, RendererHealth,
};
