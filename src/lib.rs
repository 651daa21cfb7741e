//! Photobook render pipeline: page previews, proof renders, print-ready
//! production PDFs and 3D textures, behind a tenant-scoped HTTP API.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub(crate) mod util;
