//! Infrastructure adapters and runtime bootstrap.

pub mod blobs;
pub mod chromium;
pub mod error;
pub mod http;
pub mod pdf;
pub mod projects;
pub mod telemetry;
