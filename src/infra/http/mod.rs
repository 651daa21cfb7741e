pub mod api;
mod blobs;
mod middleware;

pub use api::{ApiState, build_api_router};
pub use blobs::{BlobState, build_blob_router};
pub use middleware::{REQUEST_ID_HEADER, TENANT_HEADER, USER_HEADER};

use axum::{Router, extract::FromRef, middleware as axum_middleware};

#[derive(Clone)]
pub struct RouterState {
    pub api: ApiState,
    pub blobs: BlobState,
}

impl FromRef<RouterState> for ApiState {
    fn from_ref(state: &RouterState) -> Self {
        state.api.clone()
    }
}

impl FromRef<RouterState> for BlobState {
    fn from_ref(state: &RouterState) -> Self {
        state.blobs.clone()
    }
}

/// Full HTTP surface: render API plus blob downloads, with request ids and
/// error logging on every route.
pub fn build_router(state: RouterState) -> Router {
    Router::new()
        .merge(build_api_router(state.clone()))
        .merge(build_blob_router(state.clone()))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
