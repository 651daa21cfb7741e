use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    application::{error::AppError, repos::BlobStore},
    infra::http::{RouterState, api::error::ApiError},
};

#[derive(Clone)]
pub struct BlobState {
    pub blobs: Arc<dyn BlobStore>,
}

/// Serves stored artifacts at the URLs the blob store hands out.
pub fn build_blob_router(state: RouterState) -> Router<RouterState> {
    Router::new()
        .route("/blobs/{*key}", get(serve_blob))
        .with_state(state)
}

async fn serve_blob(
    State(state): State<BlobState>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let bytes = state
        .blobs
        .download(&key)
        .await
        .map_err(AppError::from)?;

    let mime = mime_guess::from_path(&key).first_or_octet_stream();
    let mut response = bytes.into_response();
    if let Ok(value) = HeaderValue::from_str(mime.essence_str()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=3600"),
    );
    Ok(response)
}
