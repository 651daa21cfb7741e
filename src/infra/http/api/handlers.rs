use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    application::{orchestrator::Caller, preview::PreviewKind},
    domain::{
        intent::{FinalIntent, ProductionIntent, Render3dIntent},
        jobs::CancelOutcome,
    },
};

use super::{
    error::{ApiError, ApiJson},
    models::*,
    state::ApiState,
};

/// -------- Inline renders --------
pub async fn preview(
    State(state): State<ApiState>,
    Extension(caller): Extension<Caller>,
    ApiJson(payload): ApiJson<PreviewRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let (kind, request) = payload.into_parts();
    let orchestrator = &state.orchestrator;
    let outcome = match kind {
        PreviewKind::Standard => orchestrator.preview(&caller, request).await,
        PreviewKind::HiDpi => orchestrator.hi_dpi_preview(&caller, request).await,
        PreviewKind::Thumbnail => orchestrator.thumbnail(&caller, request).await,
    }?;
    Ok(Json(outcome))
}

pub async fn production_sync(
    State(state): State<ApiState>,
    Extension(caller): Extension<Caller>,
    ApiJson(intent): ApiJson<ProductionIntent>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.orchestrator.production_sync(&caller, intent).await?;
    Ok(Json(result))
}

/// -------- Queued renders --------
pub async fn final_render(
    State(state): State<ApiState>,
    Extension(caller): Extension<Caller>,
    ApiJson(intent): ApiJson<FinalIntent>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.orchestrator.final_render(&caller, intent).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAcceptedResponse::from(handle))))
}

pub async fn production(
    State(state): State<ApiState>,
    Extension(caller): Extension<Caller>,
    ApiJson(intent): ApiJson<ProductionIntent>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.orchestrator.production(&caller, intent).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAcceptedResponse::from(handle))))
}

pub async fn render_3d(
    State(state): State<ApiState>,
    Extension(caller): Extension<Caller>,
    ApiJson(intent): ApiJson<Render3dIntent>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.orchestrator.render_3d(&caller, intent).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAcceptedResponse::from(handle))))
}

pub async fn job_status(
    State(state): State<ApiState>,
    Extension(caller): Extension<Caller>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.job_status(&caller, &job_id)?;
    Ok(Json(job))
}

pub async fn cancel_job(
    State(state): State<ApiState>,
    Extension(caller): Extension<Caller>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.orchestrator.cancel_job(&caller, &job_id)?;
    let status = match outcome {
        CancelOutcome::Removed => StatusCode::OK,
        CancelOutcome::Pending => StatusCode::ACCEPTED,
        CancelOutcome::Finished => StatusCode::CONFLICT,
    };
    Ok((status, Json(CancelResponse::new(job_id, outcome))))
}

/// -------- Cache --------
pub async fn invalidate_project(
    State(state): State<ApiState>,
    Extension(caller): Extension<Caller>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state
        .orchestrator
        .invalidate_cache(&caller, &project_id, None)
        .await?;
    Ok(Json(InvalidateResponse {
        project_id,
        page_id: None,
        removed,
    }))
}

pub async fn invalidate_page(
    State(state): State<ApiState>,
    Extension(caller): Extension<Caller>,
    Path((project_id, page_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state
        .orchestrator
        .invalidate_cache(&caller, &project_id, Some(&page_id))
        .await?;
    Ok(Json(InvalidateResponse {
        project_id,
        page_id: Some(page_id),
        removed,
    }))
}

pub async fn cache_stats(
    State(state): State<ApiState>,
    Extension(caller): Extension<Caller>,
) -> impl IntoResponse {
    Json(state.orchestrator.cache_stats(&caller).await)
}

/// -------- Operations --------
pub async fn queue_stats(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.orchestrator.queue_stats())
}

pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let report = state.orchestrator.health().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
