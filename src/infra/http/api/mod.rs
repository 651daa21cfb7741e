pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};

use crate::infra::http::RouterState;

pub const API_PREFIX: &str = "/api/v1/render";

pub fn build_api_router(state: RouterState) -> Router<RouterState> {
    let tenant_scoped = Router::new()
        .route("/preview", post(handlers::preview))
        .route("/final", post(handlers::final_render))
        .route("/production", post(handlers::production))
        .route("/production/sync", post(handlers::production_sync))
        .route("/3d", post(handlers::render_3d))
        .route("/status/{job_id}", get(handlers::job_status))
        .route("/cancel/{job_id}", delete(handlers::cancel_job))
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache/{project_id}", delete(handlers::invalidate_project))
        .route(
            "/cache/{project_id}/{page_id}",
            delete(handlers::invalidate_page),
        )
        .route_layer(axum_middleware::from_fn(middleware::require_tenant));

    let operations = Router::new()
        .route("/queue/stats", get(handlers::queue_stats))
        .route("/health", get(handlers::health));

    Router::new().nest(
        API_PREFIX,
        tenant_scoped.merge(operations).with_state(state),
    )
}
