mod support;

use std::sync::Arc;

use axum::{
    Router,
    body::{self, Body},
    http::{Request, StatusCode, header},
};
use pressroom::{
    application::{jobs::JobFailure, repos::BlobStore},
    domain::jobs::JobType,
    infra::http::{
        ApiState, BlobState, REQUEST_ID_HEADER, RouterState, TENANT_HEADER, build_router,
    },
};
use serde_json::{Value, json};
use tower::ServiceExt;

use support::{Harness, TENANT, a4_page, key_from_url, project};

fn router(harness: &Harness) -> Router {
    let blobs: Arc<dyn BlobStore> = harness.blobs.clone();
    build_router(RouterState {
        api: ApiState::new(harness.orchestrator.clone()),
        blobs: BlobState { blobs },
    })
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(TENANT_HEADER, TENANT)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn tenant_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(TENANT_HEADER, TENANT)
        .body(Body::empty())
        .expect("request")
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router responds");
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

#[tokio::test]
async fn requests_without_tenant_are_unauthorized() {
    let harness = Harness::new(&[project("book", vec![a4_page("p1")])]);
    let router = router(&harness);

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/render/preview")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"project_id": "book", "page_id": "p1"}).to_string(),
        ))
        .expect("request");
    let (status, body) = send(&router, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "missing_tenant");
    assert_eq!(harness.renderer.calls(), 0);
}

#[tokio::test]
async fn preview_returns_url_and_metadata() {
    let harness = Harness::new(&[project("book", vec![a4_page("p1")])]);
    let router = router(&harness);

    let (status, body) = send(
        &router,
        json_request(
            "POST",
            "/api/v1/render/preview",
            json!({"project_id": "book", "page_id": "p1", "options": {"dpi": 72}}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cached"], false);
    assert_eq!(body["metadata"]["width_px"], 595);
    assert!(body["url"].as_str().expect("url").starts_with(support::BLOB_BASE));
}

#[tokio::test]
async fn malformed_bodies_get_a_json_error() {
    let harness = Harness::new(&[project("book", vec![a4_page("p1")])]);
    let router = router(&harness);

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/render/preview")
        .header(TENANT_HEADER, TENANT)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"project_id\":"))
        .expect("request");
    let (status, body) = send(&router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_body");
}

#[tokio::test]
async fn validation_failures_map_to_client_errors() {
    let harness = Harness::new(&[project("book", vec![a4_page("p1")])]);
    let router = router(&harness);

    let (status, body) = send(
        &router,
        json_request(
            "POST",
            "/api/v1/render/preview",
            json!({"project_id": "book", "page_id": "p1", "options": {"dpi": 20}}),
        ),
    )
    .await;

    assert!(status.is_client_error());
    assert!(body["error"]["code"].is_string());
}

#[tokio::test]
async fn queued_jobs_can_be_polled_and_cancelled() {
    let harness = Harness::new(&[project("book", vec![a4_page("p1")])]);
    let router = router(&harness);

    let (status, accepted) = send(
        &router,
        json_request(
            "POST",
            "/api/v1/render/final",
            json!({"project_id": "book", "options": {"format": "pdf"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(accepted["job_type"], "final");
    assert_eq!(accepted["state"], "queued");
    let status_url = accepted["status_url"].as_str().expect("status url");
    let job_id = accepted["job_id"].as_str().expect("job id");

    let (status, job) = send(&router, tenant_request("GET", status_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["id"], job_id);

    let cancel_uri = format!("/api/v1/render/cancel/{job_id}");
    let (status, cancelled) = send(&router, tenant_request("DELETE", &cancel_uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["cancelled"], true);
    assert_eq!(cancelled["outcome"], "removed");

    let (status, body) = send(&router, tenant_request("GET", status_url)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "job_not_found");
}

#[tokio::test]
async fn cancelling_a_running_job_is_accepted_then_conflicts_once_finished() {
    let harness = Harness::new(&[project("book", vec![a4_page("p1")])]);
    let router = router(&harness);

    let (_, accepted) = send(
        &router,
        json_request(
            "POST",
            "/api/v1/render/final",
            json!({"project_id": "book", "options": {"format": "pdf"}}),
        ),
    )
    .await;
    let job_id = accepted["job_id"].as_str().expect("job id").to_string();
    let claimed = harness.queue.try_claim(JobType::Final).expect("claim");
    assert_eq!(claimed.id, job_id);

    let cancel_uri = format!("/api/v1/render/cancel/{job_id}");
    let (status, body) = send(&router, tenant_request("DELETE", &cancel_uri)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["outcome"], "pending");
    assert_eq!(body["cancelled"], true);

    harness
        .queue
        .fail(&job_id, JobFailure::retryable("render_timeout", "slow page"));
    let status_uri = format!("/api/v1/render/status/{job_id}");
    let (status, job) = send(&router, tenant_request("GET", &status_uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["state"], "failed");

    let (status, body) = send(&router, tenant_request("DELETE", &cancel_uri)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["outcome"], "finished");
}

#[tokio::test]
async fn health_and_queue_stats_need_no_tenant() {
    let harness = Harness::new(&[]);
    let router = router(&harness);

    let health = Request::builder()
        .uri("/api/v1/render/health")
        .body(Body::empty())
        .expect("request");
    let (status, body) = send(&router, health).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);

    let stats = Request::builder()
        .uri("/api/v1/render/queue/stats")
        .body(Body::empty())
        .expect("request");
    let (status, body) = send(&router, stats).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"]["queued"], 0);
}

#[tokio::test]
async fn rendered_blobs_are_served_with_their_content_type() {
    let harness = Harness::new(&[project("book", vec![a4_page("p1")])]);
    let router = router(&harness);

    let (_, preview) = send(
        &router,
        json_request(
            "POST",
            "/api/v1/render/preview",
            json!({"project_id": "book", "page_id": "p1"}),
        ),
    )
    .await;
    let key = key_from_url(preview["url"].as_str().expect("url")).to_string();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/blobs/{key}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("router responds");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let stored = harness.blobs.download(&key).await.expect("stored");
    assert_eq!(bytes, stored);
}

#[tokio::test]
async fn cache_invalidation_reports_removed_entries() {
    let harness = Harness::new(&[project("book", vec![a4_page("p1")])]);
    let router = router(&harness);

    send(
        &router,
        json_request(
            "POST",
            "/api/v1/render/preview",
            json!({"project_id": "book", "page_id": "p1"}),
        ),
    )
    .await;

    let (status, body) = send(&router, tenant_request("DELETE", "/api/v1/render/cache/book/p1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 1);
    assert_eq!(body["page_id"], "p1");
}
