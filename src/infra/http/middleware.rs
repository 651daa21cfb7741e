use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use metrics::counter;
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::{error::ErrorReport, orchestrator::Caller};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;
const LOG_TARGET: &str = "pressroom::http::response";

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Tags each request with an id, reusing the caller's `x-request-id` when present.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= MAX_REQUEST_ID_LEN)
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(RequestContext { request_id });
    response
}

/// Failure details pulled off a response before it leaves the router.
struct Failure {
    status: StatusCode,
    source: &'static str,
    chain: Vec<String>,
    tenant_id: String,
    user_id: String,
}

impl Failure {
    fn take(response: &mut Response) -> Self {
        let (source, chain) = match response.extensions_mut().remove::<ErrorReport>() {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let (tenant_id, user_id) = match response.extensions().get::<Caller>() {
            Some(caller) => (
                caller.tenant_id.clone(),
                caller.user_id.clone().unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        };
        Self {
            status: response.status(),
            source,
            chain,
            tenant_id,
            user_id,
        }
    }

    fn detail(&self) -> &str {
        self.chain
            .first()
            .map_or("no diagnostic available", String::as_str)
    }
}

/// Logs every 4xx/5xx with its error chain and counts it by status.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started_at = Instant::now();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let failure = Failure::take(&mut response);
    let elapsed_ms = started_at.elapsed().as_millis() as u64;
    counter!(
        "pressroom_http_errors_total",
        "status" => failure.status.as_str().to_string()
    )
    .increment(1);

    if status.is_server_error() {
        error!(
            target = LOG_TARGET,
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            source = failure.source,
            detail = %failure.detail(),
            chain = ?failure.chain,
            request_id = %request_id,
            tenant_id = %failure.tenant_id,
            user_id = %failure.user_id,
            "request failed",
        );
    } else {
        warn!(
            target = LOG_TARGET,
            status = status.as_u16(),
            method = %method,
            path = %path,
            elapsed_ms,
            source = failure.source,
            detail = %failure.detail(),
            request_id = %request_id,
            tenant_id = %failure.tenant_id,
            "client request error",
        );
    }

    response
}
