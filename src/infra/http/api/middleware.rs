use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    application::orchestrator::Caller,
    infra::http::middleware::{TENANT_HEADER, USER_HEADER},
};

use super::error::ApiError;

const MAX_ID_LEN: usize = 128;

/// Resolves the caller from the identity headers set by the upstream gateway.
pub async fn require_tenant(mut request: Request<Body>, next: Next) -> Response {
    let caller = match caller_from_headers(request.headers()) {
        Some(caller) => caller,
        None => return ApiError::missing_tenant().into_response(),
    };
    request.extensions_mut().insert(caller.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(caller);
    response
}

fn caller_from_headers(headers: &HeaderMap) -> Option<Caller> {
    let tenant = identity(headers, TENANT_HEADER)?;
    let caller = Caller::new(tenant);
    Some(match identity(headers, USER_HEADER) {
        Some(user) => caller.with_user(user),
        None => caller,
    })
}

fn identity(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    let valid = !value.is_empty()
        && value.len() <= MAX_ID_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    valid.then(|| value.to_string())
}
