use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{
    application::{
        jobs::QueueError,
        production::ProductionError,
        render::RenderError,
        repos::{BlobError, RepoError},
    },
    domain::error::DomainError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Production(#[from] ProductionError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("project store: {0}")]
    Repo(#[from] RepoError),
    #[error("blob store: {0}")]
    Blob(#[from] BlobError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

fn render_status(err: &RenderError) -> StatusCode {
    match err {
        RenderError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Stable reason string handed to callers.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Domain(err) => err.reason(),
            AppError::Render(err) => err.code(),
            AppError::Production(err) => err.code(),
            AppError::Queue(err) => err.code(),
            AppError::Repo(RepoError::NotFound) => "not_found",
            AppError::Repo(RepoError::InvalidInput { .. }) => "invalid_request",
            AppError::Repo(_) => "project_store_unavailable",
            AppError::Blob(BlobError::NotFound { .. }) => "not_found",
            AppError::Blob(BlobError::InvalidKey { .. }) => "invalid_request",
            AppError::Blob(BlobError::Io(_)) => "storage_unavailable",
            AppError::Infra(_) | AppError::Unexpected(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Domain(DomainError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Domain(DomainError::Validation { .. }) => StatusCode::BAD_REQUEST,
            AppError::Domain(DomainError::Invariant { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Render(err) => render_status(err),
            AppError::Production(ProductionError::Validation(_)) => StatusCode::BAD_REQUEST,
            AppError::Production(ProductionError::ValidationFailed { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Production(ProductionError::Render { source, .. }) => render_status(source),
            AppError::Production(ProductionError::Storage { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Production(ProductionError::Pdf { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Queue(QueueError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Queue(QueueError::Full { .. } | QueueError::Closed) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Queue(QueueError::JobFailed { .. }) => StatusCode::BAD_GATEWAY,
            AppError::Queue(QueueError::WaitTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Repo(RepoError::NotFound) | AppError::Blob(BlobError::NotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            AppError::Repo(RepoError::InvalidInput { .. })
            | AppError::Blob(BlobError::InvalidKey { .. }) => StatusCode::BAD_REQUEST,
            AppError::Repo(_) | AppError::Blob(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Infra(_) | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn public_message(&self) -> &'static str {
        match self.status_code() {
            StatusCode::NOT_FOUND => "Resource not found",
            StatusCode::BAD_REQUEST => "Request could not be processed",
            StatusCode::UNPROCESSABLE_ENTITY => "Production file failed validation",
            StatusCode::GATEWAY_TIMEOUT => "Rendering timed out",
            StatusCode::BAD_GATEWAY => "Rendering failed",
            StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable",
            _ => "Unexpected error occurred",
        }
    }

    /// Caller-actionable detail. Only validation failures carry one; internal
    /// errors never leak their text.
    pub fn hint(&self) -> Option<String> {
        match self {
            AppError::Domain(DomainError::Validation { .. })
            | AppError::Domain(DomainError::NotFound { .. }) => Some(self.to_string()),
            AppError::Production(ProductionError::Validation(err)) => Some(err.to_string()),
            AppError::Production(ProductionError::ValidationFailed { report }) => {
                Some(report.errors.join("; "))
            }
            AppError::Production(err @ ProductionError::Render { .. })
            | AppError::Production(err @ ProductionError::Pdf { .. }) => {
                Some(format!("failed at stage `{}`", err.stage().as_str()))
            }
            AppError::Render(RenderError::Timeout { timeout }) => {
                Some(format!("render exceeded {} ms", timeout.as_millis()))
            }
            AppError::Queue(QueueError::Full { queue, .. }) => {
                Some(format!("queue `{queue}` is at capacity, retry later"))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::production::ValidationReport;

    #[test]
    fn validation_errors_are_client_errors_with_reason() {
        let err = AppError::from(DomainError::validation("dpi", "must be between 72 and 600"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "invalid_dpi");
        assert!(err.hint().expect("hint").contains("72 and 600"));
    }

    #[test]
    fn render_timeout_maps_to_gateway_timeout() {
        let err = AppError::from(RenderError::Timeout {
            timeout: Duration::from_secs(30),
        });
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.code(), "render_timeout");
    }

    #[test]
    fn strict_validation_failure_lists_errors() {
        let err = AppError::from(ProductionError::ValidationFailed {
            report: ValidationReport::from_findings(
                vec!["missing bleed".into(), "rgb content".into()],
                Vec::new(),
            ),
        });
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.hint().as_deref(), Some("missing bleed; rgb content"));
    }

    #[test]
    fn internal_errors_hide_detail() {
        let err = AppError::unexpected("pool exploded at 0x1234");
        assert_eq!(err.code(), "internal_error");
        assert_eq!(err.hint(), None);
    }

    #[test]
    fn full_queue_is_unavailable() {
        let err = AppError::from(QueueError::Full {
            queue: "production",
            pending: 10,
        });
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "queue_unavailable");
    }
}
