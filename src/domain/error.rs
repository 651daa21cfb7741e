use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("domain entity `{entity}` not found")]
    NotFound { entity: &'static str },
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error("domain invariant violated: {message}")]
    Invariant { message: String },
}

impl DomainError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }

    /// Stable machine-readable reason, safe to hand to callers.
    pub fn reason(&self) -> &'static str {
        match self {
            DomainError::NotFound { .. } => "not_found",
            DomainError::Validation { field, .. } => match *field {
                "dpi" => "invalid_dpi",
                "dimensions" => "invalid_dimensions",
                "bleed" => "invalid_bleed",
                "pages" => "invalid_page_count",
                "compression" => "invalid_compression",
                "quality" => "invalid_quality",
                "timeout" => "invalid_timeout",
                _ => "invalid_request",
            },
            DomainError::Invariant { .. } => "invariant_violated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_reason_tracks_field() {
        assert_eq!(DomainError::validation("dpi", "too low").reason(), "invalid_dpi");
        assert_eq!(
            DomainError::validation("dimensions", "too wide").reason(),
            "invalid_dimensions"
        );
        assert_eq!(
            DomainError::validation("whatever", "nope").reason(),
            "invalid_request"
        );
    }

    #[test]
    fn display_includes_field() {
        let err = DomainError::validation("bleed", "must be between 1 and 10 mm");
        assert_eq!(err.to_string(), "invalid bleed: must be between 1 and 10 mm");
    }
}
