use crate::api::ApiResponse;
use crate::pdf_extraction::ExtractionError;
use axum::{http::StatusCode, response::Json};
use serde::Serialize;
use tracing::{error, info, warn};

/// Longest upstream error message carried into a user-visible failure
pub const MAX_ERROR_MESSAGE_CHARS: usize = 300;

/// Truncate on a char boundary, marking the cut with an ellipsis
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => format!("{}...", &text[..byte_index]),
        None => text.to_string(),
    }
}

/// Why a generation call ended without content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Every credential in the pool hit its quota
    QuotaExhausted,
    /// The per-credential attempt budget ran out on transient errors
    RetriesExhausted,
    /// A non-retryable upstream error
    Fatal,
    /// The overall request deadline elapsed
    TimedOut,
}

/// Failures that cross the generation boundary. Quota and transient errors
/// are handled inside the retry loop and only surface here once exhausted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("no credential could resolve a generation model")]
    ModelUnavailable,

    #[error("generation failed ({cause:?}): {message}")]
    GenerationFailed { cause: FailureCause, message: String },

    #[error("invalid response format: {reason}")]
    InvalidFormat {
        index: Option<usize>,
        reason: String,
        excerpt: String,
    },
}

impl GenerationError {
    pub fn failed(cause: FailureCause, message: &str) -> Self {
        GenerationError::GenerationFailed {
            cause,
            message: truncate_chars(message, MAX_ERROR_MESSAGE_CHARS),
        }
    }

    /// Actionable message for end users; never includes credential material
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::ModelUnavailable => {
                "The AI model is not available right now. Check the generation service configuration and try again later."
                    .to_string()
            }
            GenerationError::GenerationFailed {
                cause: FailureCause::QuotaExhausted,
                ..
            } => "The AI service usage limit has been reached for now. Please try again later.".to_string(),
            GenerationError::GenerationFailed { .. } => {
                "Failed to generate content. Try a smaller document or retry in a few minutes.".to_string()
            }
            GenerationError::InvalidFormat { .. } => {
                "The AI service returned content in an unexpected format. Please try again, or use a smaller document."
                    .to_string()
            }
        }
    }
}

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] anyhow::Error),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }
}

impl ApiError {
    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(
        self,
        context: ErrorContext,
    ) -> (StatusCode, Json<ApiResponse<()>>) {
        match &self {
            ApiError::NotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Resource not found"
                );
                (
                    StatusCode::NOT_FOUND,
                    Json(ApiResponse::error(format!("{} not found", context.resource_type))),
                )
            }
            ApiError::ValidationError(_) | ApiError::BadRequest(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Rejected request"
                );
                (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::error(self.to_string())),
                )
            }
            ApiError::Extraction(extraction) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    error = %self,
                    "Text extraction failed"
                );
                (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::error(extraction.user_message())),
                )
            }
            ApiError::Generation(generation) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Generation failed"
                );
                let status = match generation {
                    GenerationError::GenerationFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    GenerationError::ModelUnavailable | GenerationError::InvalidFormat { .. } => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                let response = match generation {
                    GenerationError::InvalidFormat { excerpt, .. } => {
                        ApiResponse::error_with_details(generation.user_message(), excerpt.clone())
                    }
                    _ => ApiResponse::error(generation.user_message()),
                };
                (status, Json(response))
            }
            ApiError::DatabaseError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Database error"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::error(
                        "Database operation failed. Please try again.".to_string(),
                    )),
                )
            }
        }
    }

    /// Simple conversion without context
    pub fn to_response(self) -> (StatusCode, Json<ApiResponse<()>>) {
        let context = ErrorContext::new("unknown", "resource");
        self.to_response_with_context(context)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(anyhow::Error::from(err))
    }
}
