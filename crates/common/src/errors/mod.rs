//! Error types for docpilot services
//!
//! Provides:
//! - Distinct error types for each failure mode in the turn pipeline
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,

    // Resource errors (2xxx)
    ThreadNotFound,

    // Retrieval errors (3xxx)
    RetrievalUnavailable,
    EmbeddingFailure,
    ResearchExhausted,

    // LLM errors (4xxx)
    ClassificationFailure,
    PlanningFailure,
    GenerationFailure,
    SummarizationFailure,

    // Deadline errors (5xxx)
    TimeoutExceeded,

    // Persistence errors (6xxx)
    CheckpointError,

    // External service errors (7xxx)
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,

            // Resources (2xxx)
            ErrorCode::ThreadNotFound => 2001,

            // Retrieval (3xxx)
            ErrorCode::RetrievalUnavailable => 3001,
            ErrorCode::EmbeddingFailure => 3002,
            ErrorCode::ResearchExhausted => 3003,

            // LLM (4xxx)
            ErrorCode::ClassificationFailure => 4001,
            ErrorCode::PlanningFailure => 4002,
            ErrorCode::GenerationFailure => 4003,
            ErrorCode::SummarizationFailure => 4004,

            // Deadlines (5xxx)
            ErrorCode::TimeoutExceeded => 5001,

            // Persistence (6xxx)
            ErrorCode::CheckpointError => 6001,

            // External (7xxx)
            ErrorCode::UpstreamError => 7001,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    // Resource errors
    #[error("Thread not found: {thread_id}")]
    ThreadNotFound { thread_id: String },

    // Retrieval errors
    #[error("Search index unreachable: {message}")]
    RetrievalUnavailable { message: String },

    #[error("Query embedding failed: {message}")]
    EmbeddingFailure { message: String },

    #[error("All {attempted} research sub-queries failed")]
    ResearchExhausted { attempted: usize },

    // LLM errors
    #[error("Query classification failed: {message}")]
    ClassificationFailure { message: String },

    #[error("Research planning failed: {message}")]
    PlanningFailure { message: String },

    #[error("Answer generation failed: {message}")]
    GenerationFailure { message: String },

    #[error("Conversation summarization failed: {message}")]
    SummarizationFailure { message: String },

    // Deadline errors
    #[error("{operation} exceeded deadline of {deadline_ms}ms")]
    TimeoutExceeded {
        operation: &'static str,
        deadline_ms: u64,
    },

    // Persistence errors
    #[error("Checkpoint store error: {message}")]
    CheckpointError { message: String },

    // External service errors
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::ThreadNotFound { .. } => ErrorCode::ThreadNotFound,
            AppError::RetrievalUnavailable { .. } => ErrorCode::RetrievalUnavailable,
            AppError::EmbeddingFailure { .. } => ErrorCode::EmbeddingFailure,
            AppError::ResearchExhausted { .. } => ErrorCode::ResearchExhausted,
            AppError::ClassificationFailure { .. } => ErrorCode::ClassificationFailure,
            AppError::PlanningFailure { .. } => ErrorCode::PlanningFailure,
            AppError::GenerationFailure { .. } => ErrorCode::GenerationFailure,
            AppError::SummarizationFailure { .. } => ErrorCode::SummarizationFailure,
            AppError::TimeoutExceeded { .. } => ErrorCode::TimeoutExceeded,
            AppError::CheckpointError { .. } => ErrorCode::CheckpointError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::MissingField { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::ThreadNotFound { .. } => StatusCode::NOT_FOUND,

            // 500 Internal Server Error
            AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingFailure { .. }
            | AppError::ClassificationFailure { .. }
            | AppError::PlanningFailure { .. }
            | AppError::GenerationFailure { .. }
            | AppError::SummarizationFailure { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::RetrievalUnavailable { .. }
            | AppError::ResearchExhausted { .. }
            | AppError::CheckpointError { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::TimeoutExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
                request_id: None, // Should be filled by middleware
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CheckpointError {
            message: err.to_string(),
        }
    }
}
