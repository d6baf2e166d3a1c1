//! # Error Handling
//!
//! This module defines the two error families the bridge works with:
//!
//! ## AppError (HTTP boundary)
//! Errors that surface through HTTP handlers (call setup, config, health).
//! Implements `ResponseError` so actix converts them to JSON error responses
//! with the right status codes.
//!
//! ## AdapterError (service boundary)
//! Failures of the external speech/language services (transcription, reply
//! generation, synthesis). These are contained inside the call session:
//! a transcription failure ends the turn silently, a reply failure is
//! replaced with a deterministic fallback, a synthesis failure skips
//! playback. They are never converted to socket messages and never
//! terminate a call.
//!
//! ## Key Rust Concepts for Error Handling:
//! - **Result<T, E>**: Forces handling of both success and failure cases
//! - **Enums for error types**: Each variant is one failure category
//! - **From trait**: Automatic conversion between error types with `?`
//! - **Display trait**: Human-readable formatting for logs and responses

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the HTTP surface of the application.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **Conflict**: The request collides with live state, e.g. a duplicate
///   call identifier or the concurrent-call limit (409 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (adapter wiring, unexpected state, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Request conflicts with live state (duplicate call id, call limit)
    Conflict(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Converts AppError values into HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500 (Internal Server Error)
/// - BadRequest/ValidationError → 400 (Bad Request)
/// - NotFound → 404 (Not Found)
/// - Conflict → 409 (Conflict)
///
/// ## JSON Response Format:
/// All errors return JSON with a consistent structure:
/// ```json
/// {
///   "error": {
///     "type": "conflict",
///     "message": "call 'CA123' already has a live session",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::Conflict(msg) => (
                actix_web::http::StatusCode::CONFLICT,
                "conflict",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "validation_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

/// Failures of the external speech/language services.
///
/// ## Containment policy (per adapter):
/// - **NoTranscript**: the transcription engine is not configured or
///   produced no confident text. The turn ends without a reply cycle.
/// - **ReplyGeneration**: transport/auth failure of the reply service. The
///   session substitutes a deterministic fallback reply.
/// - **Synthesis**: transport/auth failure of the speech synthesizer. The
///   session skips playback for the turn (no retry).
///
/// A bounded timeout on any adapter call is reported as that adapter's
/// failure variant.
#[derive(Debug)]
pub enum AdapterError {
    /// No usable transcript for this audio (engine absent or not confident)
    NoTranscript,

    /// Reply generation failed (transport, auth, or malformed response)
    ReplyGeneration(String),

    /// Speech synthesis failed (transport, auth, or undecodable audio)
    Synthesis(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::NoTranscript => write!(f, "no transcript available"),
            AdapterError::ReplyGeneration(msg) => write!(f, "reply generation failed: {}", msg),
            AdapterError::Synthesis(msg) => write!(f, "speech synthesis failed: {}", msg),
        }
    }
}

impl std::error::Error for AdapterError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_error_display() {
        assert_eq!(
            AdapterError::NoTranscript.to_string(),
            "no transcript available"
        );
        assert!(AdapterError::ReplyGeneration("401".to_string())
            .to_string()
            .contains("401"));
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::Conflict("call 'CA123' already has a live session".to_string());
        assert!(err.to_string().starts_with("Conflict:"));
    }
}
