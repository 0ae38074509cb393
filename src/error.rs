//! # Error Handling
//!
//! Custom error types and their conversion to HTTP responses. Internal code
//! uses `anyhow` freely; handlers surface failures as [`AppError`] so every
//! endpoint produces the same JSON error shape.
//!
//! ## Error Categories:
//! - **Internal/ConfigError**: Server-side problems (500)
//! - **BadRequest/ValidationError**: Client sent invalid data (400)
//! - **NotFound**: Requested resource doesn't exist (404)
//! - **UnsupportedMedia**: File type the decoder cannot handle (415)
//! - **PayloadTooLarge**: Upload over the configured size limit (413)
//! - **CapacityExceeded**: Transcript store is full (429)
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "validation_error",
//!     "message": "Port must be greater than 0",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

use crate::audio::AudioDecodeError;
use crate::transcript::StoreError;

#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (inference failures, poisoned state, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource was not found
    NotFound(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// Upload is not a supported audio format
    UnsupportedMedia(String),

    /// Upload exceeds the configured size limit
    PayloadTooLarge(String),

    /// Transcript store cannot hold more sessions right now
    CapacityExceeded(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::UnsupportedMedia(msg) => write!(f, "Unsupported media: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::CapacityExceeded(msg) => write!(f, "Capacity exceeded: {}", msg),
        }
    }
}

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
            AppError::UnsupportedMedia(msg) => (
                actix_web::http::StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_media",
                msg.clone(),
            ),
            AppError::PayloadTooLarge(msg) => (
                actix_web::http::StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                msg.clone(),
            ),
            AppError::CapacityExceeded(msg) => (
                actix_web::http::StatusCode::TOO_MANY_REQUESTS,
                "capacity_exceeded",
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

/// JSON parsing failures are the client's malformed data, not our fault.
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

impl From<AudioDecodeError> for AppError {
    fn from(err: AudioDecodeError) -> Self {
        match err {
            AudioDecodeError::UnsupportedFormat(_) | AudioDecodeError::NoAudioTrack => {
                AppError::UnsupportedMedia(err.to_string())
            }
            AudioDecodeError::Corrupted(_) | AudioDecodeError::EmptyAudio => {
                AppError::BadRequest(err.to_string())
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Full(_) => AppError::CapacityExceeded(err.to_string()),
            StoreError::NotFound | StoreError::SegmentOutOfRange { .. } => {
                AppError::NotFound(err.to_string())
            }
        }
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::UnsupportedMedia("x".into()), StatusCode::UNSUPPORTED_MEDIA_TYPE),
            (AppError::PayloadTooLarge("x".into()), StatusCode::PAYLOAD_TOO_LARGE),
            (AppError::CapacityExceeded("x".into()), StatusCode::TOO_MANY_REQUESTS),
        ];
        for (err, expected) in cases {
            assert_eq!(err.error_response().status(), expected);
        }
    }

    #[test]
    fn test_decode_error_mapping() {
        let err: AppError = AudioDecodeError::UnsupportedFormat("flac".into()).into();
        assert!(matches!(err, AppError::UnsupportedMedia(_)));

        let err: AppError = AudioDecodeError::EmptyAudio.into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_store_error_mapping() {
        let err: AppError = StoreError::Full(32).into();
        assert!(matches!(err, AppError::CapacityExceeded(_)));

        let err: AppError = StoreError::NotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
