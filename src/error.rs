//! # Error Handling
//!
//! Two layers of errors live here:
//! - **AppError**: HTTP-facing errors, rendered as JSON by actix's `ResponseError`.
//! - **Domain errors**: the bridge's failure taxonomy (`RegistryError`,
//!   `HandshakeError`, `TransportError`, `PipelineError` and the engine errors).
//!
//! ## Failure policy:
//! - Transport failures and room-capacity violations end a session.
//! - Recognition failures are values, not errors (see `engines::Recognition`).
//! - Translation and synthesis failures end one pipeline run, never the session.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// HTTP-facing error type.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **Unprocessable**: Well-formed request the pipeline could not use (422 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (engine crashes, I/O failures, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Audio was accepted but produced nothing usable (no speech, unsupported voice)
    Unprocessable(String),

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
            AppError::Unprocessable(msg) => write!(f, "Unprocessable: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "bad_request",
///     "message": "missing multipart field 'file'",
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
            AppError::Unprocessable(msg) => (
                actix_web::http::StatusCode::UNPROCESSABLE_ENTITY,
                "unprocessable",
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

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Multipart error: {}", err))
    }
}

impl From<AudioFormatError> for AppError {
    fn from(err: AudioFormatError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Synthesis(SynthesisError::UnsupportedVoice(_)) => {
                AppError::Unprocessable(err.to_string())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Room membership failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("room '{room_id}' already has {capacity} participants")]
    RoomFull { room_id: String, capacity: usize },

    #[error("user '{user_id}' is already connected to room '{room_id}'")]
    DuplicateUser { room_id: String, user_id: String },
}

/// Failures while establishing a session's language configuration.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("malformed configuration message: {0}")]
    Malformed(String),

    #[error("language '{0}' is not supported")]
    UnsupportedLanguage(String),

    #[error("session already configured")]
    AlreadyConfigured,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Failures writing to or reading from a participant's connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection is closed")]
    Disconnected,

    #[error("handshake not completed within {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Inbound audio that cannot be turned into canonical PCM.
#[derive(Debug, thiserror::Error)]
pub enum AudioFormatError {
    #[error("audio payload is empty")]
    Empty,

    #[error("PCM payload length {0} is not a whole number of 16-bit samples")]
    OddLength(usize),

    #[error("unsupported WAV encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("failed to decode audio container: {0}")]
    Decode(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    #[error("no translation package installed for {from} -> {to}")]
    PairUnavailable { from: String, to: String },

    #[error("translation engine failed: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("no voice installed for language '{0}'")]
    UnsupportedVoice(String),

    #[error("synthesis engine failed: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A pipeline run that stopped after recognition succeeded.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("translation failed: {0}")]
    Translation(#[from] TranslationError),

    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("pipeline did not finish within {0:?}")]
    Timeout(std::time::Duration),
}
