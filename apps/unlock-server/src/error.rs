//! Error types for the unlock server

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};
use unlock_core::{ErrorKind, UnlockError};

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Unlock(#[from] UnlockError),

    /// The multipart body could not be read (malformed, or over the size limit)
    #[error("Failed to read upload: {message}")]
    Upload { status: StatusCode, message: String },
}

impl From<MultipartError> for ServerError {
    fn from(err: MultipartError) -> Self {
        ServerError::Upload {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: String,
}

/// HTTP status for each failure category.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::WrongPassword => StatusCode::BAD_REQUEST,
        ErrorKind::Timeout | ErrorKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::ToolUnavailable | ErrorKind::Render | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ServerError::Unlock(err) => {
                // Full detail (tool paths, stderr, decoder output) stays in the log.
                if err.is_client_error() {
                    info!(code = err.kind().as_str(), "Unlock rejected: {}", err);
                } else {
                    error!(code = err.kind().as_str(), "Unlock failed: {}", err);
                }
                (
                    status_for(err.kind()),
                    err.kind().as_str(),
                    err.public_message(),
                )
            }
            ServerError::Upload { status, message } => {
                info!(%status, "Rejected upload: {}", message);
                (*status, "INVALID_UPLOAD", message.clone())
            }
        };

        let body = ErrorResponse {
            success: false,
            error: message,
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
