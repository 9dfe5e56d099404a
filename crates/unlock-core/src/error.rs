use serde::Serialize;
use thiserror::Error;

/// Message shown to callers when authentication against the document fails.
///
/// The decrypt tool does not tell a wrong password apart from a document
/// that was never encrypted, so neither do we.
pub const WRONG_PASSWORD_MESSAGE: &str = "Incorrect password or the PDF is not encrypted";

#[derive(Error, Debug)]
pub enum UnlockError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{}", WRONG_PASSWORD_MESSAGE)]
    WrongPassword,

    #[error("Decryption tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Failed to render PDF: {0}")]
    Render(String),

    #[error("Decryption timed out after {0}ms")]
    Timeout(u64),

    #[error("Unlock cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable, serializable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    WrongPassword,
    ToolUnavailable,
    #[serde(rename = "RENDER_ERROR")]
    Render,
    Timeout,
    Cancelled,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::WrongPassword => "WRONG_PASSWORD",
            ErrorKind::ToolUnavailable => "TOOL_UNAVAILABLE",
            ErrorKind::Render => "RENDER_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

impl UnlockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnlockError::Validation(_) => ErrorKind::Validation,
            UnlockError::WrongPassword => ErrorKind::WrongPassword,
            UnlockError::ToolUnavailable(_) => ErrorKind::ToolUnavailable,
            UnlockError::Render(_) => ErrorKind::Render,
            UnlockError::Timeout(_) => ErrorKind::Timeout,
            UnlockError::Cancelled => ErrorKind::Cancelled,
            UnlockError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the failure is the caller's to fix (bad input or password).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            UnlockError::Validation(_) | UnlockError::WrongPassword
        )
    }

    /// Message safe to hand back to the caller.
    ///
    /// Operator-facing detail (tool paths, stderr, decoder messages) stays in
    /// the logs; only validation messages are passed through verbatim since
    /// they are built from limits, never from the input itself.
    pub fn public_message(&self) -> String {
        match self {
            UnlockError::Validation(msg) => msg.clone(),
            UnlockError::WrongPassword => WRONG_PASSWORD_MESSAGE.to_string(),
            UnlockError::ToolUnavailable(_) => {
                "PDF decryption tool is not available on the server. \
                 The operator must check the QPDF_PATH configuration."
                    .to_string()
            }
            UnlockError::Render(_) => "Failed to render the PDF pages".to_string(),
            UnlockError::Timeout(ms) => format!("Decryption timed out after {}ms", ms),
            UnlockError::Cancelled => "Unlock was cancelled".to_string(),
            UnlockError::Internal(_) => "Internal error while unlocking the PDF".to_string(),
        }
    }
}
