//! Request input: document bytes plus the caller's password.

use std::fmt;

use zeroize::Zeroizing;

use crate::error::UnlockError;

/// Largest document accepted by default (100 MiB).
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 100 * 1024 * 1024;

/// Input limits checked before any resource is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_document_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

/// A document password.
///
/// The backing buffer is wiped on drop and the value never shows up in
/// `Debug` output, so it is safe to keep inside structs that get logged.
#[derive(Clone)]
pub struct Password(Zeroizing<String>);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

impl From<&str> for Password {
    fn from(value: &str) -> Self {
        Password::new(value)
    }
}

impl From<String> for Password {
    fn from(value: String) -> Self {
        Password::new(value)
    }
}

/// One unlock attempt's input. Lives only as long as the attempt.
#[derive(Debug)]
pub struct UnlockInput {
    pub document: Vec<u8>,
    pub password: Password,
}

impl UnlockInput {
    pub fn new(document: Vec<u8>, password: impl Into<Password>) -> Self {
        Self {
            document,
            password: password.into(),
        }
    }

    /// Reject empty/oversized documents and empty passwords.
    pub fn validate(&self, limits: &Limits) -> Result<(), UnlockError> {
        if self.document.is_empty() {
            return Err(UnlockError::Validation("No PDF file provided".into()));
        }
        if self.document.len() > limits.max_document_bytes {
            return Err(UnlockError::Validation(format!(
                "PDF is too large ({} bytes, limit is {} bytes)",
                self.document.len(),
                limits.max_document_bytes
            )));
        }
        if self.password.is_empty() {
            return Err(UnlockError::Validation("Password is required".into()));
        }
        Ok(())
    }
}
