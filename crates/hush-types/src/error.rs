use thiserror::Error;

/// Input rejected locally, before any store call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("username must not be blank")]
    BlankUsername,

    #[error("message content must not be blank")]
    BlankContent,

    #[error("conversation name must not be blank")]
    BlankName,
}

/// Failure reported by the persistent store. `code` is the provider's error
/// code; two codes carry meaning for callers (see the constants below).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("store error [{code}]: {message}")]
pub struct StoreError {
    pub code: String,
    pub message: String,
}

impl StoreError {
    /// The lookup matched no row. Callers treat this as "not found".
    pub const NO_ROWS: &'static str = "no_rows";
    /// An insert collided with a uniqueness constraint.
    pub const UNIQUE_VIOLATION: &'static str = "unique_violation";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn no_rows(message: impl Into<String>) -> Self {
        Self::new(Self::NO_ROWS, message)
    }

    pub fn unique_violation(message: impl Into<String>) -> Self {
        Self::new(Self::UNIQUE_VIOLATION, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Self::NO_ROWS
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code == Self::UNIQUE_VIOLATION
    }
}
