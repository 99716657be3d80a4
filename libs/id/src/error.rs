//! Error types for ID parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating IDs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The ID string is empty.
    #[error("{kind} ID cannot be empty")]
    Empty { kind: &'static str },

    /// The ID exceeds the maximum length.
    #[error("{kind} ID too long: {len} bytes (max {max})")]
    TooLong {
        kind: &'static str,
        len: usize,
        max: usize,
    },

    /// The ID contains a control character.
    #[error("{kind} ID contains a control character at byte {position}")]
    ControlCharacter { kind: &'static str, position: usize },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }

    /// The kind of ID that failed validation.
    pub fn kind(&self) -> &'static str {
        match self {
            IdError::Empty { kind }
            | IdError::TooLong { kind, .. }
            | IdError::ControlCharacter { kind, .. } => kind,
        }
    }
}
