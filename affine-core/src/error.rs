//! Error taxonomy for document operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Bad caller input; always raised before anything is mutated.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error(
        "Text occurs {count} times in the document; include more surrounding context so it matches exactly once"
    )]
    AmbiguousMatch { count: usize },

    #[error("Change only touches the document title; use the title update instead")]
    TitleOnlyChange,

    #[error("Block {id} is a structural {flavour} block and cannot be {action}")]
    StructuralProtection {
        id: String,
        flavour: &'static str,
        action: &'static str,
    },

    #[error("Invalid index range: {0}")]
    InvalidRange(String),

    #[error("CRDT error: {0}")]
    Crdt(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        CoreError::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the caller can recover by adjusting its input.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, CoreError::Crdt(_))
    }
}
