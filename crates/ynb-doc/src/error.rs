//! Error types for the document model.

use thiserror::Error;

/// Errors that can occur while reading or mutating a document.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocError {
    #[error("Found unknown cell type: {0}")]
    UnknownCellType(String),

    #[error("Cell type cannot change after creation: {0}")]
    CellTypeChanged(String),

    #[error("Disposed object accessed: {0}")]
    Disposed(&'static str),

    #[error("Invalid index: {index} (length: {length})")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Unknown shared type: {0}")]
    UnknownBranch(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("A transaction is already open on this document")]
    NestedTransaction,

    #[error("Cell {0} is already owned by a notebook")]
    CellAlreadyBound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DocError {
    fn from(err: serde_json::Error) -> Self {
        DocError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DocError>;
