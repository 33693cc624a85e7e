//! Error types for fieldsync core.

use thiserror::Error;

use crate::types::EntityKind;

/// Errors raised while mapping records between local and remote schemas.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("missing column `{column}` in {table} row")]
    MissingColumn { table: &'static str, column: String },

    #[error("column `{column}` in {table} row has wrong type, expected {expected}")]
    WrongType {
        table: &'static str,
        column: String,
        expected: &'static str,
    },

    #[error("invalid timestamp `{value}` in column `{column}`")]
    InvalidTimestamp { column: String, value: String },

    #[error("payload is a {actual} record, expected {expected}")]
    KindMismatch {
        expected: EntityKind,
        actual: EntityKind,
    },

    #[error("unknown record type `{0}`")]
    UnknownRecordType(String),
}

/// Result type for transform operations.
pub type Result<T> = std::result::Result<T, TransformError>;
