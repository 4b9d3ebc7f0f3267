//! Core error types.

use thiserror::Error;

/// Errors from the schema, value and replica layers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid schema: {reason}")]
    InvalidSchema { reason: String },

    #[error("table not found: {table}")]
    UnknownTable { table: String },

    #[error("column not found: {table}.{column}")]
    UnknownColumn { table: String, column: String },

    #[error("schema violation on column '{column}': {reason}")]
    Violation { column: String, reason: String },

    #[error("cannot decode {table}.{column}: {reason}")]
    Decode {
        table: String,
        column: String,
        reason: String,
    },

    #[error("invalid monitor request: {reason}")]
    InvalidRequest { reason: String },

    #[error("invalid condition on column '{column}': {reason}")]
    InvalidCondition { column: String, reason: String },

    #[error("invalid mutation on column '{column}': {reason}")]
    InvalidMutation { column: String, reason: String },

    #[error("invalid operation: {reason}")]
    InvalidOperation { reason: String },

    #[error("row not found: {table} {row}")]
    RowNotFound { table: String, row: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn violation(column: &str, reason: impl Into<String>) -> Self {
        CoreError::Violation {
            column: column.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_column(table: &str, column: &str) -> Self {
        CoreError::UnknownColumn {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        CoreError::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Returns a short, stable code for the error class.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidSchema { .. } => "INVALID_SCHEMA",
            CoreError::UnknownTable { .. } => "UNKNOWN_TABLE",
            CoreError::UnknownColumn { .. } => "UNKNOWN_COLUMN",
            CoreError::Violation { .. } => "SCHEMA_VIOLATION",
            CoreError::Decode { .. } => "DECODE_ERROR",
            CoreError::InvalidRequest { .. } => "INVALID_REQUEST",
            CoreError::InvalidCondition { .. } => "INVALID_CONDITION",
            CoreError::InvalidMutation { .. } => "INVALID_MUTATION",
            CoreError::InvalidOperation { .. } => "INVALID_OPERATION",
            CoreError::RowNotFound { .. } => "ROW_NOT_FOUND",
            CoreError::Json(_) => "BAD_JSON",
        }
    }

    /// Returns whether the error was caught before anything was sent.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::UnknownTable { .. }
                | CoreError::UnknownColumn { .. }
                | CoreError::Violation { .. }
                | CoreError::InvalidRequest { .. }
                | CoreError::InvalidCondition { .. }
                | CoreError::InvalidMutation { .. }
                | CoreError::InvalidOperation { .. }
        )
    }
}
